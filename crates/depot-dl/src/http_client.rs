use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use depot_utils::fs::{ensure_dir_exists, part_path};
use tracing::{debug, trace};
use ureq::{tls::TlsConfig, Agent, Body, Proxy};

use crate::{
    error::{JobError, Result},
    request::{FetchRequest, Method, Response},
};

const READ_CHUNK: usize = 8192;

/// Cancellation flag shared between a scheduler and the worker performing a
/// job. Raising it makes the worker stop at its next read.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Performs a single request to completion.
///
/// Implementations must report every HTTP status as `Ok(Response)`; mapping
/// statuses to failures is the scheduler's job. `file://` URLs must be served
/// from the local filesystem, with a missing file reported as status 404.
pub trait Transport: Send + Sync {
    fn perform(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<Response>;
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub user_agent: Option<String>,
    pub proxy: Option<Proxy>,
    pub timeout: Option<Duration>,
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: Some(concat!("depot/", env!("CARGO_PKG_VERSION")).into()),
            proxy: None,
            timeout: None,
            max_redirects: 20,
        }
    }
}

impl ClientConfig {
    /// Builds an `Agent` from this config. Statuses are never turned into
    /// errors by the agent.
    pub fn build(&self, verify_tls: bool) -> Agent {
        let mut config = Agent::config_builder()
            .proxy(self.proxy.clone())
            .timeout_global(self.timeout)
            .max_redirects(self.max_redirects)
            .http_status_as_error(false);

        if let Some(user_agent) = &self.user_agent {
            config = config.user_agent(user_agent);
        }
        if !verify_tls {
            config = config.tls_config(TlsConfig::builder().disable_verification(true).build());
        }

        config.build().into()
    }
}

/// [`Transport`] backed by `ureq`.
///
/// Holds two agents: one verifying TLS certificates and one that accepts
/// self-signed certificates for repositories that opt into it.
pub struct UreqTransport {
    agent: Agent,
    insecure_agent: Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            agent: config.build(true),
            insecure_agent: config.build(false),
        }
    }

    fn agent_for(&self, request: &FetchRequest) -> &Agent {
        if request.options.allow_self_signed {
            &self.insecure_agent
        } else {
            &self.agent
        }
    }

    fn call(&self, request: &FetchRequest) -> Result<ureq::http::Response<Body>> {
        let agent = self.agent_for(request);
        let url = request.url.as_str();

        let result = match request.method {
            Method::Get => {
                let mut builder = agent.get(url);
                for (name, value) in &request.options.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder
                    .config()
                    .timeout_global(request.options.timeout)
                    .max_redirects(request.options.max_redirects.unwrap_or(20))
                    .build()
                    .call()
            }
            Method::Post => {
                let mut builder = agent.post(url);
                for (name, value) in &request.options.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                let body = request.body.as_deref().unwrap_or_default();
                builder
                    .config()
                    .timeout_global(request.options.timeout)
                    .max_redirects(request.options.max_redirects.unwrap_or(20))
                    .build()
                    .send(body)
            }
        };

        result.map_err(|err| match err {
            ureq::Error::Timeout(_) => {
                JobError::Timeout {
                    target: request.url.clone(),
                }
            }
            other => {
                JobError::Transport {
                    url: request.url.clone(),
                    message: other.to_string(),
                }
            }
        })
    }
}

impl Transport for UreqTransport {
    fn perform(&self, request: &FetchRequest, abort: &AbortSignal) -> Result<Response> {
        if request.is_file_url() {
            return perform_file(request, abort);
        }

        debug!(url = %request.url, method = ?request.method, "performing request");
        let response = self.call(request)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let mut reader = response.into_body().into_reader();
        let body = match (&request.destination, (200..300).contains(&status)) {
            (Some(dest), true) => {
                stream_to_file(&mut reader, dest, request, abort)?;
                Vec::new()
            }
            _ => read_limited(&mut reader, request, abort)?,
        };
        trace!(url = %request.url, status, bytes = body.len(), "request finished");

        Ok(Response {
            url: request.url.clone(),
            status,
            headers,
            body,
        })
    }
}

fn perform_file(request: &FetchRequest, abort: &AbortSignal) -> Result<Response> {
    let path = url::Url::parse(&request.url)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .ok_or_else(|| {
            JobError::Transport {
                url: request.url.clone(),
                message: "not a valid file URL".into(),
            }
        })?;

    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Response::new(request.url.clone(), 404, Vec::new()));
        }
        Err(err) => {
            return Err(JobError::Io {
                action: format!("read {}", path.display()),
                source: err,
            })
        }
    };

    let body = match &request.destination {
        Some(dest) => {
            stream_to_file(&mut file, dest, request, abort)?;
            Vec::new()
        }
        None => read_limited(&mut file, request, abort)?,
    };
    Ok(Response::new(request.url.clone(), 200, body))
}

fn read_limited(
    reader: &mut impl Read,
    request: &FetchRequest,
    abort: &AbortSignal,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    copy_chunks(reader, request, abort, |chunk| {
        body.extend_from_slice(chunk);
        Ok(())
    })?;
    Ok(body)
}

/// Streams into `<dest>.part` and renames it over `dest` once complete.
fn stream_to_file(
    reader: &mut impl Read,
    dest: &Path,
    request: &FetchRequest,
    abort: &AbortSignal,
) -> Result<()> {
    let io_err = |action: String| move |source: std::io::Error| JobError::Io { action, source };

    if let Some(parent) = dest.parent() {
        ensure_dir_exists(parent).map_err(|err| {
            JobError::Io {
                action: format!("create {}", parent.display()),
                source: std::io::Error::other(err.to_string()),
            }
        })?;
    }

    let part = part_path(dest);
    let mut file =
        File::create(&part).map_err(io_err(format!("create {}", part.display())))?;

    let copied = copy_chunks(reader, request, abort, |chunk| {
        file.write_all(chunk)
            .map_err(io_err(format!("write {}", part.display())))
    });
    if let Err(err) = copied {
        let _ = std::fs::remove_file(&part);
        return Err(err);
    }

    file.sync_all()
        .map_err(io_err(format!("sync {}", part.display())))?;
    std::fs::rename(&part, dest).map_err(io_err(format!("rename {}", part.display())))
}

fn copy_chunks(
    reader: &mut impl Read,
    request: &FetchRequest,
    abort: &AbortSignal,
    mut sink: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut buffer = [0u8; READ_CHUNK];
    let mut total: u64 = 0;

    loop {
        if abort.is_raised() {
            return Err(JobError::Cancelled { id: 0 });
        }
        let n = reader.read(&mut buffer).map_err(|err| {
            JobError::Transport {
                url: request.url.clone(),
                message: err.to_string(),
            }
        })?;
        if n == 0 {
            return Ok(());
        }
        total += n as u64;
        if let Some(limit) = request.options.max_size {
            if total > limit {
                return Err(JobError::TooLarge {
                    url: request.url.clone(),
                    limit,
                });
            }
        }
        sink(&buffer[..n])?;
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn file_url(path: &Path) -> String {
        url::Url::from_file_path(path).unwrap().to_string()
    }

    #[test]
    fn test_abort_signal() {
        let signal = AbortSignal::new();
        let shared = signal.clone();
        assert!(!signal.is_raised());
        shared.raise();
        assert!(signal.is_raised());
    }

    #[test]
    fn test_file_url_is_read_locally() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.json");
        fs::write(&path, br#"{"packages":[]}"#).unwrap();

        let transport = UreqTransport::default();
        let response = transport
            .perform(&FetchRequest::get(file_url(&path)), &AbortSignal::new())
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"packages":[]}"#);
    }

    #[test]
    fn test_missing_file_is_404() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let transport = UreqTransport::default();
        let response = transport
            .perform(&FetchRequest::get(file_url(&path)), &AbortSignal::new())
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_file_copy_to_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.json");
        let dest = dir.path().join("out/dest.json");
        fs::write(&src, b"payload").unwrap();

        let transport = UreqTransport::default();
        let request = FetchRequest::get(file_url(&src)).destination(&dest);
        let response = transport.perform(&request, &AbortSignal::new()).unwrap();

        assert!(response.body.is_empty());
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_size_limit() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("big.json");
        fs::write(&src, vec![b'x'; 64]).unwrap();

        let mut request = FetchRequest::get(file_url(&src));
        request.options.max_size = Some(16);
        let err = UreqTransport::default()
            .perform(&request, &AbortSignal::new())
            .unwrap_err();
        assert!(matches!(err, JobError::TooLarge { limit: 16, .. }));
    }
}
