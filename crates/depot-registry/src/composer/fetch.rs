use depot_dl::{FetchRequest, JobFuture, Response};
use depot_events::{DepotEvent, MetadataStage};
use serde_json::Value;
use tracing::{debug, warn};

use super::ComposerRepository;
use crate::{
    cache::LAST_MODIFIED_FIELD,
    error::{RegistryError, Result},
};

/// Outcome of a metadata lookup.
#[derive(Debug)]
pub(super) enum Fetched {
    /// Downloaded during this call.
    Fresh(Value),
    /// Served from the cache, revalidated or degraded.
    Cached(Value),
    /// The server answered 404.
    Absent,
}

impl Fetched {
    pub(super) fn into_value(self) -> Option<Value> {
        match self {
            Self::Fresh(value) | Self::Cached(value) => Some(value),
            Self::Absent => None,
        }
    }
}

enum Stage {
    Ready(Fetched),
    InFlight {
        future: JobFuture<Response>,
        cached: Option<Value>,
    },
}

struct PendingFetch {
    key: String,
    stage: Stage,
}

impl ComposerRepository {
    /// Fetches one metadata document, revalidating any cached copy.
    pub(super) fn fetch(&self, key: &str, url: &str) -> Result<Fetched> {
        self.fetch_all(&[(key.to_string(), url.to_string())])
            .pop()
            .unwrap_or(Ok(Fetched::Absent))
    }

    /// Fetches several metadata documents concurrently. Results are returned
    /// in request order once every request has settled.
    pub(super) fn fetch_all(&self, requests: &[(String, String)]) -> Vec<Result<Fetched>> {
        let mut pending: Vec<Result<PendingFetch>> = requests
            .iter()
            .map(|(key, url)| self.start_fetch(key, url))
            .collect();

        let mut in_flight: Vec<&mut JobFuture<Response>> = pending
            .iter_mut()
            .filter_map(|p| {
                match p {
                    Ok(PendingFetch {
                        stage: Stage::InFlight { future, .. },
                        ..
                    }) => Some(future),
                    _ => None,
                }
            })
            .collect();
        if !in_flight.is_empty() {
            self.event_loop.wait_settled(&mut in_flight, None);
        }

        pending
            .into_iter()
            .map(|p| p.and_then(|p| self.finish_fetch(p)))
            .collect()
    }

    fn start_fetch(&self, key: &str, url: &str) -> Result<PendingFetch> {
        let ready = |fetched| {
            Ok(PendingFetch {
                key: key.to_string(),
                stage: Stage::Ready(fetched),
            })
        };

        let (absent, fresh, degraded) = {
            let state = self.state.borrow();
            (
                state.absent.contains(key),
                state.fresh.contains(key),
                state.degraded,
            )
        };
        if absent {
            return ready(Fetched::Absent);
        }

        let cached = self.cache.read_json(key);
        if let Some(value) = &cached {
            if fresh {
                self.stage(key, MetadataStage::CacheHit);
                return ready(Fetched::Cached(value.clone()));
            }
            if degraded {
                self.stage(key, MetadataStage::StaleCache);
                return ready(Fetched::Cached(value.clone()));
            }
        }

        let mut request = self.request(FetchRequest::get(url));
        if let Some(since) = cached
            .as_ref()
            .and_then(|v| v.get(LAST_MODIFIED_FIELD))
            .and_then(Value::as_str)
        {
            request.set_header("If-Modified-Since", since);
        }

        debug!(repository = %self.config.name, %url, "fetching metadata");
        self.stage(key, MetadataStage::Fetching);
        let future = self.event_loop.http().add(request)?;
        Ok(PendingFetch {
            key: key.to_string(),
            stage: Stage::InFlight {
                future,
                cached,
            },
        })
    }

    fn finish_fetch(&self, pending: PendingFetch) -> Result<Fetched> {
        let PendingFetch {
            key,
            stage,
        } = pending;
        let (mut future, cached) = match stage {
            Stage::Ready(fetched) => return Ok(fetched),
            Stage::InFlight {
                future,
                cached,
            } => (future, cached),
        };
        let id = future.id().as_u64();
        let outcome = future
            .take()
            .unwrap_or(Err(depot_dl::JobError::NotSettled { id }));

        match outcome {
            Ok(response) if response.is_not_modified() => {
                let Some(value) = cached else {
                    return Err(RegistryError::InvalidPackage(format!(
                        "{}: not modified but nothing is cached",
                        response.url
                    )));
                };
                self.state.borrow_mut().fresh.insert(key.clone());
                self.stage(&key, MetadataStage::NotModified);
                Ok(Fetched::Cached(value))
            }
            Ok(response) => {
                let mut value: Value = response.json()?;
                if let (Some(since), Value::Object(fields)) =
                    (response.header("last-modified"), &mut value)
                {
                    fields.insert(LAST_MODIFIED_FIELD.to_string(), Value::from(since));
                }
                if let Err(err) = self.cache.write_json(&key, &value) {
                    warn!(repository = %self.config.name, "failed to cache {}: {}", key, err);
                }
                self.state.borrow_mut().fresh.insert(key.clone());
                self.stage(&key, MetadataStage::Stored);
                Ok(Fetched::Fresh(value))
            }
            Err(err) if err.is_not_found() => {
                self.state.borrow_mut().absent.insert(key.clone());
                if let Err(err) = self.cache.remove(&key) {
                    debug!("failed to drop stale cache entry {}: {}", key, err);
                }
                self.stage(&key, MetadataStage::Absent);
                Ok(Fetched::Absent)
            }
            Err(err) if err.is_retryable() => {
                match cached {
                    Some(value) => {
                        self.enter_degraded(&err.to_string());
                        self.stage(&key, MetadataStage::StaleCache);
                        Ok(Fetched::Cached(value))
                    }
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Switches to answering from cache after a transport failure. Logged
    /// once per repository.
    pub(super) fn enter_degraded(&self, reason: &str) {
        {
            let mut state = self.state.borrow_mut();
            if state.degraded {
                return;
            }
            state.degraded = true;
        }
        warn!(
            "{}: network unavailable ({}), using cached metadata which may be outdated",
            self.config.name, reason
        );
        self.emit(DepotEvent::DegradedMode {
            repo_name: self.config.name.clone(),
            reason: reason.to_string(),
        });
    }

    pub(super) fn stage(&self, key: &str, stage: MetadataStage) {
        self.emit(DepotEvent::Metadata {
            repo_name: self.config.name.clone(),
            key: key.to_string(),
            stage,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use depot_config::repository::RepositoryConfig;
    use depot_dl::DownloaderOptions;
    use depot_events::null_sink;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{super::test_support::*, *};

    fn repo(transport: &Arc<FakeTransport>, dir: &std::path::Path, offline: bool) -> ComposerRepository {
        let options = DownloaderOptions {
            network_disabled: offline,
            ..Default::default()
        };
        ComposerRepository::new(
            RepositoryConfig::new("x", "https://x"),
            event_loop_with(Arc::clone(transport), options),
            dir,
            null_sink(),
        )
        .unwrap()
    }

    #[test]
    fn test_last_modified_injected() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route_with_headers(
            "https://x/a.json",
            200,
            json!({"packages": {}}).to_string(),
            &[("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")],
        );

        let repo = repo(&transport, dir.path(), false);
        let fetched = repo.fetch("a.json", "https://x/a.json").unwrap();
        assert!(matches!(fetched, Fetched::Fresh(_)));

        let cached = repo.cache().read_json("a.json").unwrap();
        assert_eq!(cached[LAST_MODIFIED_FIELD], "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn test_fresh_keys_served_without_network() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route("https://x/a.json", 200, json!({"v": 1}).to_string());

        let repo = repo(&transport, dir.path(), false);
        repo.fetch("a.json", "https://x/a.json").unwrap();
        let again = repo.fetch("a.json", "https://x/a.json").unwrap();

        assert!(matches!(again, Fetched::Cached(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_network_disabled_revalidates_from_cache() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route_with_headers(
            "https://x/a.json",
            200,
            json!({"v": 1}).to_string(),
            &[("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")],
        );
        transport.route("https://x/b.json", 200, json!({"v": 2}).to_string());

        let online = repo(&transport, dir.path(), false);
        online.fetch("a.json", "https://x/a.json").unwrap();
        online.fetch("b.json", "https://x/b.json").unwrap();
        let calls = transport.calls();

        let offline = repo(&transport, dir.path(), true);
        // conditional request: synthetic 304 keeps the cached copy
        let a = offline.fetch("a.json", "https://x/a.json").unwrap();
        assert_eq!(a.into_value().unwrap()["v"], 1);
        assert!(!offline.is_degraded());

        // no Last-Modified stored: the 499 failure falls back to the cache
        let b = offline.fetch("b.json", "https://x/b.json").unwrap();
        assert_eq!(b.into_value().unwrap()["v"], 2);
        assert!(offline.is_degraded());

        assert_eq!(transport.calls(), calls);
    }

    #[test]
    fn test_404_drops_cache_entry() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route("https://x/a.json", 200, json!({"v": 1}).to_string());
        transport.route("https://x/a.json", 404, Vec::new());

        repo(&transport, dir.path(), false)
            .fetch("a.json", "https://x/a.json")
            .unwrap();
        let second = repo(&transport, dir.path(), false);
        assert!(matches!(
            second.fetch("a.json", "https://x/a.json").unwrap(),
            Fetched::Absent
        ));
        assert!(second.cache().read("a.json").is_none());
    }

    #[test]
    fn test_server_error_without_cache_propagates() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route("https://x/a.json", 503, Vec::new());

        let repo = repo(&transport, dir.path(), false);
        let err = repo.fetch("a.json", "https://x/a.json").unwrap_err();
        assert!(err.is_retryable());
        assert!(!repo.is_degraded());
    }
}
