use std::{borrow::Cow, path::PathBuf, time::Duration};

use serde::de::DeserializeOwned;

use crate::error::{JobError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Per-request transport options.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Extra request headers as `(name, value)` pairs.
    pub headers: Vec<(String, String)>,
    pub max_redirects: Option<u32>,
    /// Reject response bodies larger than this many bytes.
    pub max_size: Option<u64>,
    pub timeout: Option<Duration>,
    /// Ask the auth provider for credentials and retry once on 401/403.
    pub retry_auth_failure: bool,
    pub allow_self_signed: bool,
}

#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub options: FetchOptions,
    pub body: Option<Vec<u8>>,
    /// When set, the response body is written to this path instead of being
    /// kept in memory.
    pub destination: Option<PathBuf>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            options: FetchOptions::default(),
            body: None,
            destination: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::Post,
            body: Some(body.into()),
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        let mut headers = std::mem::take(&mut self.options.headers);
        headers.extend(options.headers.iter().cloned());
        self.options = FetchOptions {
            headers,
            ..options
        };
        self
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.options
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces (or adds) a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.options
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.options.headers.push((name.to_string(), value.into()));
    }

    pub fn is_conditional(&self) -> bool {
        self.header_value("if-modified-since").is_some()
    }

    pub fn is_file_url(&self) -> bool {
        self.url.starts_with("file://")
    }

    /// Requests that cannot go through the multiplexed backend and are
    /// performed one at a time on the polling thread.
    pub fn needs_inline_backend(&self) -> bool {
        self.is_file_url() || self.options.allow_self_signed
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub url: String,
    pub status: u16,
    /// Response headers with lowercased names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| JobError::Io {
            action: format!("decode JSON from {}", self.url),
            source: err.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = FetchRequest::get("https://repo.test/packages.json")
            .header("If-Modified-Since", "Tue, 01 Jan 2030 00:00:00 GMT");
        assert!(req.is_conditional());
        assert_eq!(
            req.header_value("if-modified-since"),
            Some("Tue, 01 Jan 2030 00:00:00 GMT")
        );
    }

    #[test]
    fn test_set_header_replaces() {
        let mut req = FetchRequest::get("https://repo.test").header("Authorization", "a");
        req.set_header("authorization", "b");
        assert_eq!(req.options.headers.len(), 1);
        assert_eq!(req.header_value("Authorization"), Some("b"));
    }

    #[test]
    fn test_with_options_keeps_headers() {
        let req = FetchRequest::get("https://repo.test")
            .header("X-A", "1")
            .with_options(FetchOptions {
                max_size: Some(10),
                headers: vec![("X-B".into(), "2".into())],
                ..Default::default()
            });
        assert_eq!(req.options.max_size, Some(10));
        assert_eq!(req.header_value("x-a"), Some("1"));
        assert_eq!(req.header_value("x-b"), Some("2"));
    }

    #[test]
    fn test_inline_backend_selection() {
        assert!(FetchRequest::get("file:///srv/packages.json").needs_inline_backend());
        assert!(!FetchRequest::get("https://repo.test").needs_inline_backend());

        let mut req = FetchRequest::get("https://repo.test");
        req.options.allow_self_signed = true;
        assert!(req.needs_inline_backend());
    }

    #[test]
    fn test_response_json() {
        let resp = Response::new("u", 200, br#"{"a":1}"#.to_vec()).with_header("Last-Modified", "x");
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(resp.header("last-modified"), Some("x"));
    }
}
