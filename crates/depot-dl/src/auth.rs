use std::collections::HashMap;

/// Supplies credentials when a request configured with
/// `retry_auth_failure` is answered with 401 or 403.
pub trait AuthProvider {
    /// Returns a value for the `Authorization` header, or `None` when no
    /// credentials are known for `url`.
    fn authorization(&self, url: &str, status: u16) -> Option<String>;
}

/// Credentials keyed by host.
#[derive(Debug, Default, Clone)]
pub struct StaticAuth {
    by_host: HashMap<String, String>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: impl Into<String>, authorization: impl Into<String>) {
        self.by_host.insert(host.into(), authorization.into());
    }
}

impl AuthProvider for StaticAuth {
    fn authorization(&self, url: &str, _status: u16) -> Option<String> {
        let host = url::Url::parse(url).ok()?.host_str()?.to_string();
        self.by_host.get(&host).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_auth_by_host() {
        let mut auth = StaticAuth::new();
        auth.insert("repo.acme.test", "Bearer t0k3n");

        assert_eq!(
            auth.authorization("https://repo.acme.test/packages.json", 401)
                .as_deref(),
            Some("Bearer t0k3n")
        );
        assert_eq!(auth.authorization("https://other.test/", 401), None);
    }
}
