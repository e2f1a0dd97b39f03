use std::collections::BTreeMap;

use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Defines a remote repository that serves package metadata.
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct RepositoryConfig {
    /// Unique name of the repository.
    pub name: String,

    /// Base URL of the repository. `packages.json` is fetched relative to it
    /// unless the URL already points at a `.json` file.
    pub url: String,

    /// Whether the repository is enabled.
    /// Default: true
    pub enabled: Option<bool>,

    /// Extra HTTP headers sent with every request to this repository.
    pub headers: Option<BTreeMap<String, String>>,

    /// Retry a provider file over the alternate scheme (http <-> https) once
    /// when its checksum keeps mismatching over TLS.
    /// Default: false
    pub scheme_fallback: Option<bool>,

    /// Accept self-signed TLS certificates for this repository.
    /// Default: false
    pub allow_self_signed: Option<bool>,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: None,
            headers: None,
            scheme_fallback: None,
            allow_self_signed: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn scheme_fallback(&self) -> bool {
        self.scheme_fallback.unwrap_or(false)
    }

    pub fn allow_self_signed(&self) -> bool {
        self.allow_self_signed.unwrap_or(false)
    }

    /// Checks the name and URL scheme.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains('/') {
            return Err(ConfigError::InvalidRepository(self.name.clone()));
        }

        let scheme_ok = ["http://", "https://", "file://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme));
        if !scheme_ok {
            return Err(ConfigError::InvalidRepositoryUrl(self.url.clone()));
        }

        Ok(())
    }
}

/// Public repository enabled when no repositories are configured.
pub fn default_repositories() -> Vec<RepositoryConfig> {
    vec![RepositoryConfig {
        enabled: Some(true),
        ..RepositoryConfig::new("packagist", "https://repo.packagist.org")
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_defaults() {
        let repo = RepositoryConfig::new("acme", "https://repo.acme.test");
        assert!(repo.is_enabled());
        assert!(!repo.scheme_fallback());
        assert!(!repo.allow_self_signed());
        assert!(repo.validate().is_ok());
    }

    #[test]
    fn test_repository_validation() {
        let repo = RepositoryConfig::new("a/b", "https://repo.acme.test");
        assert!(matches!(
            repo.validate(),
            Err(ConfigError::InvalidRepository(_))
        ));

        let repo = RepositoryConfig::new("acme", "ftp://repo.acme.test");
        assert!(matches!(
            repo.validate(),
            Err(ConfigError::InvalidRepositoryUrl(_))
        ));

        let repo = RepositoryConfig::new("local", "file:///srv/packages");
        assert!(repo.validate().is_ok());
    }

    #[test]
    fn test_default_repositories() {
        let repos = default_repositories();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "packagist");
    }
}
