//! Error types for depot-core.

use depot_config::error::ConfigError;
use depot_registry::RegistryError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Repository set is locked, repositories cannot be added after a pool was built")]
    #[diagnostic(
        code(depot_core::locked),
        help("Add every repository before building a pool")
    )]
    Locked,

    #[error("Installed repository '{0}' cannot be used as a source of new packages")]
    #[diagnostic(
        code(depot_core::installed_repository),
        help("Call allow_installed_repositories() if this is intended")
    )]
    InstalledRepository(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use miette::Diagnostic;

    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            CoreError::Locked.code().map(|c| c.to_string()).as_deref(),
            Some("depot_core::locked")
        );
        let wrapped = CoreError::from(RegistryError::Unenumerable("x".into()));
        assert_eq!(
            wrapped.code().map(|c| c.to_string()).as_deref(),
            Some("depot_registry::unenumerable")
        );
    }
}
