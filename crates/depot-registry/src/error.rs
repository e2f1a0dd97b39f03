//! Error types for the registry crate.

use depot_dl::JobError;
use depot_utils::error::{FileSystemError, PatternError, UtilsError};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    #[diagnostic(
        code(depot_registry::job),
        help("Check your network connection and the repository URL")
    )]
    Job(#[from] JobError),

    #[error("Checksum mismatch for {url}, the file may have been tampered with")]
    #[diagnostic(
        code(depot_registry::security),
        help("Retry later; if the problem persists, report it to the repository maintainers")
    )]
    Security { url: String },

    #[error("Incomplete security advisory for '{package}' from repository '{source_name}'")]
    #[diagnostic(
        code(depot_registry::incomplete_advisory),
        help("Allow partial advisories or report the malformed entry to the repository")
    )]
    IncompleteAdvisory {
        package: String,
        source_name: String,
    },

    #[error("Repository '{repository}' returned package '{found}' when asked for '{expected}'")]
    #[diagnostic(code(depot_registry::name_mismatch))]
    NameMismatch {
        repository: String,
        expected: String,
        found: String,
    },

    #[error("Invalid repository root at {url}: {reason}")]
    #[diagnostic(
        code(depot_registry::invalid_root),
        help("Verify the repository URL points at a packages.json")
    )]
    InvalidRoot { url: String, reason: String },

    #[error("Repository '{0}' cannot enumerate all of its packages")]
    #[diagnostic(
        code(depot_registry::unenumerable),
        help("The repository only serves metadata per package name")
    )]
    Unenumerable(String),

    #[error("Invalid version string: {0}")]
    #[diagnostic(code(depot_registry::invalid_version))]
    InvalidVersion(String),

    #[error("Invalid package entry: {0}")]
    #[diagnostic(code(depot_registry::invalid_package))]
    InvalidPackage(String),

    #[error("Invalid URL: {0}")]
    #[diagnostic(
        code(depot_registry::invalid_url),
        help("Ensure the URL is valid and properly formatted")
    )]
    InvalidUrl(String),

    #[error(transparent)]
    #[diagnostic(
        code(depot_registry::json),
        help("The metadata file may be corrupted or in an invalid format")
    )]
    JsonError(#[from] serde_json::Error),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(depot_registry::io))]
    IoError {
        action: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(depot_registry::utils))]
    Utils(#[from] UtilsError),
}

impl RegistryError {
    /// Transport failures that may be answered from a stale cache.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Job(err) if err.is_retryable())
    }
}

impl From<FileSystemError> for RegistryError {
    fn from(err: FileSystemError) -> Self {
        Self::Utils(UtilsError::FileSystem(err))
    }
}

impl From<PatternError> for RegistryError {
    fn from(err: PatternError) -> Self {
        Self::Utils(UtilsError::Pattern(err))
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Extension trait for adding context to I/O errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            RegistryError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_error_names_url() {
        let err = RegistryError::Security {
            url: "https://repo.test/p/acme$foo.json".into(),
        };
        assert!(err.to_string().contains("https://repo.test/p/acme$foo.json"));
    }

    #[test]
    fn test_incomplete_advisory_message() {
        let err = RegistryError::IncompleteAdvisory {
            package: "acme/foo".into(),
            source_name: "packagist".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("acme/foo"));
        assert!(msg.contains("packagist"));
    }

    #[test]
    fn test_retryable_passthrough() {
        let err: RegistryError = JobError::Http {
            status: 502,
            url: "u".into(),
        }
        .into();
        assert!(err.is_retryable());

        let err: RegistryError = JobError::Http {
            status: 404,
            url: "u".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_context() {
        let result: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = result.with_context(|| "reading cache".into()).unwrap_err();
        assert!(err.to_string().contains("reading cache"));
    }
}
