use depot_utils::error::{FileSystemError, UtilsError};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(depot_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(depot_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Failed to parse TOML: {0}")]
    #[diagnostic(code(depot_config::toml))]
    Toml(#[from] toml_edit::TomlError),

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(depot_config::already_exists),
        help("Remove the existing config file or use a different location")
    )]
    ConfigAlreadyExists,

    #[error("Invalid repository name: {0}")]
    #[diagnostic(
        code(depot_config::invalid_repository),
        help("Repository names must be non-empty and must not contain '/'")
    )]
    InvalidRepository(String),

    #[error("Invalid repository URL: {0}")]
    #[diagnostic(
        code(depot_config::invalid_repository_url),
        help("Repository URLs must use the http, https or file scheme")
    )]
    InvalidRepositoryUrl(String),

    #[error("Duplicate repository name: {0}")]
    #[diagnostic(
        code(depot_config::duplicate_repo),
        help("Each repository must have a unique name")
    )]
    DuplicateRepositoryName(String),

    #[error("Invalid minimum stability: {0}")]
    #[diagnostic(
        code(depot_config::invalid_stability),
        help("Use one of: stable, RC, beta, alpha, dev")
    )]
    InvalidStability(String),

    #[error("IO error: {0}")]
    #[diagnostic(code(depot_config::io))]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(depot_config::utils))]
    Utils(#[from] UtilsError),

    #[error("Encountered unexpected TOML item: {0}")]
    #[diagnostic(code(depot_config::unexpected_toml_item))]
    UnexpectedTomlItem(String),
}

impl From<FileSystemError> for ConfigError {
    fn from(err: FileSystemError) -> Self {
        Self::Utils(UtilsError::FileSystem(err))
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
