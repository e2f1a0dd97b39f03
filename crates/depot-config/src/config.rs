use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use depot_utils::path::{xdg_cache_home, xdg_config_home};
use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::info;

use crate::{
    annotations::{annotate_toml_array_of_tables, annotate_toml_table},
    error::{ConfigError, Result},
    repository::{default_repositories, RepositoryConfig},
};

/// Disables every network fetch except conditional (not-modified) checks.
pub const ENV_DISABLE_NETWORK: &str = "DEPOT_DISABLE_NETWORK";
/// Overrides the HTTP concurrency ceiling.
pub const ENV_MAX_PARALLEL_HTTP: &str = "DEPOT_MAX_PARALLEL_HTTP";
/// Overrides the child-process concurrency ceiling.
pub const ENV_MAX_PARALLEL_PROCESSES: &str = "DEPOT_MAX_PARALLEL_PROCESSES";
/// Overrides the configuration file location.
pub const ENV_CONFIG: &str = "DEPOT_CONFIG";

pub const DEFAULT_MAX_PARALLEL_HTTP: usize = 12;
pub const DEFAULT_MAX_PARALLEL_PROCESSES: usize = 10;
pub const MAX_PARALLELISM: usize = 50;

const STABILITIES: [&str; 5] = ["stable", "rc", "beta", "alpha", "dev"];

/// Application's configuration
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// Directory holding the per-repository metadata caches.
    /// Default: $XDG_CACHE_HOME/depot
    pub cache_path: Option<String>,

    /// Maximum number of HTTP transfers running at once (1-50).
    /// Default: 12
    pub max_parallel_http: Option<usize>,

    /// Maximum number of child processes running at once (1-50).
    /// Default: 10
    pub max_parallel_processes: Option<usize>,

    /// Disables network access. Conditional refreshes are answered with
    /// "not modified" so cached metadata keeps working offline.
    /// Default: false
    pub disable_network: Option<bool>,

    /// Minimum stability of package versions considered for resolution.
    /// One of: stable, RC, beta, alpha, dev.
    /// Default: stable
    pub minimum_stability: Option<String>,

    /// Per-request HTTP timeout in seconds.
    /// Default: 300
    pub http_timeout: Option<u64>,

    /// Timeout for child processes in seconds. 0 disables the timeout.
    /// Default: 300
    pub process_timeout: Option<u64>,

    /// List of configured repositories, in priority order.
    #[serde(default = "default_repositories")]
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_path: None,
            max_parallel_http: Some(DEFAULT_MAX_PARALLEL_HTTP),
            max_parallel_processes: Some(DEFAULT_MAX_PARALLEL_PROCESSES),
            disable_network: Some(false),
            minimum_stability: Some("stable".to_string()),
            http_timeout: Some(300),
            process_timeout: Some(300),
            repositories: default_repositories(),
        }
    }
}

/// Location of the configuration file.
pub fn config_path() -> PathBuf {
    match env::var(ENV_CONFIG) {
        Ok(path) => PathBuf::from(path),
        Err(_) => xdg_config_home().join("depot").join("config.toml"),
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    Some(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "prime"
    ))
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok()?.trim().parse().ok()
}

fn clamp_parallelism(value: usize) -> usize {
    value.clamp(1, MAX_PARALLELISM)
}

impl Config {
    /// Loads the configuration from [`config_path`], falling back to defaults
    /// when the file does not exist.
    pub fn new() -> Result<Self> {
        Self::load(config_path())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = match fs::read_to_string(path.as_ref()) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;

        Ok(config)
    }

    pub fn resolve(&mut self) -> Result<()> {
        self.max_parallel_http.get_or_insert(DEFAULT_MAX_PARALLEL_HTTP);
        self.max_parallel_processes.get_or_insert(DEFAULT_MAX_PARALLEL_PROCESSES);
        self.disable_network.get_or_insert(false);
        self.http_timeout.get_or_insert(300);
        self.process_timeout.get_or_insert(300);

        let stability = self
            .minimum_stability
            .get_or_insert_with(|| "stable".to_string());
        if !STABILITIES.contains(&stability.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidStability(stability.clone()));
        }

        let mut seen_repos = HashSet::new();
        for repo in &mut self.repositories {
            repo.validate()?;
            if !seen_repos.insert(repo.name.clone()) {
                return Err(ConfigError::DuplicateRepositoryName(repo.name.clone()));
            }
            repo.enabled.get_or_insert(true);
        }

        Ok(())
    }

    /// Directory holding the metadata caches.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| xdg_cache_home().join("depot"))
    }

    /// Effective HTTP concurrency ceiling.
    ///
    /// `DEPOT_MAX_PARALLEL_HTTP` wins over the configuration file; the result is
    /// clamped to `1..=50`.
    pub fn http_parallelism(&self) -> usize {
        let value = env_usize(ENV_MAX_PARALLEL_HTTP)
            .or(self.max_parallel_http)
            .unwrap_or(DEFAULT_MAX_PARALLEL_HTTP);
        clamp_parallelism(value)
    }

    /// Effective process concurrency ceiling, see [`Config::http_parallelism`].
    pub fn process_parallelism(&self) -> usize {
        let value = env_usize(ENV_MAX_PARALLEL_PROCESSES)
            .or(self.max_parallel_processes)
            .unwrap_or(DEFAULT_MAX_PARALLEL_PROCESSES);
        clamp_parallelism(value)
    }

    /// Whether the network kill switch is on, from the environment or the file.
    pub fn network_disabled(&self) -> bool {
        env_flag(ENV_DISABLE_NETWORK)
            .or(self.disable_network)
            .unwrap_or(false)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        match self.http_timeout.unwrap_or(300) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        match self.process_timeout.unwrap_or(300) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn minimum_stability(&self) -> &str {
        self.minimum_stability.as_deref().unwrap_or("stable")
    }

    pub fn enabled_repositories(&self) -> impl Iterator<Item = &RepositoryConfig> {
        self.repositories.iter().filter(|r| r.is_enabled())
    }

    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut doc = toml_string.parse::<DocumentMut>()?;

        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;

        if let Some(repositories_item) = doc.get_mut("repositories") {
            if let Some(repositories_array) = repositories_item.as_array_of_tables_mut() {
                annotate_toml_array_of_tables::<RepositoryConfig>(repositories_array)?;
            }
        }

        Ok(doc)
    }
}

/// Writes a documented default configuration to `path`.
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(ConfigError::ConfigAlreadyExists);
    }

    let annotated_doc = Config::default().to_annotated_document()?;
    depot_utils::fs::write_atomic(path, annotated_doc.to_string().as_bytes())?;

    info!(
        "Default configuration file generated with documentation at: {}",
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;
    use crate::test_utils::with_env;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_parallel_http, Some(12));
        assert_eq!(config.max_parallel_processes, Some(10));
        assert_eq!(config.minimum_stability(), "stable");
        assert_eq!(config.repositories.len(), 1);
    }

    #[test]
    #[serial]
    fn test_http_parallelism_env_override_is_clamped() {
        let config = Config::default();

        with_env(vec![(ENV_MAX_PARALLEL_HTTP, Some("200"))], || {
            assert_eq!(config.http_parallelism(), 50);
        });
        with_env(vec![(ENV_MAX_PARALLEL_HTTP, Some("0"))], || {
            assert_eq!(config.http_parallelism(), 1);
        });
        with_env(vec![(ENV_MAX_PARALLEL_HTTP, Some("7"))], || {
            assert_eq!(config.http_parallelism(), 7);
        });
        with_env(vec![(ENV_MAX_PARALLEL_HTTP, None)], || {
            assert_eq!(config.http_parallelism(), 12);
        });
    }

    #[test]
    #[serial]
    fn test_process_parallelism_from_file() {
        let config = Config {
            max_parallel_processes: Some(3),
            ..Config::default()
        };
        with_env(vec![(ENV_MAX_PARALLEL_PROCESSES, None)], || {
            assert_eq!(config.process_parallelism(), 3);
        });
    }

    #[test]
    #[serial]
    fn test_network_disabled_env() {
        let config = Config::default();
        with_env(vec![(ENV_DISABLE_NETWORK, Some("1"))], || {
            assert!(config.network_disabled());
        });
        with_env(vec![(ENV_DISABLE_NETWORK, Some("prime"))], || {
            assert!(config.network_disabled());
        });
        with_env(vec![(ENV_DISABLE_NETWORK, Some("0"))], || {
            assert!(!config.network_disabled());
        });
        with_env(vec![(ENV_DISABLE_NETWORK, None)], || {
            assert!(!config.network_disabled());
        });
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path().join("config.toml")).unwrap();
        assert_eq!(config.repositories[0].name, "packagist");
    }

    #[test]
    fn test_load_rejects_duplicate_repositories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[[repositories]]
name = "acme"
url = "https://repo.acme.test"

[[repositories]]
name = "acme"
url = "https://mirror.acme.test"
"#,
        )
        .unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::DuplicateRepositoryName(name)) if name == "acme"
        ));
    }

    #[test]
    fn test_load_rejects_unknown_stability() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "minimum_stability = \"nightly\"\nrepositories = []\n").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidStability(_))
        ));
    }

    #[test]
    fn test_generate_default_config_is_annotated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depot/config.toml");
        generate_default_config(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("# Maximum number of HTTP transfers"));
        assert!(content.contains("# Unique name of the repository."));

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.max_parallel_http, Some(12));

        assert!(matches!(
            generate_default_config(&path),
            Err(ConfigError::ConfigAlreadyExists)
        ));
    }
}
