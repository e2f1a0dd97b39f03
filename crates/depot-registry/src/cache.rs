use std::path::{Path, PathBuf};

use depot_utils::{
    fs::{ensure_dir_exists, read_optional, safe_remove, write_atomic},
    hash::sha256_hex,
    path::sanitize_component,
};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Field injected into cached lazy metadata to drive conditional refresh.
pub const LAST_MODIFIED_FIELD: &str = "last-modified";

/// On-disk metadata cache of one repository.
///
/// Writes replace whole files atomically. Missing, unreadable or unparsable
/// files read as a miss.
#[derive(Clone, Debug)]
pub struct RepoCache {
    dir: PathBuf,
}

impl RepoCache {
    /// Cache directory for `repo_url` below `cache_root`.
    pub fn new(cache_root: &Path, repo_url: &str) -> Self {
        Self {
            dir: cache_root.join("repo").join(sanitize_component(repo_url)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        read_optional(self.path(key))
    }

    pub fn read_json(&self, key: &str) -> Option<Value> {
        let bytes = self.read(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!("ignoring corrupt cache entry {}: {}", key, err);
                None
            }
        }
    }

    pub fn write(&self, key: &str, contents: &[u8]) -> Result<()> {
        ensure_dir_exists(&self.dir)?;
        write_atomic(self.path(key), contents)?;
        Ok(())
    }

    pub fn write_json(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.write(key, &bytes)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        safe_remove(self.path(key))?;
        Ok(())
    }

    /// sha256 of the cached bytes, if present.
    pub fn sha256(&self, key: &str) -> Option<String> {
        self.read(key).map(|bytes| sha256_hex(&bytes))
    }
}

/// Cache key of a package's lazy metadata file. `~dev` companions keep
/// their suffix.
pub fn lazy_key(name: &str) -> String {
    format!("provider-{}.json", name.replace('/', "~"))
}

/// Cache key of a package's provider listing file.
pub fn provider_key(name: &str) -> String {
    format!("provider-{}.json", name.replace('/', "$"))
}

/// Cache key of a provider include file.
pub fn include_key(include: &str) -> String {
    let stem = include.replace("%hash%", "");
    let stem = stem.trim_end_matches(".json").replace(['/', '$'], "-");
    format!("p-{}.json", stem.trim_matches('-'))
}
