//! Package versions as loaded from repositories.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{RegistryError, Result},
    stability::Stability,
    version::normalize,
};

/// Archive location of a package version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub reference: Option<String>,
    pub shasum: Option<String>,
}

/// One version of a package.
#[derive(Clone, Debug)]
pub struct Package {
    /// Lowercase canonical name.
    pub name: String,
    pub pretty_name: String,
    pub version: String,
    pub normalized_version: String,
    pub stability: Stability,
    /// Name of the repository the package was loaded from.
    pub repository: String,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub requires: BTreeMap<String, String>,
    pub provides: BTreeMap<String, String>,
    pub replaces: BTreeMap<String, String>,
    pub dist: Option<Dist>,
    pub extra: Value,
    /// Set on alias packages; points at the aliased package.
    pub alias_of: Option<Arc<Package>>,
}

fn string_map(entry: &Value, key: &str) -> BTreeMap<String, String> {
    entry
        .get(key)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.to_lowercase(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn opt_string(entry: &Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl Package {
    /// Builds a package from one version entry of a metadata file.
    pub fn from_json(entry: &Value, repository: &str) -> Result<Self> {
        let pretty_name = opt_string(entry, "name")
            .ok_or_else(|| RegistryError::InvalidPackage("entry without a name".into()))?;
        let version = opt_string(entry, "version").ok_or_else(|| {
            RegistryError::InvalidPackage(format!("{pretty_name}: entry without a version"))
        })?;
        let normalized_version = match opt_string(entry, "version_normalized") {
            Some(normalized) => normalized,
            None => normalize(&version)?,
        };

        let dist = entry
            .get("dist")
            .filter(|d| d.is_object())
            .and_then(|d| serde_json::from_value::<Dist>(d.clone()).ok());

        Ok(Self {
            name: pretty_name.to_lowercase(),
            stability: Stability::of_version(&version),
            pretty_name,
            version,
            normalized_version,
            repository: repository.to_string(),
            description: opt_string(entry, "description"),
            kind: opt_string(entry, "type"),
            requires: string_map(entry, "require"),
            provides: string_map(entry, "provide"),
            replaces: string_map(entry, "replace"),
            dist,
            extra: entry.get("extra").cloned().unwrap_or(Value::Null),
            alias_of: None,
        })
    }

    /// Branch aliases declared in `extra.branch-alias` for this version, as
    /// `(pretty, normalized)` pairs. Only dev versions carry aliases.
    pub fn branch_aliases(&self) -> Vec<(String, String)> {
        if self.stability != Stability::Dev {
            return Vec::new();
        }
        let Some(aliases) = self.extra.get("branch-alias").and_then(Value::as_object) else {
            return Vec::new();
        };

        aliases
            .iter()
            .filter(|(source, _)| source.eq_ignore_ascii_case(&self.version))
            .filter_map(|(_, target)| target.as_str())
            .filter_map(|target| {
                let normalized = normalize(target).ok()?;
                // an alias must itself be a dev version of a numbered branch
                normalized
                    .ends_with("-dev")
                    .then(|| (target.to_string(), normalized))
            })
            .collect()
    }

    /// Creates an alias of `target` carrying `version`.
    pub fn alias(target: Arc<Package>, version: &str, normalized_version: &str) -> Self {
        Self {
            version: version.to_string(),
            normalized_version: normalized_version.to_string(),
            stability: Stability::of_version(version),
            alias_of: Some(Arc::clone(&target)),
            ..(*target).clone()
        }
    }

    pub fn is_alias(&self) -> bool {
        self.alias_of.is_some()
    }

    /// Names this package answers to: its own plus provided and replaced
    /// names.
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        names.extend(self.provides.keys().cloned());
        names.extend(self.replaces.keys().cloned());
        names
    }

    /// Identity within one resolution.
    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.normalized_version.clone())
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias_of {
            Some(target) => {
                write!(
                    f,
                    "{} {} (alias of {})",
                    self.pretty_name, self.version, target.version
                )
            }
            None => write!(f, "{} {}", self.pretty_name, self.version),
        }
    }
}
