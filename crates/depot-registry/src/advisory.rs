//! Security advisories.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    constraint::Constraint,
    error::{RegistryError, Result},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorySource {
    pub name: String,
    pub remote_id: String,
}

/// Advisory with every field a report needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAdvisory {
    pub advisory_id: String,
    pub package_name: String,
    pub affected_versions: String,
    pub title: String,
    pub sources: Vec<AdvisorySource>,
    pub reported_at: String,
    pub cve: Option<String>,
    pub link: Option<String>,
    pub severity: Option<String>,
    pub composer_repository: Option<String>,
}

/// Advisory that only names the package and the affected range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSecurityAdvisory {
    pub advisory_id: String,
    pub package_name: String,
    pub affected_versions: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advisory {
    Full(SecurityAdvisory),
    Partial(PartialSecurityAdvisory),
}

impl Advisory {
    /// Parses one advisory entry reported by `source_name`.
    ///
    /// Entries missing report fields become [`Advisory::Partial`] when
    /// `allow_partial` is set and an `IncompleteAdvisory` error otherwise.
    pub fn parse(entry: &Value, package: &str, source_name: &str, allow_partial: bool) -> Result<Self> {
        if let Ok(full) = serde_json::from_value::<SecurityAdvisory>(entry.clone()) {
            return Ok(Self::Full(full));
        }

        let incomplete = || {
            RegistryError::IncompleteAdvisory {
                package: package.to_string(),
                source_name: source_name.to_string(),
            }
        };
        if !allow_partial {
            return Err(incomplete());
        }
        serde_json::from_value::<PartialSecurityAdvisory>(entry.clone())
            .map(Self::Partial)
            .map_err(|_| incomplete())
    }

    pub fn advisory_id(&self) -> &str {
        match self {
            Self::Full(a) => &a.advisory_id,
            Self::Partial(a) => &a.advisory_id,
        }
    }

    pub fn package_name(&self) -> &str {
        match self {
            Self::Full(a) => &a.package_name,
            Self::Partial(a) => &a.package_name,
        }
    }

    pub fn affected_versions(&self) -> &str {
        match self {
            Self::Full(a) => &a.affected_versions,
            Self::Partial(a) => &a.affected_versions,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Full(a) => Some(&a.title),
            Self::Partial(_) => None,
        }
    }

    pub fn affects(&self, constraint: &dyn Constraint) -> bool {
        constraint.intersects_range(self.affected_versions())
    }
}

/// Advisories keyed by package name.
pub type AdvisoryMap = BTreeMap<String, Vec<Advisory>>;

/// Constraints keyed by lowercase package name.
pub type ConstraintMap = BTreeMap<String, Box<dyn Constraint>>;

#[derive(Debug, Default)]
pub struct AdvisoryResult {
    /// Names the source had advisory data for, affected or not.
    pub names_found: Vec<String>,
    pub advisories: AdvisoryMap,
}

impl AdvisoryResult {
    pub fn merge(&mut self, other: AdvisoryResult) {
        for name in other.names_found {
            if !self.names_found.contains(&name) {
                self.names_found.push(name);
            }
        }
        for (name, list) in other.advisories {
            let entry = self.advisories.entry(name).or_default();
            for advisory in list {
                if !entry.iter().any(|a| a.advisory_id() == advisory.advisory_id()) {
                    entry.push(advisory);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.advisories.values().all(Vec::is_empty)
    }
}

/// Parses an advisory list for `package`, keeping entries that affect
/// `constraint`.
pub fn collect_advisories(
    entries: &[Value],
    package: &str,
    constraint: &dyn Constraint,
    source_name: &str,
    allow_partial: bool,
) -> Result<Vec<Advisory>> {
    let mut found = Vec::new();
    for entry in entries {
        let advisory = Advisory::parse(entry, package, source_name, allow_partial)?;
        if advisory.affects(constraint) {
            found.push(advisory);
        }
    }
    Ok(found)
}

/// Capability of sources that can report security advisories.
pub trait AdvisoryProvider {
    fn get_security_advisories(
        &self,
        packages: &ConstraintMap,
        allow_partial: bool,
    ) -> Result<AdvisoryResult>;
}
