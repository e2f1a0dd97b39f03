//! The set of package versions a solver may choose from.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use depot_registry::{Constraint, Package};

/// Position of a package within its [`Pool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(usize);

impl PackageId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Package versions loaded for one resolution.
///
/// Each `(name, normalized version, alias)` identity appears at most once.
/// Packages are indexed by every name they answer to, so provided and
/// replaced names resolve to their providers.
#[derive(Debug, Default)]
pub struct Pool {
    packages: Vec<Arc<Package>>,
    by_name: BTreeMap<String, Vec<PackageId>>,
    seen: BTreeSet<(String, String, bool)>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `package` unless an identical one is already present.
    pub fn add(&mut self, package: Arc<Package>) -> Option<PackageId> {
        let identity = (
            package.name.clone(),
            package.normalized_version.clone(),
            package.is_alias(),
        );
        if !self.seen.insert(identity) {
            return None;
        }

        let id = PackageId(self.packages.len());
        for name in package.names() {
            let ids = self.by_name.entry(name).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.packages.push(package);
        Some(id)
    }

    pub fn get(&self, id: PackageId) -> Option<&Arc<Package>> {
        self.packages.get(id.0)
    }

    pub fn packages(&self) -> &[Arc<Package>] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains(&self, name: &str, normalized_version: &str) -> bool {
        self.seen
            .iter()
            .any(|(n, v, _)| n == name && v == normalized_version)
    }

    /// Packages answering to `name` whose version matches `constraint`.
    ///
    /// Providers and replacers are returned regardless of their own
    /// version.
    pub fn what_provides(&self, name: &str, constraint: Option<&dyn Constraint>) -> Vec<&Arc<Package>> {
        let name = name.to_lowercase();
        self.by_name
            .get(&name)
            .into_iter()
            .flatten()
            .filter_map(|id| self.packages.get(id.0))
            .filter(|package| {
                package.name != name
                    || constraint.is_none_or(|c| c.matches_version(&package.normalized_version))
            })
            .collect()
    }
}
