//! The repository abstraction shared by every package source.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    advisory::AdvisoryProvider,
    constraint::Constraint,
    error::Result,
    package::Package,
    stability::StabilityPolicy,
};

/// Normalized versions already loaded per package name during one resolution.
pub type AlreadyLoaded = BTreeMap<String, BTreeSet<String>>;

/// One name to load, with an optional constraint.
pub type NameRequest<'a> = (&'a str, Option<&'a dyn Constraint>);

#[derive(Debug, Default)]
pub struct LoadResult {
    /// Names the repository hosts, whether or not any version was accepted.
    pub names_found: BTreeSet<String>,
    pub packages: Vec<Arc<Package>>,
}

/// Summary of a package that provides a virtual name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: String,
    pub description: Option<String>,
    pub kind: Option<String>,
}

pub trait Repository {
    fn name(&self) -> &str;

    /// Loads acceptable versions of every requested name in one batch.
    fn load_packages(
        &self,
        names: &[NameRequest<'_>],
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
    ) -> Result<LoadResult>;

    /// Every version of `name` matching `constraint`, regardless of stability.
    fn find_packages(
        &self,
        name: &str,
        constraint: Option<&dyn Constraint>,
    ) -> Result<Vec<Arc<Package>>> {
        let result = self.load_packages(
            &[(name, constraint)],
            &StabilityPolicy::any(),
            &AlreadyLoaded::new(),
        )?;
        Ok(result.packages)
    }

    /// Every package the repository hosts.
    fn get_packages(&self) -> Result<Vec<Arc<Package>>>;

    fn get_providers(&self, _name: &str) -> Result<Vec<ProviderInfo>> {
        Ok(Vec::new())
    }

    fn advisories(&self) -> Option<&dyn AdvisoryProvider> {
        None
    }

    fn is_installed(&self) -> bool {
        false
    }
}

/// Applies version acceptance to the candidates of one name.
///
/// A candidate is accepted when its normalized version is not already
/// loaded, its stability passes `policy`, and `constraint` (if any) matches
/// either its own normalized version or one of its branch aliases. Accepted
/// packages are followed by their branch alias packages.
pub fn accept_candidates(
    candidates: impl IntoIterator<Item = Arc<Package>>,
    constraint: Option<&dyn Constraint>,
    policy: &StabilityPolicy,
    already_loaded: Option<&BTreeSet<String>>,
) -> Vec<Arc<Package>> {
    let mut accepted = Vec::new();

    for package in candidates {
        if already_loaded.is_some_and(|seen| seen.contains(&package.normalized_version)) {
            continue;
        }
        if !policy.is_acceptable(&package.names(), package.stability) {
            continue;
        }

        let aliases = package.branch_aliases();
        let matches = match constraint {
            None => true,
            Some(constraint) => {
                constraint.matches_version(&package.normalized_version)
                    || aliases
                        .iter()
                        .any(|(_, normalized)| constraint.matches_version(normalized))
            }
        };
        if !matches {
            continue;
        }

        let alias_packages: Vec<_> = aliases
            .iter()
            .map(|(pretty, normalized)| {
                Arc::new(Package::alias(Arc::clone(&package), pretty, normalized))
            })
            .collect();
        accepted.push(package);
        accepted.extend(alias_packages);
    }

    accepted
}

/// Repository over an in-memory package list.
#[derive(Debug, Default)]
pub struct ArrayRepository {
    name: String,
    packages: Vec<Arc<Package>>,
}

impl ArrayRepository {
    pub fn new(name: impl Into<String>, packages: Vec<Package>) -> Self {
        Self {
            name: name.into(),
            packages: packages.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn add_package(&mut self, package: Package) {
        self.packages.push(Arc::new(package));
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn candidates<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Arc<Package>> + 'a {
        self.packages
            .iter()
            .filter(move |p| p.name == name)
            .cloned()
    }
}

impl Repository for ArrayRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_packages(
        &self,
        names: &[NameRequest<'_>],
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
    ) -> Result<LoadResult> {
        let mut result = LoadResult::default();
        for (name, constraint) in names {
            let name = name.to_lowercase();
            if self.candidates(&name).next().is_none() {
                continue;
            }
            result.names_found.insert(name.clone());
            result.packages.extend(accept_candidates(
                self.candidates(&name),
                *constraint,
                policy,
                already_loaded.get(&name),
            ));
        }
        Ok(result)
    }

    fn get_packages(&self) -> Result<Vec<Arc<Package>>> {
        Ok(accept_candidates(
            self.packages.iter().cloned(),
            None,
            &StabilityPolicy::any(),
            None,
        ))
    }

    fn get_providers(&self, name: &str) -> Result<Vec<ProviderInfo>> {
        let name = name.to_lowercase();
        let mut seen = BTreeSet::new();
        Ok(self
            .packages
            .iter()
            .filter(|p| p.provides.contains_key(&name))
            .filter(|p| seen.insert(p.name.clone()))
            .map(|p| {
                ProviderInfo {
                    name: p.pretty_name.clone(),
                    description: p.description.clone(),
                    kind: p.kind.clone(),
                }
            })
            .collect())
    }
}

/// Packages already installed in a project.
#[derive(Debug, Default)]
pub struct InstalledRepository {
    inner: ArrayRepository,
}

impl InstalledRepository {
    pub fn new(packages: Vec<Package>) -> Self {
        Self {
            inner: ArrayRepository::new("installed", packages),
        }
    }
}

impl Repository for InstalledRepository {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn load_packages(
        &self,
        names: &[NameRequest<'_>],
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
    ) -> Result<LoadResult> {
        self.inner.load_packages(names, policy, already_loaded)
    }

    fn get_packages(&self) -> Result<Vec<Arc<Package>>> {
        self.inner.get_packages()
    }

    fn get_providers(&self, name: &str) -> Result<Vec<ProviderInfo>> {
        self.inner.get_providers(name)
    }

    fn is_installed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{constraint::ExactVersion, stability::Stability};

    fn package(name: &str, version: &str) -> Package {
        Package::from_json(&json!({"name": name, "version": version}), "test").unwrap()
    }

    fn repo() -> ArrayRepository {
        let mut dev = Package::from_json(
            &json!({
                "name": "acme/foo",
                "version": "dev-main",
                "extra": {"branch-alias": {"dev-main": "2.x-dev"}},
            }),
            "test",
        )
        .unwrap();
        dev.description = Some("Foo".into());
        ArrayRepository::new(
            "test",
            vec![
                package("acme/foo", "1.0.0"),
                package("acme/foo", "1.1.0-beta1"),
                dev,
                package("acme/bar", "3.0.0"),
            ],
        )
    }

    #[test]
    fn test_stability_filter() {
        let result = repo()
            .load_packages(
                &[("acme/foo", None)],
                &StabilityPolicy::new(Stability::Stable),
                &AlreadyLoaded::new(),
            )
            .unwrap();
        let versions: Vec<_> = result.packages.iter().map(|p| p.version.as_str()).collect();
        assert_eq!(versions, vec!["1.0.0"]);
        assert!(result.names_found.contains("acme/foo"));
    }

    #[test]
    fn test_names_found_without_acceptance() {
        let constraint = ExactVersion::new("9.0.0").unwrap();
        let result = repo()
            .load_packages(
                &[("acme/bar", Some(&constraint)), ("acme/missing", None)],
                &StabilityPolicy::any(),
                &AlreadyLoaded::new(),
            )
            .unwrap();
        assert!(result.packages.is_empty());
        assert_eq!(result.names_found.len(), 1);
        assert!(result.names_found.contains("acme/bar"));
    }

    #[test]
    fn test_already_loaded_skipped() {
        let mut loaded = AlreadyLoaded::new();
        loaded
            .entry("acme/foo".into())
            .or_default()
            .insert("1.0.0.0".into());
        let result = repo()
            .load_packages(
                &[("acme/foo", None)],
                &StabilityPolicy::new(Stability::Beta),
                &loaded,
            )
            .unwrap();
        let versions: Vec<_> = result.packages.iter().map(|p| p.version.as_str()).collect();
        assert_eq!(versions, vec!["1.1.0-beta1"]);
    }

    #[test]
    fn test_branch_alias_matches_constraint() {
        let constraint = ExactVersion::new("2.x-dev").unwrap();
        let found = repo().find_packages("acme/foo", Some(&constraint)).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].version, "dev-main");
        assert!(!found[0].is_alias());
        assert_eq!(found[1].version, "2.x-dev");
        assert_eq!(found[1].alias_of.as_ref().unwrap().version, "dev-main");
    }

    #[test]
    fn test_get_packages_includes_aliases() {
        let all = repo().get_packages().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all.iter().filter(|p| p.is_alias()).count(), 1);
    }

    #[test]
    fn test_providers() {
        let mut impl_pkg = package("acme/logger", "1.0.0");
        impl_pkg.provides.insert("psr/log-implementation".into(), "1.0".into());
        let repo = ArrayRepository::new("test", vec![impl_pkg.clone(), {
            let mut second = impl_pkg;
            second.version = "1.1.0".into();
            second
        }]);

        let providers = repo.get_providers("PSR/log-implementation").unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "acme/logger");
    }

    #[test]
    fn test_installed_flag() {
        assert!(InstalledRepository::new(vec![]).is_installed());
        assert!(!repo().is_installed());
    }
}
