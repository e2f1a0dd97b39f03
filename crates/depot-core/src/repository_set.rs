//! An ordered set of repositories queried as one.

use std::{
    collections::BTreeMap,
    ops::BitOr,
    rc::Rc,
    sync::Arc,
};

use depot_config::config::Config;
use depot_dl::Loop;
use depot_events::EventSinkHandle;
use depot_registry::{
    AdvisoryResult, ComposerRepository, Constraint, ConstraintMap, Package, ProviderInfo,
    Repository, Stability, StabilityPolicy,
};
use tracing::{debug, info};

use crate::{
    error::{CoreError, Result},
    pool::Pool,
    pool_builder::{PoolBuilder, PoolContext, RootAlias},
    request::Request,
};

/// Options for [`RepositorySet::find_packages`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FindFlags(u8);

impl FindFlags {
    pub const NONE: Self = Self(0);
    /// Collect matches from every repository instead of stopping at the
    /// first one hosting the name.
    pub const ALLOW_SHADOWED: Self = Self(1);
    /// Skip stability filtering.
    pub const ALLOW_ANY_STABILITY: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FindFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Capabilities recorded when a repository is added.
#[derive(Clone, Copy, Debug)]
struct Capabilities {
    advisories: bool,
    installed: bool,
}

pub struct RepositorySet {
    repositories: Vec<Rc<dyn Repository>>,
    capabilities: Vec<Capabilities>,
    policy: StabilityPolicy,
    root_aliases: Vec<RootAlias>,
    /// Source references pinned by the root package, by package name.
    root_references: BTreeMap<String, String>,
    locked: bool,
    allow_installed: bool,
}

impl Default for RepositorySet {
    fn default() -> Self {
        Self::new(StabilityPolicy::default())
    }
}

impl RepositorySet {
    pub fn new(policy: StabilityPolicy) -> Self {
        Self {
            repositories: Vec::new(),
            capabilities: Vec::new(),
            policy,
            root_aliases: Vec::new(),
            root_references: BTreeMap::new(),
            locked: false,
            allow_installed: false,
        }
    }

    /// A set over every enabled repository of `config`, in configured
    /// order.
    pub fn from_config(
        config: &Config,
        event_loop: Rc<Loop>,
        events: EventSinkHandle,
    ) -> Result<Self> {
        let minimum: Stability = config.minimum_stability().parse()?;
        let mut set = Self::new(StabilityPolicy::new(minimum));
        let cache_dir = config.cache_dir();

        for repository in config.enabled_repositories() {
            let composer = ComposerRepository::new(
                repository.clone(),
                Rc::clone(&event_loop),
                &cache_dir,
                Arc::clone(&events),
            )?;
            set.add_repository(Rc::new(composer))?;
        }
        Ok(set)
    }

    /// Appends `repository`; earlier repositories shadow later ones.
    pub fn add_repository(&mut self, repository: Rc<dyn Repository>) -> Result<()> {
        self.ensure_unlocked()?;
        debug!("adding repository '{}'", repository.name());
        self.capabilities.push(Capabilities {
            advisories: repository.advisories().is_some(),
            installed: repository.is_installed(),
        });
        self.repositories.push(repository);
        Ok(())
    }

    pub fn repositories(&self) -> &[Rc<dyn Repository>] {
        &self.repositories
    }

    pub fn policy(&self) -> &StabilityPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: StabilityPolicy) -> Result<()> {
        self.ensure_unlocked()?;
        self.policy = policy;
        Ok(())
    }

    pub fn add_root_alias(&mut self, alias: RootAlias) -> Result<()> {
        self.ensure_unlocked()?;
        self.root_aliases.push(alias);
        Ok(())
    }

    pub fn set_root_reference(&mut self, package: &str, reference: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.root_references
            .insert(package.to_lowercase(), reference.to_string());
        Ok(())
    }

    pub fn root_reference(&self, package: &str) -> Option<&str> {
        self.root_references.get(package).map(String::as_str)
    }

    pub fn allow_installed_repositories(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.allow_installed = true;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Once a pool has been built the set is frozen.
    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(CoreError::Locked);
        }
        Ok(())
    }

    /// Versions of `name` matching `constraint`.
    ///
    /// By default the first repository hosting `name` answers alone and
    /// loads with the set's stability policy. With
    /// [`FindFlags::ALLOW_SHADOWED`] every repository is asked and the
    /// combined result is filtered by stability afterwards.
    pub fn find_packages(
        &self,
        name: &str,
        constraint: Option<&dyn Constraint>,
        flags: FindFlags,
    ) -> Result<Vec<Arc<Package>>> {
        let name = name.to_lowercase();
        let any_stability = flags.contains(FindFlags::ALLOW_ANY_STABILITY);
        let mut found = Vec::new();

        if flags.contains(FindFlags::ALLOW_SHADOWED) {
            for repository in &self.repositories {
                found.extend(repository.find_packages(&name, constraint)?);
            }
            if !any_stability {
                found.retain(|package| self.policy.is_acceptable(&package.names(), package.stability));
            }
            return Ok(found);
        }

        let policy = if any_stability {
            StabilityPolicy::any()
        } else {
            self.policy.clone()
        };
        for repository in &self.repositories {
            let result = repository.load_packages(
                &[(name.as_str(), constraint)],
                &policy,
                &Default::default(),
            )?;
            found.extend(result.packages);
            if result.names_found.contains(&name) {
                debug!("'{}' found in '{}', skipping later repositories", name, repository.name());
                break;
            }
        }
        Ok(found)
    }

    /// Locks the set and builds a pool for `request` with `builder`.
    pub fn build_pool(&mut self, request: &Request, builder: &mut dyn PoolBuilder) -> Result<Pool> {
        if !self.allow_installed {
            if let Some(index) = self.capabilities.iter().position(|c| c.installed) {
                return Err(CoreError::InstalledRepository(
                    self.repositories[index].name().to_string(),
                ));
            }
        }
        self.locked = true;

        let context = PoolContext {
            repositories: &self.repositories,
            policy: &self.policy,
            root_aliases: &self.root_aliases,
            root_references: &self.root_references,
        };
        let pool = builder.build_pool(&context, request)?;
        info!("pool built with {} packages", pool.len());
        Ok(pool)
    }

    /// Locks the set and builds a pool of every package of every
    /// repository, plus root aliases.
    ///
    /// Only suitable for small, fully enumerable repositories.
    pub fn build_pool_with_all_packages(&mut self) -> Result<Pool> {
        self.locked = true;

        let context = PoolContext {
            repositories: &self.repositories,
            policy: &self.policy,
            root_aliases: &self.root_aliases,
            root_references: &self.root_references,
        };
        let mut pool = Pool::new();
        for repository in &self.repositories {
            for package in repository.get_packages()? {
                context.add_to_pool(&mut pool, package);
            }
        }
        Ok(pool)
    }

    /// Advisories for the given packages from every repository that
    /// reports them.
    pub fn get_security_advisories(
        &self,
        packages: &ConstraintMap,
        allow_partial: bool,
    ) -> Result<AdvisoryResult> {
        let mut result = AdvisoryResult::default();
        for (repository, capabilities) in self.repositories.iter().zip(&self.capabilities) {
            if !capabilities.advisories {
                continue;
            }
            if let Some(provider) = repository.advisories() {
                result.merge(provider.get_security_advisories(packages, allow_partial)?);
            }
        }
        Ok(result)
    }

    /// Providers of `name` across all repositories, first occurrence of
    /// each provider name wins.
    pub fn get_providers(&self, name: &str) -> Result<Vec<ProviderInfo>> {
        let mut providers: Vec<ProviderInfo> = Vec::new();
        for repository in &self.repositories {
            for provider in repository.get_providers(name)? {
                if !providers.iter().any(|p| p.name == provider.name) {
                    providers.push(provider);
                }
            }
        }
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use depot_registry::{ArrayRepository, InstalledRepository};
    use serde_json::json;

    use super::*;

    fn package(name: &str, version: &str, repository: &str) -> Package {
        Package::from_json(&json!({"name": name, "version": version}), repository).unwrap()
    }

    #[test]
    fn test_flags() {
        let both = FindFlags::ALLOW_SHADOWED | FindFlags::ALLOW_ANY_STABILITY;
        assert!(both.contains(FindFlags::ALLOW_SHADOWED));
        assert!(!FindFlags::NONE.contains(FindFlags::ALLOW_SHADOWED));
    }

    #[test]
    fn test_installed_repository_rejected() {
        let mut set = RepositorySet::default();
        set.add_repository(Rc::new(InstalledRepository::new(vec![])))
            .unwrap();

        let err = set
            .build_pool(&Request::new(), &mut crate::RequirementPoolBuilder::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InstalledRepository(_)));
        assert!(!set.is_locked());

        set.allow_installed_repositories().unwrap();
        set.build_pool(&Request::new(), &mut crate::RequirementPoolBuilder::new())
            .unwrap();
        assert!(set.is_locked());
    }

    #[test]
    fn test_build_pool_with_all_packages() {
        let mut set = RepositorySet::default();
        set.add_repository(Rc::new(ArrayRepository::new(
            "a",
            vec![package("acme/foo", "1.0.0", "a"), package("acme/foo", "dev-main", "a")],
        )))
        .unwrap();
        set.add_root_alias(RootAlias {
            package: "acme/foo".into(),
            version: "1.0.0.0".into(),
            alias: "1.0.1".into(),
            alias_normalized: "1.0.1.0".into(),
        })
        .unwrap();

        let pool = set.build_pool_with_all_packages().unwrap();
        assert_eq!(pool.len(), 3);
        assert!(set.is_locked());
        assert!(matches!(
            set.add_repository(Rc::new(ArrayRepository::default())),
            Err(CoreError::Locked)
        ));
    }

    #[test]
    fn test_root_reference() {
        let mut set = RepositorySet::default();
        set.set_root_reference("Acme/Foo", "abc123").unwrap();
        assert_eq!(set.root_reference("acme/foo"), Some("abc123"));
    }
}
