//! Building pools from requirements.

use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
    sync::Arc,
};

use depot_registry::{
    AlreadyLoaded, Constraint, NameRequest, Package, Repository, Stability, StabilityPolicy,
};
use tracing::debug;

use crate::{error::Result, pool::Pool, request::Request};

/// A root-level version alias: `package` at `version` is also known as
/// `alias`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootAlias {
    pub package: String,
    /// Normalized version being aliased.
    pub version: String,
    pub alias: String,
    pub alias_normalized: String,
}

/// What a [`PoolBuilder`] may draw from.
pub struct PoolContext<'a> {
    pub repositories: &'a [Rc<dyn Repository>],
    pub policy: &'a StabilityPolicy,
    pub root_aliases: &'a [RootAlias],
    /// Source references pinned by the root package, by package name.
    pub root_references: &'a BTreeMap<String, String>,
}

impl PoolContext<'_> {
    /// Adds `package` and any root alias of it to `pool`. Dev versions
    /// pinned by a root reference get that reference.
    pub fn add_to_pool(&self, pool: &mut Pool, package: Arc<Package>) {
        let package = self.pin_reference(package);
        pool.add(Arc::clone(&package));
        if package.is_alias() {
            return;
        }
        for alias in self
            .root_aliases
            .iter()
            .filter(|a| a.package == package.name && a.version == package.normalized_version)
        {
            pool.add(Arc::new(Package::alias(
                Arc::clone(&package),
                &alias.alias,
                &alias.alias_normalized,
            )));
        }
    }
}

impl PoolContext<'_> {
    fn pin_reference(&self, package: Arc<Package>) -> Arc<Package> {
        if package.is_alias() || package.stability != Stability::Dev {
            return package;
        }
        let Some(reference) = self.root_references.get(&package.name) else {
            return package;
        };
        let mut pinned = (*package).clone();
        if let Some(dist) = &mut pinned.dist {
            dist.reference = Some(reference.clone());
        }
        Arc::new(pinned)
    }
}

pub trait PoolBuilder {
    fn build_pool(&mut self, context: &PoolContext<'_>, request: &Request) -> Result<Pool>;
}

/// Names that refer to the platform rather than to packages.
fn is_platform(name: &str) -> bool {
    !name.contains('/')
}

/// Loads the requested names, then follows `require` links breadth-first.
///
/// Each round of newly discovered names is loaded in one batch per
/// repository. A repository that hosts a name hides it from later
/// repositories. Transitive requirements are loaded without a version
/// constraint.
#[derive(Debug, Default)]
pub struct RequirementPoolBuilder {
    rounds: usize,
}

impl RequirementPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of load rounds the last build took.
    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

impl PoolBuilder for RequirementPoolBuilder {
    fn build_pool(&mut self, context: &PoolContext<'_>, request: &Request) -> Result<Pool> {
        let mut pool = Pool::new();
        let mut loaded = AlreadyLoaded::new();
        let mut seen_names: BTreeSet<String> = BTreeSet::new();
        self.rounds = 0;

        for package in request.fixed_packages() {
            for name in package.names() {
                seen_names.insert(name);
            }
            context.add_to_pool(&mut pool, Arc::clone(package));
        }

        let mut round: BTreeMap<String, Option<&dyn Constraint>> = BTreeMap::new();
        for (name, constraint) in request.requires() {
            if !request.is_fixed(name) && !is_platform(name) && seen_names.insert(name.to_string()) {
                round.insert(name.to_string(), constraint);
            }
        }

        while !round.is_empty() {
            self.rounds += 1;
            debug!(round = self.rounds, "loading {} names", round.len());

            let mut remaining: Vec<NameRequest<'_>> = round
                .iter()
                .map(|(name, constraint)| (name.as_str(), *constraint))
                .collect();
            let mut discovered: Vec<Arc<Package>> = Vec::new();

            for repository in context.repositories {
                if remaining.is_empty() {
                    break;
                }
                let result = repository.load_packages(&remaining, context.policy, &loaded)?;
                for package in result.packages {
                    if !package.is_alias() {
                        loaded
                            .entry(package.name.clone())
                            .or_default()
                            .insert(package.normalized_version.clone());
                    }
                    discovered.push(Arc::clone(&package));
                    context.add_to_pool(&mut pool, package);
                }
                remaining.retain(|(name, _)| !result.names_found.contains(*name));
            }

            let mut next = BTreeMap::new();
            for package in discovered {
                for name in package.requires.keys() {
                    if is_platform(name) || request.is_fixed(name) {
                        continue;
                    }
                    if seen_names.insert(name.clone()) {
                        next.insert(name.clone(), None);
                    }
                }
            }
            round = next;
        }

        Ok(pool)
    }
}
