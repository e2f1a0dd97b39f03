use std::{collections::BTreeMap, sync::Arc};

use depot_registry::{Constraint, Package};

/// What a resolution must satisfy: root requirements plus packages that are
/// fixed in place (e.g. the root package or locked platform packages).
#[derive(Debug, Default)]
pub struct Request {
    requires: BTreeMap<String, Option<Box<dyn Constraint>>>,
    fixed: Vec<Arc<Package>>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, name: &str, constraint: Option<Box<dyn Constraint>>) -> &mut Self {
        self.requires.insert(name.to_lowercase(), constraint);
        self
    }

    /// Fixes `package`: it is always in the pool and its name is never
    /// loaded from repositories.
    pub fn fix(&mut self, package: Arc<Package>) -> &mut Self {
        self.fixed.push(package);
        self
    }

    pub fn requires(&self) -> impl Iterator<Item = (&str, Option<&dyn Constraint>)> {
        self.requires
            .iter()
            .map(|(name, constraint)| (name.as_str(), constraint.as_deref()))
    }

    pub fn fixed_packages(&self) -> &[Arc<Package>] {
        &self.fixed
    }

    pub fn is_fixed(&self, name: &str) -> bool {
        self.fixed.iter().any(|p| p.names().iter().any(|n| n == name))
    }
}
