use std::fmt;

use crate::{
    error::Result,
    version::{normalize, VersionRange},
};

/// Version constraint as seen by repositories.
///
/// Full constraint parsing lives with the solver; repositories only need to
/// ask whether a normalized version is allowed and whether an advisory's
/// affected range overlaps the constraint.
pub trait Constraint: fmt::Debug {
    fn matches_version(&self, normalized: &str) -> bool;

    /// Whether any version allowed by this constraint lies in `range`.
    fn intersects_range(&self, range: &str) -> bool;

    fn pretty(&self) -> String;
}

/// Matches every version.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyVersion;

impl Constraint for AnyVersion {
    fn matches_version(&self, _normalized: &str) -> bool {
        true
    }

    fn intersects_range(&self, _range: &str) -> bool {
        true
    }

    fn pretty(&self) -> String {
        "*".to_string()
    }
}

/// Matches exactly one normalized version.
#[derive(Clone, Debug)]
pub struct ExactVersion {
    pretty: String,
    normalized: String,
}

impl ExactVersion {
    pub fn new(version: &str) -> Result<Self> {
        Ok(Self {
            pretty: version.trim().to_string(),
            normalized: normalize(version)?,
        })
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

impl Constraint for ExactVersion {
    fn matches_version(&self, normalized: &str) -> bool {
        self.normalized == normalized
    }

    fn intersects_range(&self, range: &str) -> bool {
        VersionRange::parse(range).contains(&self.normalized)
    }

    fn pretty(&self) -> String {
        self.pretty.clone()
    }
}

/// Parses `*`/empty as [`AnyVersion`] and anything else as [`ExactVersion`].
pub fn parse_constraint(input: &str) -> Result<Box<dyn Constraint>> {
    let input = input.trim();
    if input.is_empty() || input == "*" {
        return Ok(Box::new(AnyVersion));
    }
    Ok(Box::new(ExactVersion::new(input)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_version() {
        let c = ExactVersion::new("v1.2").unwrap();
        assert!(c.matches_version("1.2.0.0"));
        assert!(!c.matches_version("1.2.1.0"));
        assert!(c.intersects_range(">=1.0,<1.3"));
        assert!(!c.intersects_range(">=1.3"));
        assert_eq!(c.pretty(), "v1.2");
    }

    #[test]
    fn test_any_version() {
        assert!(AnyVersion.matches_version("dev-main"));
        assert!(AnyVersion.intersects_range("<0.1"));
    }

    #[test]
    fn test_parse_constraint() {
        assert_eq!(parse_constraint("*").unwrap().pretty(), "*");
        assert!(parse_constraint("2.0.0").unwrap().matches_version("2.0.0.0"));
        assert!(parse_constraint("not a version").is_err());
    }
}
