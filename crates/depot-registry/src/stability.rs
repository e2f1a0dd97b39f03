use std::{collections::BTreeMap, fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

static MODIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[._-]?(stable|beta|b|rc|alpha|a|patch|pl|p)((?:[.-]?\d+)*)?)?([.-]?dev)?$")
        .expect("valid stability regex")
});

/// Maturity of a version. Lower value means more mature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    #[serde(rename = "RC", alias = "rc")]
    Rc,
    Beta,
    Alpha,
    Dev,
}

impl Stability {
    pub const ALL: [Stability; 5] = [
        Stability::Stable,
        Stability::Rc,
        Stability::Beta,
        Stability::Alpha,
        Stability::Dev,
    ];

    pub fn value(self) -> u8 {
        match self {
            Self::Stable => 0,
            Self::Rc => 5,
            Self::Beta => 10,
            Self::Alpha => 15,
            Self::Dev => 20,
        }
    }

    /// Derives the stability from a version string, normalized or not.
    pub fn of_version(version: &str) -> Self {
        let version = version.trim();
        let version = version.split('#').next().unwrap_or(version).trim();
        let lower = version.to_ascii_lowercase();

        if lower.starts_with("dev-") || lower.ends_with("-dev") {
            return Self::Dev;
        }

        let Some(caps) = MODIFIER_RE.captures(&lower) else {
            return Self::Stable;
        };
        if caps.get(3).is_some() {
            return Self::Dev;
        }
        match caps.get(1).map(|m| m.as_str()) {
            Some("beta" | "b") => Self::Beta,
            Some("alpha" | "a") => Self::Alpha,
            Some("rc") => Self::Rc,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stable => "stable",
            Self::Rc => "RC",
            Self::Beta => "beta",
            Self::Alpha => "alpha",
            Self::Dev => "dev",
        };
        f.write_str(name)
    }
}

impl FromStr for Stability {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "rc" => Ok(Self::Rc),
            "beta" => Ok(Self::Beta),
            "alpha" => Ok(Self::Alpha),
            "dev" => Ok(Self::Dev),
            other => Err(RegistryError::InvalidVersion(format!("unknown stability '{other}'"))),
        }
    }
}

/// Which stabilities are acceptable, globally and per package name.
#[derive(Clone, Debug)]
pub struct StabilityPolicy {
    minimum: Stability,
    flags: BTreeMap<String, Stability>,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self::new(Stability::Stable)
    }
}

impl StabilityPolicy {
    pub fn new(minimum: Stability) -> Self {
        Self {
            minimum,
            flags: BTreeMap::new(),
        }
    }

    /// Policy accepting every stability.
    pub fn any() -> Self {
        Self::new(Stability::Dev)
    }

    pub fn with_flags(minimum: Stability, flags: BTreeMap<String, Stability>) -> Self {
        let flags = flags
            .into_iter()
            .map(|(name, stability)| (name.to_lowercase(), stability))
            .collect();
        Self {
            minimum,
            flags,
        }
    }

    pub fn minimum(&self) -> Stability {
        self.minimum
    }

    pub fn flags(&self) -> &BTreeMap<String, Stability> {
        &self.flags
    }

    /// A package is acceptable when, for any of its names, the stability
    /// is at least as mature as that name's flag, or the global minimum when
    /// the name has no flag.
    pub fn is_acceptable<S: AsRef<str>>(&self, names: &[S], stability: Stability) -> bool {
        names.iter().any(|name| {
            let threshold = self
                .flags
                .get(name.as_ref())
                .copied()
                .unwrap_or(self.minimum);
            stability.value() <= threshold.value()
        })
    }

    /// Whether dev versions of `name` could ever be accepted.
    pub fn allows_dev(&self, name: &str) -> bool {
        self.is_acceptable(&[name], Stability::Dev)
    }
}
