//! Version normalization and comparison.
//!
//! Normalized versions have four numeric components and an optional
//! modifier: `1.2.0.0`, `1.0.0.0-beta2`, `2.0.0.0-RC1`, `1.9999999.9999999.9999999-dev`
//! for branches, or `dev-<branch>` for named branches.

use std::{cmp::Ordering, sync::LazyLock};

use regex::Regex;

use crate::error::{RegistryError, Result};

const BRANCH_WILDCARD: &str = "9999999";

static CLASSIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^v?(\d{1,5})(\.\d+)?(\.\d+)?(\.\d+)?(?:[._-]?(stable|beta|b|rc|alpha|a|patch|pl|p)((?:[.-]?\d+)*)?)?([.-]?dev)?$",
    )
    .expect("valid version regex")
});

static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^v?(\d+)(\.(?:\d+|[xX*]))?(\.(?:\d+|[xX*]))?(\.(?:\d+|[xX*]))?$")
        .expect("valid branch regex")
});

/// Normalizes a version string.
pub fn normalize(version: &str) -> Result<String> {
    let trimmed = version.trim();
    let trimmed = trimmed.split('+').next().unwrap_or(trimmed);
    // strip " as 1.0" inline aliases and "#ref" suffixes
    let trimmed = trimmed
        .split(" as ")
        .next()
        .unwrap_or(trimmed)
        .split('#')
        .next()
        .unwrap_or(trimmed)
        .trim();

    if trimmed.is_empty() {
        return Err(RegistryError::InvalidVersion(version.to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    if let Some(branch) = lower.strip_prefix("dev-") {
        let start = trimmed.len() - branch.len();
        return Ok(format!("dev-{}", &trimmed[start..]));
    }
    if matches!(lower.as_str(), "master" | "trunk" | "default") {
        return Ok(format!("dev-{trimmed}"));
    }

    let Some(caps) = CLASSIC_RE.captures(trimmed) else {
        // "1.x-dev" style branch versions
        if let Some(branch) = lower.strip_suffix("-dev").map(|b| b.trim_end_matches('.')) {
            let normalized = normalize_branch(branch)?;
            if !normalized.starts_with("dev-") {
                return Ok(normalized);
            }
        }
        return Err(RegistryError::InvalidVersion(version.to_string()));
    };

    let mut out = caps[1].to_string();
    for index in 2..=4 {
        match caps.get(index) {
            Some(part) => out.push_str(part.as_str()),
            None => out.push_str(".0"),
        }
    }

    if let Some(modifier) = caps.get(5) {
        let modifier = match modifier.as_str().to_ascii_lowercase().as_str() {
            "stable" => None,
            "b" | "beta" => Some("beta"),
            "a" | "alpha" => Some("alpha"),
            "rc" => Some("RC"),
            _ => Some("patch"),
        };
        if let Some(modifier) = modifier {
            out.push('-');
            out.push_str(modifier);
            if let Some(number) = caps.get(6) {
                out.push_str(number.as_str().trim_start_matches(['.', '-']));
            }
        }
    }

    if caps.get(7).is_some() {
        out.push_str("-dev");
    }

    Ok(out)
}

/// Normalizes a branch name such as `1.x` or `2.3` into its dev version.
pub fn normalize_branch(branch: &str) -> Result<String> {
    let branch = branch.trim();
    let branch = branch.strip_suffix("-dev").unwrap_or(branch);

    let Some(caps) = BRANCH_RE.captures(branch) else {
        return Ok(format!("dev-{branch}"));
    };

    let mut parts = Vec::with_capacity(4);
    for index in 1..=4 {
        let part = caps
            .get(index)
            .map(|m| m.as_str().trim_start_matches('.'))
            .unwrap_or("x");
        if matches!(part, "x" | "X" | "*") {
            parts.push(BRANCH_WILDCARD.to_string());
        } else {
            parts.push(part.to_string());
        }
    }
    Ok(format!("{}-dev", parts.join(".")))
}

#[derive(Debug, PartialEq, Eq)]
struct VersionKey {
    numbers: Vec<u64>,
    rank: u8,
    modifier_number: u64,
}

fn modifier_rank(modifier: &str) -> u8 {
    match modifier {
        "dev" => 0,
        "alpha" => 1,
        "beta" => 2,
        "rc" => 3,
        "patch" => 5,
        _ => 4,
    }
}

fn parse_key(normalized: &str) -> Option<VersionKey> {
    if normalized.starts_with("dev-") {
        return None;
    }

    let lower = normalized.to_ascii_lowercase();
    let (base, modifier) = match lower.split_once('-') {
        Some((base, modifier)) => (base, Some(modifier)),
        None => (lower.as_str(), None),
    };

    let numbers = base
        .split('.')
        .map(|n| n.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    let (rank, modifier_number) = match modifier {
        None => (modifier_rank("stable"), 0),
        Some(m) if m.ends_with("dev") => (modifier_rank("dev"), 0),
        Some(m) => {
            let split = m.find(|c: char| c.is_ascii_digit()).unwrap_or(m.len());
            let (name, number) = m.split_at(split);
            let number = number
                .chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            (modifier_rank(name), number)
        }
    };

    Some(VersionKey {
        numbers,
        rank,
        modifier_number,
    })
}

/// Compares two normalized versions. Named branches (`dev-*`) only compare
/// equal to themselves and sort before numbered versions.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse_key(a), parse_key(b)) {
        (Some(a), Some(b)) => {
            let len = a.numbers.len().max(b.numbers.len());
            for i in 0..len {
                let x = a.numbers.get(i).copied().unwrap_or(0);
                let y = b.numbers.get(i).copied().unwrap_or(0);
                match x.cmp(&y) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.rank
                .cmp(&b.rank)
                .then(a.modifier_number.cmp(&b.modifier_number))
        }
        (None, None) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug)]
struct Term {
    op: Op,
    version: String,
}

/// Comparator range such as `>=1.0,<1.2.5|>=2.0,<2.1`.
///
/// `|`/`||` separate alternatives; `,` or whitespace joins comparators.
/// Terms that cannot be parsed match every version so that an unreadable
/// advisory range is reported rather than dropped.
#[derive(Clone, Debug)]
pub struct VersionRange {
    alternatives: Vec<Vec<Option<Term>>>,
}

impl VersionRange {
    pub fn parse(range: &str) -> Self {
        let alternatives = range
            .split('|')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(|alt| comparators(alt).iter().map(|t| parse_term(t)).collect())
            .collect();
        Self {
            alternatives,
        }
    }

    pub fn contains(&self, normalized: &str) -> bool {
        if self.alternatives.is_empty() {
            return true;
        }
        self.alternatives.iter().any(|terms| {
            terms.iter().all(|term| {
                match term {
                    None => true,
                    Some(term) => term_matches(term, normalized),
                }
            })
        })
    }
}

/// Splits one alternative into comparators, keeping a detached operator
/// (`>= 3.0`) with the version that follows it.
fn comparators(alt: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();
    for token in alt
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '!')) {
            pending.push_str(token);
            continue;
        }
        out.push(format!("{pending}{token}"));
        pending.clear();
    }
    if !pending.is_empty() {
        out.push(pending);
    }
    out
}

fn parse_term(raw: &str) -> Option<Term> {
    if raw == "*" {
        return None;
    }
    let (op, rest) = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        ("==", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ]
    .iter()
    .find_map(|(prefix, op)| raw.strip_prefix(prefix).map(|rest| (*op, rest)))
    .unwrap_or((Op::Eq, raw));

    let version = normalize(rest).ok()?;
    Some(Term {
        op,
        version,
    })
}

fn term_matches(term: &Term, normalized: &str) -> bool {
    if normalized.starts_with("dev-") || term.version.starts_with("dev-") {
        let equal = normalized == term.version;
        return match term.op {
            Op::Eq => equal,
            Op::Ne => !equal,
            _ => false,
        };
    }

    let ordering = compare(normalized, &term.version);
    match term.op {
        Op::Eq => ordering == Ordering::Equal,
        Op::Ne => ordering != Ordering::Equal,
        Op::Lt => ordering == Ordering::Less,
        Op::Le => ordering != Ordering::Greater,
        Op::Gt => ordering == Ordering::Greater,
        Op::Ge => ordering != Ordering::Less,
    }
}
