use regex::{Regex, RegexBuilder};

use crate::error::{PatternError, PatternResult};

/// Converts a package name pattern into a regular expression fragment.
///
/// `*` matches any sequence of characters; everything else is literal.
///
/// # Examples
///
/// ```
/// use depot_utils::pattern::package_name_to_regex;
///
/// assert_eq!(package_name_to_regex("acme/*"), "acme/.*");
/// assert_eq!(package_name_to_regex("a.b/c"), r"a\.b/c");
/// ```
pub fn package_name_to_regex(pattern: &str) -> String {
    pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

/// A compiled set of package name patterns, matched case-insensitively as a whole.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    regex: Regex,
}

impl NamePatterns {
    /// Compiles `patterns` into a single anchored alternation.
    ///
    /// # Errors
    ///
    /// * [`PatternError::Invalid`] if the combined expression is rejected by the regex engine.
    pub fn new<T: AsRef<str>>(patterns: &[T]) -> PatternResult<Self> {
        let alternation = patterns
            .iter()
            .map(|p| package_name_to_regex(p.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let source = format!("^(?:{alternation})$");

        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|err| {
                PatternError::Invalid {
                    pattern: source.clone(),
                    reason: err.to_string(),
                }
            })?;

        Ok(Self {
            regex,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_patterns_wildcards() {
        let patterns = NamePatterns::new(&["acme/*", "symfony/polyfill-*"]).unwrap();
        assert!(patterns.is_match("acme/foo"));
        assert!(patterns.is_match("ACME/Bar"));
        assert!(patterns.is_match("symfony/polyfill-mbstring"));
        assert!(!patterns.is_match("symfony/console"));
        assert!(!patterns.is_match("xacme/foo"));
    }

    #[test]
    fn test_name_patterns_literal() {
        let patterns = NamePatterns::new(&["vendor/pkg.name"]).unwrap();
        assert!(patterns.is_match("vendor/pkg.name"));
        assert!(!patterns.is_match("vendor/pkgxname"));
    }

    #[test]
    fn test_empty_patterns_match_nothing_but_empty() {
        let patterns = NamePatterns::new::<&str>(&[]).unwrap();
        assert!(!patterns.is_match("acme/foo"));
    }
}
