use std::{env, path::PathBuf};

/// Returns the user's home directory.
///
/// Reads `HOME`, falling back to `/tmp` when it is unset so callers always get
/// a usable base directory.
pub fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    env::var_os(var)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| home_dir().join(fallback))
}

/// Returns the user's config directory following the XDG Base Directory Specification.
///
/// Checks `XDG_CONFIG_HOME`, defaulting to `$HOME/.config`.
pub fn xdg_config_home() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Returns the user's cache directory following the XDG Base Directory Specification.
///
/// Checks `XDG_CACHE_HOME`, defaulting to `$HOME/.cache`.
pub fn xdg_cache_home() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", ".cache")
}

/// Turns an arbitrary URL into a single path component.
///
/// Every character outside `[a-zA-Z0-9.]` becomes `-`.
///
/// ```
/// use depot_utils::path::sanitize_component;
///
/// assert_eq!(
///     sanitize_component("https://repo.example.org/"),
///     "https---repo.example.org-"
/// );
/// ```
pub fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
