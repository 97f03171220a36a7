//! Helpers for reading configuration values out of the process environment.
//!
//! Nothing in here touches `std::env` directly.  Every helper goes through an [`EnvLookup`], so
//! callers decide where values come from (the real environment in the CLI, a `HashMap` in tests).
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use tracing::warn;

/// Capability to look up a single environment variable by name.
pub trait EnvLookup {
    fn lookup(&self, key: &str) -> Option<String>;
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn lookup(&self, key: &str) -> Option<String> {
        self(key)
    }
}

impl EnvLookup for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// The real process environment
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get a trimmed value, treating empty values the same as unset ones
pub fn get(env: &impl EnvLookup, key: &str) -> Option<String> {
    env.lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Like [`get`] but returns `default` when the variable is unset
pub fn get_or(env: &impl EnvLookup, key: &str, default: &str) -> String {
    get(env, key).unwrap_or_else(|| default.to_string())
}

/// Try each key in order, returning the first one that has a value
pub fn cascade(env: &impl EnvLookup, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| get(env, key))
}

/// Split a delimited list, dropping empty entries and expanding `$VAR` references in each one
pub fn slice(env: &impl EnvLookup, key: &str, delim: char) -> Option<Vec<String>> {
    get(env, key).map(|value| {
        let parts = value
            .split(delim)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        expand_slice(env, parts)
    })
}

/// Parse an unsigned integer.  A value that doesn't parse is logged and ignored.
pub fn uint(env: &impl EnvLookup, key: &str, default: u64) -> u64 {
    match get(env, key) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|e| {
            warn!(var = key, %value, err = %e, default, "Ignoring invalid integer");
            default
        }),
    }
}

/// Parse a byte size, either a plain integer ("1000000") or with a unit suffix ("10MB")
pub fn size(env: &impl EnvLookup, key: &str, default: byte_unit::Byte) -> byte_unit::Byte {
    match get(env, key) {
        None => default,
        Some(value) => byte_unit::Byte::from_str(&value).unwrap_or_else(|e| {
            warn!(var = key, %value, err = %e, default = %default, "Ignoring invalid size");
            default
        }),
    }
}

/// Expand `$VAR` and `${VAR}` references in every entry.  Unknown variables expand to nothing.
pub fn expand_slice(env: &impl EnvLookup, values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|value| expand(env, &value)).collect()
}

pub fn expand(env: &impl EnvLookup, value: &str) -> String {
    static VAR: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap()
    });

    VAR.replace_all(value, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        env.lookup(name).unwrap_or_default()
    })
    .into_owned()
}
