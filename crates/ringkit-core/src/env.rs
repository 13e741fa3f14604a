//! Environment variable helpers used by the `from_env()` constructors of
//! the ringkit config structs.
//!
//! ```ignore
//! use ringkit_core::env::{env_get, env_get_with};
//!
//! let entries: u32 = env_get("RINGKIT_RING_ENTRIES", 256);
//! let backend = env_get_with("RINGKIT_BACKEND", BackendKind::Auto, BackendKind::parse);
//! ```
//!
//! Unparseable values fall back to the default silently; config structs
//! run `validate()` afterwards, which is where bad values are reported.

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default` when unset or unparseable.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse `key` with a custom parser.
pub fn env_get_with<T, F>(key: &str, default: T, parse: F) -> T
where
    F: FnOnce(&str) -> Option<T>,
{
    match std::env::var(key) {
        Ok(v) => parse(v.trim()).unwrap_or(default),
        Err(_) => default,
    }
}

/// `1`, `true`, `yes`, `on` (any case) are true; any other set value is false.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    env_get_with(key, default, |v| {
        Some(matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    })
}

/// Microsecond count as a `Duration`.
pub fn env_get_duration_us(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_micros)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET: &str = "__RINGKIT_TEST_UNSET_VAR__";

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(env_get::<usize>(UNSET, 42), 42);
        assert!(env_get_bool(UNSET, true));
        assert_eq!(env_get_opt::<u32>(UNSET), None);
        assert_eq!(
            env_get_duration_us(UNSET, Duration::from_millis(3)),
            Duration::from_millis(3)
        );
    }

    #[test]
    fn test_custom_parser() {
        std::env::set_var("__RINGKIT_TEST_MODE__", " fast ");
        let v = env_get_with("__RINGKIT_TEST_MODE__", 0u8, |s| (s == "fast").then_some(7));
        assert_eq!(v, 7);
        std::env::remove_var("__RINGKIT_TEST_MODE__");
    }

    #[test]
    fn test_bool_and_garbage() {
        std::env::set_var("__RINGKIT_TEST_BOOL__", "On");
        assert!(env_get_bool("__RINGKIT_TEST_BOOL__", false));
        std::env::set_var("__RINGKIT_TEST_NUM__", "many");
        assert_eq!(env_get::<u32>("__RINGKIT_TEST_NUM__", 9), 9);
        std::env::remove_var("__RINGKIT_TEST_BOOL__");
        std::env::remove_var("__RINGKIT_TEST_NUM__");
    }
}
