//! Generic environment-variable config helpers.
//!
//! `env_get<T: FromStr>` with a default covers most of the config
//! surface; `env_get_bool` and `env_get_str` are thin conveniences over
//! it for the two most common cases.

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` if unset or unparsable.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parse `key` as `T`, returning `None` if unset or unparsable.
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Accepts `"1"`, `"true"`, `"yes"`, `"on"` (case-insensitive) as true;
/// everything else (including unset) returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_on_unset() {
        let val: usize = env_get("__RING_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn bool_variants() {
        std::env::set_var("__RING_TEST_BOOL__", "YES");
        assert!(env_get_bool("__RING_TEST_BOOL__", false));
        std::env::set_var("__RING_TEST_BOOL__", "0");
        assert!(!env_get_bool("__RING_TEST_BOOL__", true));
        std::env::remove_var("__RING_TEST_BOOL__");
    }

    #[test]
    fn invalid_parse_falls_back() {
        std::env::set_var("__RING_TEST_NUM__", "not-a-number");
        let val: usize = env_get("__RING_TEST_NUM__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__RING_TEST_NUM__");
    }

    #[test]
    fn opt_is_none_when_unset() {
        let val: Option<u16> = env_get_opt("__RING_TEST_UNSET_OPT__");
        assert!(val.is_none());
    }
}
