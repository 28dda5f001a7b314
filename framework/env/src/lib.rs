use std::{env, str::FromStr};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn stampede_base_url() -> Option<String> {
    env::var("STAMPEDE_BASE_URL").ok()
}

#[must_use]
pub fn stampede_log_level() -> Option<String> {
    env::var("STAMPEDE_LOG_LEVEL").ok()
}

#[must_use]
pub fn stampede_session_count() -> Option<usize> {
    env::var("STAMPEDE_SESSION_COUNT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}

/// Read the first parseable value among `keys`, falling back to `default`.
pub fn read_env_any<T>(keys: &[&str], default: T) -> T
where
    T: FromStr + Copy,
{
    keys.iter()
        .find_map(|key| env::var(key).ok().and_then(|raw| raw.parse::<T>().ok()))
        .unwrap_or(default)
}
