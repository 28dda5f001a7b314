use std::{fmt, time::Duration};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Per-action and per-await cap applied when a session does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A duration bound that may be unbounded.
///
/// Serialized as integer milliseconds, or the string `"infinity"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeLimit {
    Finite(u64),
    Infinity,
}

impl TimeLimit {
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self::Finite(millis)
    }

    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self::Finite(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    #[must_use]
    pub const fn is_infinite(self) -> bool {
        matches!(self, Self::Infinity)
    }

    /// `None` when the bound is infinite.
    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Finite(millis) => Some(Duration::from_millis(millis)),
            Self::Infinity => None,
        }
    }

    /// The larger of two bounds; infinity dominates.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        match (self, other) {
            (Self::Infinity, _) | (_, Self::Infinity) => Self::Infinity,
            (Self::Finite(a), Self::Finite(b)) => Self::Finite(a.max(b)),
        }
    }

    /// The smaller of two bounds; a finite bound dominates infinity.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (Self::Infinity, limit) | (limit, Self::Infinity) => limit,
            (Self::Finite(a), Self::Finite(b)) => Self::Finite(a.min(b)),
        }
    }
}

impl fmt::Display for TimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(millis) => write!(f, "{millis}ms"),
            Self::Infinity => write!(f, "infinity"),
        }
    }
}

impl Serialize for TimeLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Finite(millis) => serializer.serialize_u64(*millis),
            Self::Infinity => serializer.serialize_str("infinity"),
        }
    }
}

impl<'de> Deserialize<'de> for TimeLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Millis(u64),
            Word(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Millis(millis) => Ok(Self::Finite(millis)),
            Repr::Word(word) if word == "infinity" => Ok(Self::Infinity),
            Repr::Word(word) => Err(de::Error::custom(format!(
                "expected milliseconds or \"infinity\", got '{word}'"
            ))),
        }
    }
}

/// Session configuration: the recognized keys plus a passthrough map for
/// anything a scenario wants to interpret itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Per-action / per-await cap in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Cap on a single scenario run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_timeout: Option<TimeLimit>,
    /// Cap across an environment batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_timeout: Option<TimeLimit>,
    /// Logical name used when tagging merged sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    /// URL prefix for HTTP and WebSocket actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Scenario-interpreted pre-delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Scenario-interpreted jitter ceiling in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_delay: Option<u64>,
    /// Unrecognized keys, preserved untouched and visible to scenarios.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_timeout_ms(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_timeout_ms(timeout.as_millis().min(u64::MAX as u128) as u64)
    }

    #[must_use]
    pub const fn with_scenario_timeout(mut self, limit: TimeLimit) -> Self {
        self.scenario_timeout = Some(limit);
        self
    }

    #[must_use]
    pub const fn with_environment_timeout(mut self, limit: TimeLimit) -> Self {
        self.environment_timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub const fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Some(millis);
        self
    }

    #[must_use]
    pub const fn with_random_delay_ms(mut self, millis: u64) -> Self {
        self.random_delay = Some(millis);
        self
    }

    /// Stash an arbitrary key for scenario consumption.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    /// Effective per-action timeout, falling back to [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        self.timeout.map_or(DEFAULT_TIMEOUT, Duration::from_millis)
    }

    /// Overlay `other` on top of `self`; keys set in `other` win.
    #[must_use]
    pub fn overlay(mut self, other: Self) -> Self {
        let Self {
            timeout,
            scenario_timeout,
            environment_timeout,
            session_name,
            base_url,
            delay,
            random_delay,
            extra,
        } = other;

        self.timeout = timeout.or(self.timeout);
        self.scenario_timeout = scenario_timeout.or(self.scenario_timeout);
        self.environment_timeout = environment_timeout.or(self.environment_timeout);
        self.session_name = session_name.or(self.session_name);
        self.base_url = base_url.or(self.base_url);
        self.delay = delay.or(self.delay);
        self.random_delay = random_delay.or(self.random_delay);
        self.extra.extend(extra);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_later_keys_win() {
        let base = Config::new()
            .with_timeout_ms(1_000)
            .with_session_name("base")
            .with_value("custom", serde_json::json!(1));
        let over = Config::new()
            .with_session_name("over")
            .with_value("custom", serde_json::json!(2));

        let merged = base.overlay(over);
        assert_eq!(merged.timeout, Some(1_000));
        assert_eq!(merged.session_name.as_deref(), Some("over"));
        assert_eq!(merged.value("custom"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn action_timeout_defaults_to_ten_seconds() {
        assert_eq!(Config::new().action_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(
            Config::new().with_timeout_ms(500).action_timeout(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn time_limit_round_trips_through_serde() {
        let finite: TimeLimit = serde_json::from_str("1500").expect("millis");
        assert_eq!(finite, TimeLimit::Finite(1_500));

        let infinite: TimeLimit = serde_json::from_str("\"infinity\"").expect("word");
        assert_eq!(infinite, TimeLimit::Infinity);

        assert_eq!(
            serde_json::to_string(&TimeLimit::Infinity).expect("serialize"),
            "\"infinity\""
        );
    }

    #[test]
    fn time_limit_bounds_combine() {
        let finite = TimeLimit::Finite(100);
        assert_eq!(finite.max(TimeLimit::Infinity), TimeLimit::Infinity);
        assert_eq!(finite.min(TimeLimit::Infinity), finite);
        assert_eq!(
            TimeLimit::Finite(100).max(TimeLimit::Finite(200)),
            TimeLimit::Finite(200)
        );
    }

    #[test]
    fn unknown_keys_survive_deserialization() {
        let config: Config =
            serde_json::from_str(r#"{"timeout": 250, "shard": "eu-west"}"#).expect("config");
        assert_eq!(config.timeout, Some(250));
        assert_eq!(config.value("shard"), Some(&serde_json::json!("eu-west")));
    }
}
