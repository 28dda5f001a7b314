use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::Duration,
};

use serde::{Serialize, Serializer, ser::SerializeMap as _};

use crate::transport::http::HttpMethod;

/// A value produced or consumed by actions: user assigns, recorded results,
/// metric samples, and callback arguments all carry these.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Duration(Duration),
    Http(HttpResponse),
    Ws(WsFrame),
}

impl Value {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_http(&self) -> Option<&HttpResponse> {
        match self {
            Self::Http(response) => Some(response),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Response captured from an HTTP action.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Data frame captured from or sent over a WebSocket connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Structural identity of an action. Two actions are the same key iff they
/// are the same variant with the same fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ActionKey {
    Http { method: HttpMethod, path: String },
    WsConnect { path: String },
    WsSend { path: String },
    WsRecv,
    Call { name: String },
    /// Async-fork family; also the key merged child entries land under.
    Task { name: String },
    Loop { name: String },
    Scenario { name: String },
    /// Synthetic key recording join failures for `await`.
    Await { name: String },
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { method, path } => write!(f, "{method} {path}"),
            Self::WsConnect { path } => write!(f, "ws_connect {path}"),
            Self::WsSend { path } => write!(f, "ws_send {path}"),
            Self::WsRecv => write!(f, "ws_recv"),
            Self::Call { name } => write!(f, "call {name}"),
            Self::Task { name } => write!(f, "task {name}"),
            Self::Loop { name } => write!(f, "loop {name}"),
            Self::Scenario { name } => write!(f, "scenario {name}"),
            Self::Await { name } => write!(f, "await {name}"),
        }
    }
}

/// Identity of a metric series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MetricKey {
    Http { path: String },
    WsConnect { path: String },
    WsSend { path: String },
    Custom(String),
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { path } => write!(f, "http {path}"),
            Self::WsConnect { path } => write!(f, "ws_connect {path}"),
            Self::WsSend { path } => write!(f, "ws_send {path}"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// One entry in a session's results or metrics.
///
/// Entries start out `Plain`. Joining a fork wraps each child entry in
/// `Async` with the key it was recorded under, and cross-session merging
/// wraps entries in `Session` with the originating session's name. Both
/// wrappers nest, preserving provenance through arbitrarily deep joins.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Recorded<K> {
    Plain(Value),
    Async { key: K, value: Box<Recorded<K>> },
    Session { name: String, value: Box<Recorded<K>> },
}

impl<K> Recorded<K> {
    /// The innermost value, unwrapping any provenance tags.
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Plain(value) => value,
            Self::Async { value, .. } | Self::Session { value, .. } => value.value(),
        }
    }

    /// The async key this entry was merged under, if any.
    #[must_use]
    pub fn async_key(&self) -> Option<&K> {
        match self {
            Self::Async { key, .. } => Some(key),
            Self::Session { value, .. } => value.async_key(),
            Self::Plain(_) => None,
        }
    }

    /// The session name this entry was tagged with, if any.
    #[must_use]
    pub fn session_name(&self) -> Option<&str> {
        match self {
            Self::Session { name, .. } => Some(name),
            Self::Async { value, .. } => value.session_name(),
            Self::Plain(_) => None,
        }
    }

    pub(crate) fn with_session_name(self, name: &str) -> Self {
        match self {
            already @ Self::Session { .. } => already,
            tagged => Self::Session {
                name: name.to_owned(),
                value: Box::new(tagged),
            },
        }
    }
}

/// Ordered, newest-first store of recorded entries per key.
pub type RecordedSeries<K> = HashMap<K, VecDeque<Recorded<K>>>;

/// Serialize a map keyed by a non-string key as `{display-key: entries}`.
pub(crate) fn serialize_keyed<K, V, S>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: fmt::Display,
    V: Serialize,
    S: Serializer,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (key, entries) in map {
        out.serialize_entry(&key.to_string(), entries)?;
    }
    out.end()
}

/// Serialize an error map as `{display-key: display-error}`.
pub(crate) fn serialize_keyed_errors<K, E, S>(
    map: &HashMap<K, E>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    K: fmt::Display,
    E: fmt::Display,
    S: Serializer,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (key, error) in map {
        out.serialize_entry(&key.to_string(), &error.to_string())?;
    }
    out.end()
}
