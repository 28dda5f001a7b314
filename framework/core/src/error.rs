use std::time::Duration;

use thiserror::Error;

use crate::transport::{http::HttpError, ws::WsError};

/// Opaque error produced by user-supplied callbacks and scenarios.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reason an action failed. Recorded in the session's error map; a failing
/// action never aborts its scenario.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Ws(#[from] WsError),
    #[error("websocket receive timed out after {timeout:?}")]
    WsRecvTimeout { timeout: Duration },
    #[error("websocket already connected; set reconnect to replace it")]
    AlreadyConnected,
    #[error("no websocket connection established")]
    NotConnected,
    #[error("no callback registered under '{name}'")]
    UnknownCallback { name: String },
    #[error("callback '{name}' failed: {source}")]
    Callback {
        name: String,
        #[source]
        source: DynError,
    },
    #[error("callback '{name}' panicked: {message}")]
    CallbackPanicked { name: String, message: String },
    #[error("timed out joining task '{name}' after {timeout:?}")]
    JoinTimeout { name: String, timeout: Duration },
    #[error("task '{name}' could not be joined: {message}")]
    JoinFailed { name: String, message: String },
    #[error("nested scenario '{name}' failed: {source}")]
    Scenario {
        name: String,
        #[source]
        source: DynError,
    },
}

impl ActionError {
    /// True when the failure was a join deadline expiring.
    #[must_use]
    pub const fn is_join_timeout(&self) -> bool {
        matches!(self, Self::JoinTimeout { .. })
    }
}

/// Terminal outcome of a worker whose session cannot be returned.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("scenario '{scenario}' panicked: {message}")]
    Panicked { scenario: String, message: String },
    #[error("scenario '{scenario}' exceeded its timeout of {timeout}")]
    ScenarioTimeout { scenario: String, timeout: String },
    #[error("worker for scenario '{scenario}' could not be joined: {message}")]
    Join { scenario: String, message: String },
    #[error("scenario '{scenario}' terminated during environment shutdown")]
    EnvironmentShutdown { scenario: String },
}
