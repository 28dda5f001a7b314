pub mod action;
pub mod config;
pub mod environment;
pub mod error;
pub mod merge;
pub mod scenario;
pub mod session;
pub mod transport;
pub mod value;
pub mod worker;

use std::{ops::Mul as _, sync::LazyLock, time::Duration};

pub use action::{Action, ActionOutcome};
pub use config::{Config, DEFAULT_TIMEOUT, TimeLimit};
pub use environment::{Environment, EnvironmentBuilder, Results, RunSpec};
pub use error::{ActionError, DynError, WorkerError};
pub use scenario::{Callback, Registry, Scenario, execute};
pub use session::{Session, TaskHandle};
pub use transport::{
    http::{HttpClient, HttpMethod, RequestBody, RequestOptions},
    ws::WsConn,
};
pub use value::{ActionKey, HttpResponse, MetricKey, Recorded, RecordedSeries, Value, WsFrame};
pub use worker::Worker;

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(stampede_env::slow_test_env);

/// In slow test environments like shared CI runners, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV { d.mul(2) } else { d }
}
