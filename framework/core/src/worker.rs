use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::{
    task::JoinHandle,
    time::{Instant, timeout, timeout_at},
};
use tracing::{debug, error};

use crate::{
    config::{Config, TimeLimit},
    error::WorkerError,
    scenario::{self, Registry, Scenario},
    session::Session,
};

/// A supervised execution of one scenario. Panics inside the scenario are
/// converted into worker errors; peers never observe them.
pub struct Worker {
    scenario: String,
    scenario_timeout: TimeLimit,
    handle: JoinHandle<Result<Session, WorkerError>>,
}

impl Worker {
    /// Begin one scenario asynchronously and return a joinable handle.
    #[must_use]
    pub fn start(scenario: Arc<dyn Scenario>, config: Config, registry: Arc<Registry>) -> Self {
        let name = scenario.name().to_owned();
        let limit = config.scenario_timeout.unwrap_or(TimeLimit::Infinity);
        debug!(scenario = %name, timeout = %limit, "starting worker");

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(scenario::execute(scenario, config, registry))
                .catch_unwind()
                .await;

            outcome.map_err(|panic| {
                let message = panic_message(panic);
                error!(scenario = %task_name, %message, "worker panicked");
                WorkerError::Panicked {
                    scenario: task_name,
                    message,
                }
            })
        });

        Self {
            scenario: name,
            scenario_timeout: limit,
            handle,
        }
    }

    /// Spawn `concurrency` independent workers over the same scenario.
    #[must_use]
    pub fn start_many(
        concurrency: usize,
        scenario: &Arc<dyn Scenario>,
        config: &Config,
        registry: &Arc<Registry>,
    ) -> Vec<Self> {
        (0..concurrency)
            .map(|_| {
                Self::start(
                    Arc::clone(scenario),
                    config.clone(),
                    Arc::clone(registry),
                )
            })
            .collect()
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub const fn scenario_timeout(&self) -> TimeLimit {
        self.scenario_timeout
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Join under this worker's own scenario timeout.
    pub async fn join(self) -> Result<Session, WorkerError> {
        match self.scenario_timeout.as_duration() {
            None => {
                let Self {
                    scenario, handle, ..
                } = self;
                flatten(scenario, handle.await)
            }
            Some(limit) => self.join_within(limit).await,
        }
    }

    async fn join_within(self, limit: Duration) -> Result<Session, WorkerError> {
        let Self {
            scenario,
            scenario_timeout,
            mut handle,
        } = self;

        match timeout(limit, &mut handle).await {
            Ok(joined) => flatten(scenario, joined),
            Err(_elapsed) => {
                handle.abort();
                Err(WorkerError::ScenarioTimeout {
                    scenario,
                    timeout: scenario_timeout.to_string(),
                })
            }
        }
    }

    /// Join as part of a bounded multi-join; a worker still running at the
    /// deadline is force-terminated.
    pub(crate) async fn join_until(self, deadline: Instant) -> Result<Session, WorkerError> {
        let Self {
            scenario,
            mut handle,
            ..
        } = self;

        match timeout_at(deadline, &mut handle).await {
            Ok(joined) => flatten(scenario, joined),
            Err(_elapsed) => {
                handle.abort();
                Err(WorkerError::EnvironmentShutdown { scenario })
            }
        }
    }
}

fn flatten(
    scenario: String,
    joined: Result<Result<Session, WorkerError>, tokio::task::JoinError>,
) -> Result<Session, WorkerError> {
    match joined {
        Ok(outcome) => outcome,
        Err(join_error) => Err(WorkerError::Join {
            scenario,
            message: join_error.to_string(),
        }),
    }
}

/// Turn a panic payload into something loggable.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}
