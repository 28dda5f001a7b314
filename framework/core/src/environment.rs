use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info};

use crate::{
    config::{Config, TimeLimit},
    merge,
    scenario::{Callback, Registry, Scenario},
    session::Session,
    worker::Worker,
};

/// One entry of an environment's scenario list, with its fully resolved
/// config (defaults and overlays already applied).
pub struct RunSpec {
    scenario: Arc<dyn Scenario>,
    concurrency: usize,
    config: Config,
}

impl RunSpec {
    #[must_use]
    pub fn scenario(&self) -> &Arc<dyn Scenario> {
        &self.scenario
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}

/// Aggregate returned by a finished environment run. Timestamps are
/// wall-clock milliseconds; the duration is measured monotonically.
#[derive(Serialize)]
pub struct Results {
    environment: String,
    start_ms: u64,
    end_ms: u64,
    duration_ms: u64,
    sessions: Vec<Session>,
}

impl Results {
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    #[must_use]
    pub const fn start_ms(&self) -> u64 {
        self.start_ms
    }

    #[must_use]
    pub const fn end_ms(&self) -> u64 {
        self.end_ms
    }

    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    #[must_use]
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Fold every completed session into one, tagging entries with their
    /// session names.
    #[must_use]
    pub fn into_merged(self) -> Option<Session> {
        merge::merge_sessions(self.sessions)
    }
}

/// The top-level batch: scenarios × concurrency × config.
pub struct Environment {
    name: String,
    default_config: Config,
    registry: Arc<Registry>,
    runs: Vec<RunSpec>,
}

impl Environment {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> EnvironmentBuilder {
        EnvironmentBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn default_config(&self) -> &Config {
        &self.default_config
    }

    #[must_use]
    pub fn runs(&self) -> &[RunSpec] {
        &self.runs
    }

    /// Cap across the whole batch: `environment_timeout` or infinity.
    #[must_use]
    pub fn timeout(&self) -> TimeLimit {
        self.default_config
            .environment_timeout
            .unwrap_or(TimeLimit::Infinity)
    }

    /// Flatten the scenario list into running workers, honoring
    /// concurrency multipliers.
    #[must_use]
    pub fn start_workers(&self) -> Vec<Worker> {
        let mut workers = Vec::new();
        for spec in &self.runs {
            workers.extend(Worker::start_many(
                spec.concurrency,
                &spec.scenario,
                &spec.config,
                &self.registry,
            ));
        }
        workers
    }

    /// Run every scenario to completion and collect the final sessions.
    pub async fn run(self) -> Results {
        info!(
            environment = %self.name,
            scenarios = self.runs.len(),
            timeout = %self.timeout(),
            "environment starting"
        );

        let start_ms = wall_clock_ms();
        let started = Instant::now();

        let workers = self.start_workers();
        let sessions = await_workers(workers, self.timeout()).await;

        let duration = started.elapsed();
        info!(
            environment = %self.name,
            sessions = sessions.len(),
            duration_ms = duration.as_millis(),
            "environment finished"
        );

        Results {
            environment: self.name,
            start_ms,
            end_ms: wall_clock_ms(),
            duration_ms: duration.as_millis().min(u64::MAX as u128) as u64,
            sessions,
        }
    }
}

/// Await every worker under the environment's timeout policy. Only
/// successfully completed sessions are returned; failures are logged and
/// excluded.
async fn await_workers(workers: Vec<Worker>, environment_limit: TimeLimit) -> Vec<Session> {
    let batch_limit = workers
        .iter()
        .map(Worker::scenario_timeout)
        .fold(TimeLimit::Finite(0), TimeLimit::max);
    let bound = if workers.is_empty() {
        TimeLimit::Finite(0)
    } else {
        batch_limit.min(environment_limit)
    };

    let mut sessions = Vec::with_capacity(workers.len());
    match bound.as_duration() {
        None => {
            for worker in workers {
                match worker.join().await {
                    Ok(session) => sessions.push(session),
                    Err(failure) => error!(%failure, "worker excluded from results"),
                }
            }
        }
        Some(total) => {
            let deadline = Instant::now() + total;
            for worker in workers {
                match worker.join_until(deadline).await {
                    Ok(session) => sessions.push(session),
                    Err(failure) => error!(%failure, "worker excluded from results"),
                }
            }
        }
    }
    sessions
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or_default()
}

struct PendingRun {
    scenario: Arc<dyn Scenario>,
    concurrency: usize,
    name: Option<String>,
    overlay: Config,
}

/// Builder for the environment declaration surface. Config precedence per
/// run is left-to-right: defaults, then the run name, then the overlay.
pub struct EnvironmentBuilder {
    name: String,
    default_config: Config,
    registry: Registry,
    runs: Vec<PendingRun>,
}

impl EnvironmentBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_config: Config::default(),
            registry: Registry::new(),
            runs: Vec::new(),
        }
    }

    #[must_use]
    pub fn default_config(mut self, config: Config) -> Self {
        self.default_config = config;
        self
    }

    /// Register a callback available to every session in the batch.
    #[must_use]
    pub fn register<C>(mut self, name: impl Into<String>, callback: C) -> Self
    where
        C: Callback + 'static,
    {
        self.registry.insert(name, callback);
        self
    }

    #[must_use]
    pub fn run<S>(self, scenario: S, overlay: Config) -> Self
    where
        S: Scenario + 'static,
    {
        self.push(Arc::new(scenario), 1, None, overlay)
    }

    #[must_use]
    pub fn run_named<S>(self, scenario: S, name: impl Into<String>, overlay: Config) -> Self
    where
        S: Scenario + 'static,
    {
        self.push(Arc::new(scenario), 1, Some(name.into()), overlay)
    }

    #[must_use]
    pub fn run_many<S>(self, concurrency: usize, scenario: S, overlay: Config) -> Self
    where
        S: Scenario + 'static,
    {
        self.push(Arc::new(scenario), concurrency, None, overlay)
    }

    #[must_use]
    pub fn run_many_named<S>(
        self,
        concurrency: usize,
        scenario: S,
        name: impl Into<String>,
        overlay: Config,
    ) -> Self
    where
        S: Scenario + 'static,
    {
        self.push(Arc::new(scenario), concurrency, Some(name.into()), overlay)
    }

    fn push(
        mut self,
        scenario: Arc<dyn Scenario>,
        concurrency: usize,
        name: Option<String>,
        overlay: Config,
    ) -> Self {
        self.runs.push(PendingRun {
            scenario,
            concurrency,
            name,
            overlay,
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Environment {
        let Self {
            name,
            default_config,
            registry,
            runs,
        } = self;

        let runs = runs
            .into_iter()
            .map(|run| {
                let mut config = default_config.clone();
                if let Some(session_name) = run.name {
                    config = config.overlay(Config::new().with_session_name(session_name));
                }
                RunSpec {
                    scenario: run.scenario,
                    concurrency: run.concurrency,
                    config: config.overlay(run.overlay),
                }
            })
            .collect();

        Environment {
            name,
            default_config,
            registry: Arc::new(registry),
            runs,
        }
    }
}
