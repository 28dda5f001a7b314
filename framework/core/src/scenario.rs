use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error, info};

use crate::{
    config::Config,
    error::{ActionError, DynError},
    session::Session,
    value::{ActionKey, Value},
};

/// A user callback invocable by `call`, `spawn`, `spread`, and `loop`
/// actions. Callbacks are registered by name so that action values stay
/// serializable across worker boundaries.
pub trait Callback: Send + Sync {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>>;
}

impl<F> Callback for F
where
    F: for<'a> Fn(&'a mut Session, &'a [Value]) -> BoxFuture<'a, Result<(), DynError>>
        + Send
        + Sync,
{
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        self(session, args)
    }
}

/// Name → callback table shared by a session and all of its forks.
#[derive(Default)]
pub struct Registry {
    callbacks: HashMap<String, Arc<dyn Callback>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under `name`, replacing any previous one.
    #[must_use]
    pub fn register<C>(mut self, name: impl Into<String>, callback: C) -> Self
    where
        C: Callback + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn insert<C>(&mut self, name: impl Into<String>, callback: C)
    where
        C: Callback + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Callback>> {
        self.callbacks.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.callbacks.keys().map(String::as_str).collect()
    }
}

#[async_trait]
/// A user-defined program over a session.
///
/// Scenarios compose session operations; suspension happens inside action
/// semantics, never through scenario control flow.
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the session before the main body runs.
    async fn init(&self, _session: &mut Session) -> Result<(), DynError> {
        Ok(())
    }

    /// The scenario body. Individual action failures are recorded on the
    /// session and do not abort it; returning `Err` marks the whole run.
    async fn run(&self, session: &mut Session) -> Result<(), DynError>;
}

/// Run one scenario to completion over a fresh session.
///
/// An `init` failure is recorded and skips the body; the session is
/// returned in every case.
pub async fn execute(
    scenario: Arc<dyn Scenario>,
    config: Config,
    registry: Arc<Registry>,
) -> Session {
    let mut session = Session::new(scenario.name(), config, registry);
    info!(session = %session.id(), "scenario starting");

    if let Err(source) = scenario.init(&mut session).await {
        error!(session = %session.id(), %source, "scenario init failed");
        let name = scenario.name().to_owned();
        session.record_error(
            ActionKey::Scenario { name: name.clone() },
            ActionError::Scenario { name, source },
        );
        return session;
    }

    if let Err(source) = scenario.run(&mut session).await {
        error!(session = %session.id(), %source, "scenario run failed");
        let name = scenario.name().to_owned();
        session.record_error(
            ActionKey::Scenario { name: name.clone() },
            ActionError::Scenario { name, source },
        );
    }

    debug!(
        session = %session.id(),
        results = session.results().len(),
        errors = session.errors().len(),
        "scenario finished"
    );
    session
}
