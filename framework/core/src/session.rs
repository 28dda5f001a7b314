use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    action::Action,
    config::Config,
    error::ActionError,
    merge,
    scenario::{Callback, Registry},
    transport::{
        http::{HttpClient, HttpMethod, RequestOptions},
        ws::WsConn,
    },
    value::{
        ActionKey, MetricKey, Recorded, RecordedSeries, Value, serialize_keyed,
        serialize_keyed_errors,
    },
};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one live fork. The id is engine-assigned and makes removal
/// well-defined even when several forks share a task name.
pub struct TaskHandle {
    id: u64,
    name: String,
    handle: JoinHandle<Session>,
}

impl TaskHandle {
    pub(crate) fn new(name: String, handle: JoinHandle<Session>) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            handle,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// The mutable execution context threaded through a scenario's actions.
///
/// A session is owned by exactly one executing task at any instant. Forks
/// receive an independent child session (shallow copy of config and assigns,
/// fresh result state); their effects become visible to the parent only when
/// joined, through the tagged merge in [`crate::merge`].
#[derive(Serialize)]
pub struct Session {
    id: String,
    scenario: String,
    config: Config,
    assigns: HashMap<String, Value>,
    #[serde(serialize_with = "serialize_keyed")]
    results: RecordedSeries<ActionKey>,
    #[serde(serialize_with = "serialize_keyed")]
    metrics: RecordedSeries<MetricKey>,
    #[serde(serialize_with = "serialize_keyed_errors")]
    errors: HashMap<ActionKey, ActionError>,
    #[serde(skip)]
    async_tasks: HashMap<String, Vec<TaskHandle>>,
    #[serde(skip)]
    http: HttpClient,
    #[serde(skip)]
    ws: Option<WsConn>,
    #[serde(skip)]
    registry: Arc<Registry>,
}

impl Session {
    /// Create a fresh session for one scenario instance.
    #[must_use]
    pub fn new(scenario: &str, config: Config, registry: Arc<Registry>) -> Self {
        let http = HttpClient::new(config.base_url.clone());
        Self {
            id: format!("{scenario} {}", Uuid::new_v4()),
            scenario: scenario.to_owned(),
            config,
            assigns: HashMap::new(),
            results: HashMap::new(),
            metrics: HashMap::new(),
            errors: HashMap::new(),
            async_tasks: HashMap::new(),
            http,
            ws: None,
            registry,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Logical name: `session_name` from config, or the scenario name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.config.session_name.as_deref().unwrap_or(&self.scenario)
    }

    /// Per-action / per-await cap (config `timeout`, default 10 s).
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.action_timeout()
    }

    #[must_use]
    pub const fn results(&self) -> &RecordedSeries<ActionKey> {
        &self.results
    }

    #[must_use]
    pub const fn metrics(&self) -> &RecordedSeries<MetricKey> {
        &self.metrics
    }

    #[must_use]
    pub const fn errors(&self) -> &HashMap<ActionKey, ActionError> {
        &self.errors
    }

    #[must_use]
    pub const fn assigns(&self) -> &HashMap<String, Value> {
        &self.assigns
    }

    /// Names with at least one unjoined fork.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<&str> {
        self.async_tasks.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn has_pending_task(&self, name: &str) -> bool {
        self.async_tasks.contains_key(name)
    }

    #[must_use]
    pub const fn http(&self) -> &HttpClient {
        &self.http
    }

    #[must_use]
    pub(crate) const fn ws(&self) -> Option<&WsConn> {
        self.ws.as_ref()
    }

    /// Whether the reserved `ws_conn` slot holds a live connection.
    #[must_use]
    pub const fn ws_connected(&self) -> bool {
        self.ws.is_some()
    }

    pub(crate) fn ws_mut(&mut self) -> Option<&mut WsConn> {
        self.ws.as_mut()
    }

    pub(crate) fn set_ws(&mut self, conn: WsConn) {
        self.ws = Some(conn);
    }

    pub(crate) fn callback(&self, name: &str) -> Result<Arc<dyn Callback>, ActionError> {
        self.registry
            .get(name)
            .ok_or_else(|| ActionError::UnknownCallback {
                name: name.to_owned(),
            })
    }

    // --- assigns -----------------------------------------------------------

    /// Set one scratch value, overwriting any previous one.
    pub fn assign(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.assigns.insert(key.into(), value.into());
    }

    /// Set several scratch values at once.
    pub fn assign_many(&mut self, pairs: impl IntoIterator<Item = (String, Value)>) {
        self.assigns.extend(pairs);
    }

    /// Replace a scratch value with `f(current)`.
    pub fn update_assign(&mut self, key: &str, f: impl FnOnce(Option<&Value>) -> Value) {
        let next = f(self.assigns.get(key));
        self.assigns.insert(key.to_owned(), next);
    }

    #[must_use]
    pub fn assigned(&self, key: &str) -> Option<&Value> {
        self.assigns.get(key)
    }

    // --- recorded state ----------------------------------------------------

    /// Record an action result; repeated writes under one key coalesce
    /// newest-first.
    pub fn add_result(&mut self, key: ActionKey, value: Value) {
        self.results
            .entry(key)
            .or_default()
            .push_front(Recorded::Plain(value));
    }

    /// Record a metric sample, same coalescing rule as results.
    pub fn add_metric(&mut self, key: MetricKey, value: Value) {
        self.metrics
            .entry(key)
            .or_default()
            .push_front(Recorded::Plain(value));
    }

    /// Record an action failure. Only the latest error per key is retained.
    pub fn record_error(&mut self, key: ActionKey, reason: ActionError) {
        self.errors.insert(key, reason);
    }

    /// Newest-first values recorded under `key`, provenance tags unwrapped.
    #[must_use]
    pub fn result_values(&self, key: &ActionKey) -> Vec<&Value> {
        self.results
            .get(key)
            .map(|entries| entries.iter().map(Recorded::value).collect())
            .unwrap_or_default()
    }

    /// Newest-first samples recorded under a metric key.
    #[must_use]
    pub fn metric_values(&self, key: &MetricKey) -> Vec<&Value> {
        self.metrics
            .get(key)
            .map(|entries| entries.iter().map(Recorded::value).collect())
            .unwrap_or_default()
    }

    // --- forks -------------------------------------------------------------

    /// Track a live fork under `name`, newest first.
    pub fn add_async_task(&mut self, name: &str, task: TaskHandle) {
        self.async_tasks
            .entry(name.to_owned())
            .or_default()
            .insert(0, task);
    }

    /// Drop one tracked fork by id; the name disappears with its last entry.
    pub fn remove_async_task(&mut self, name: &str, task_id: u64) -> Option<TaskHandle> {
        let tasks = self.async_tasks.get_mut(name)?;
        let position = tasks.iter().position(|task| task.id == task_id)?;
        let removed = tasks.remove(position);
        if tasks.is_empty() {
            self.async_tasks.remove(name);
        }
        Some(removed)
    }

    /// Independent child session: shallow copy of config and assigns, fresh
    /// result state, no websocket. The HTTP client and callback registry are
    /// shared handles.
    #[must_use]
    pub fn fork(&self) -> Self {
        self.fork_with_config(self.config.clone())
    }

    pub(crate) fn fork_with_config(&self, config: Config) -> Self {
        let http = if config.base_url == self.config.base_url {
            self.http.clone()
        } else {
            HttpClient::new(config.base_url.clone())
        };
        Self {
            id: format!("{} {}", self.scenario, Uuid::new_v4()),
            scenario: self.scenario.clone(),
            config,
            assigns: self.assigns.clone(),
            results: HashMap::new(),
            metrics: HashMap::new(),
            errors: HashMap::new(),
            async_tasks: HashMap::new(),
            http,
            ws: None,
            registry: Arc::clone(&self.registry),
        }
    }

    // --- joining -----------------------------------------------------------

    /// Join every fork tracked under `name`, newest first. Each join waits up
    /// to the session timeout; a timed-out child is aborted, merges nothing,
    /// and leaves a `join_timeout` error under the synthetic await key.
    pub async fn await_tasks(&mut self, name: &str) {
        let Some(tasks) = self.async_tasks.remove(name) else {
            return;
        };
        for task in tasks {
            self.join_task(name, task).await;
        }
    }

    /// Join several names in order.
    pub async fn await_many(&mut self, names: &[&str]) {
        for name in names {
            self.await_tasks(name).await;
        }
    }

    /// Stable alias for [`Session::await_tasks`].
    pub async fn await_all(&mut self, name: &str) {
        self.await_tasks(name).await;
    }

    /// Join a single handle held outside the tracked map.
    pub async fn await_handle(&mut self, task: TaskHandle) {
        let name = task.name.clone();
        self.remove_async_task(&name, task.id);
        self.join_task(&name, task).await;
    }

    async fn join_task(&mut self, name: &str, task: TaskHandle) {
        let limit = self.timeout();
        let TaskHandle { id, mut handle, .. } = task;

        match timeout(limit, &mut handle).await {
            Ok(Ok(child)) => {
                debug!(session = %self.id, task = name, task_id = id, "joined fork");
                self.merge_child(name, child);
            }
            Ok(Err(join_error)) => {
                error!(session = %self.id, task = name, task_id = id, %join_error, "fork died before join");
                self.record_error(
                    ActionKey::Await {
                        name: name.to_owned(),
                    },
                    ActionError::JoinFailed {
                        name: name.to_owned(),
                        message: join_error.to_string(),
                    },
                );
            }
            Err(_elapsed) => {
                handle.abort();
                error!(session = %self.id, task = name, task_id = id, timeout_ms = limit.as_millis(), "fork join timed out");
                self.record_error(
                    ActionKey::Await {
                        name: name.to_owned(),
                    },
                    ActionError::JoinTimeout {
                        name: name.to_owned(),
                        timeout: limit,
                    },
                );
            }
        }
    }

    fn merge_child(&mut self, name: &str, child: Self) {
        let (results, metrics, _errors) = child.into_parts();
        let results = merge::tag_results(name, results);
        let metrics = merge::tag_metrics(name, metrics);
        merge::merge_series(&mut self.results, results);
        merge::merge_series(&mut self.metrics, metrics);
    }

    /// Join `name`, then hand each merged `{async, _, response}` value to
    /// `callback`. The callback's outcome is discarded; the session state is
    /// whatever the callback left behind.
    pub async fn with_response<C>(&mut self, name: &str, callback: &C)
    where
        C: Callback + ?Sized,
    {
        self.await_tasks(name).await;

        let key = ActionKey::Task {
            name: name.to_owned(),
        };
        let responses: Vec<Value> = self
            .results
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.async_key().is_some())
                    .map(|entry| entry.value().clone())
                    .collect()
            })
            .unwrap_or_default();

        for response in responses {
            if let Err(reason) = callback.invoke(self, std::slice::from_ref(&response)).await {
                debug!(session = %self.id, task = name, %reason, "with_response callback outcome discarded");
            }
        }
    }

    // --- action surface ----------------------------------------------------

    /// Suspend this scenario for `duration`. No I/O.
    pub async fn delay(&mut self, duration: Duration) {
        sleep(duration).await;
    }

    pub async fn request(&mut self, method: HttpMethod, path: &str, options: RequestOptions) {
        self.execute(Action::Http {
            method,
            path: path.to_owned(),
            options,
        })
        .await;
    }

    pub async fn get(&mut self, path: &str) {
        self.request(HttpMethod::Get, path, RequestOptions::new())
            .await;
    }

    pub async fn get_with(&mut self, path: &str, options: RequestOptions) {
        self.request(HttpMethod::Get, path, options).await;
    }

    pub async fn post(&mut self, path: &str, options: RequestOptions) {
        self.request(HttpMethod::Post, path, options).await;
    }

    pub async fn put(&mut self, path: &str, options: RequestOptions) {
        self.request(HttpMethod::Put, path, options).await;
    }

    pub async fn patch(&mut self, path: &str, options: RequestOptions) {
        self.request(HttpMethod::Patch, path, options).await;
    }

    pub async fn delete(&mut self, path: &str, options: RequestOptions) {
        self.request(HttpMethod::Delete, path, options).await;
    }

    pub async fn ws_connect(&mut self, path: &str) {
        self.execute(Action::WsConnect {
            path: path.to_owned(),
            reconnect: false,
        })
        .await;
    }

    /// Connect, replacing any live connection.
    pub async fn ws_reconnect(&mut self, path: &str) {
        self.execute(Action::WsConnect {
            path: path.to_owned(),
            reconnect: true,
        })
        .await;
    }

    pub async fn ws_send(&mut self, frame: crate::value::WsFrame) {
        self.execute(Action::WsSend {
            frame,
            await_ack: false,
        })
        .await;
    }

    /// Send and wait for the next frame as an acknowledgement.
    pub async fn ws_send_ack(&mut self, frame: crate::value::WsFrame) {
        self.execute(Action::WsSend {
            frame,
            await_ack: true,
        })
        .await;
    }

    pub async fn ws_recv(&mut self) {
        self.execute(Action::WsRecv { timeout: None }).await;
    }

    pub async fn ws_recv_timeout(&mut self, deadline: Duration) {
        self.execute(Action::WsRecv {
            timeout: Some(deadline),
        })
        .await;
    }

    /// Invoke a registered callback inline.
    pub async fn call(&mut self, name: &str, args: Vec<Value>) {
        self.execute(Action::Call {
            name: name.to_owned(),
            args,
        })
        .await;
    }

    /// Fork an independent child session running the named callback.
    pub async fn spawn(&mut self, name: &str, args: Vec<Value>) {
        self.execute(Action::Async {
            name: name.to_owned(),
            args,
        })
        .await;
    }

    /// Fan out `rate` forks of the named callback evenly across `interval`.
    pub async fn spread(&mut self, name: &str, rate: u32, interval: Duration) {
        self.execute(Action::Spread {
            name: name.to_owned(),
            args: Vec::new(),
            rate,
            interval,
        })
        .await;
    }

    /// Run `inner` repeatedly until `duration` has elapsed.
    pub async fn loop_for(&mut self, inner: Action, duration: Duration) {
        let name = inner.loop_name();
        self.execute(Action::Loop {
            name,
            inner: Box::new(inner),
            duration,
        })
        .await;
    }

    /// Loop a registered callback for `duration`.
    pub async fn loop_call(&mut self, name: &str, duration: Duration) {
        self.loop_for(
            Action::Call {
                name: name.to_owned(),
                args: Vec::new(),
            },
            duration,
        )
        .await;
    }

    /// Type-erased [`Session::execute`], used where actions re-enter the
    /// driver (loops, spreads).
    pub(crate) fn execute_boxed<'a>(&'a mut self, action: Action) -> BoxFuture<'a, ()> {
        Box::pin(self.execute(action))
    }

    /// Run an action under the uniform failure policy: success logs at debug
    /// level, failure logs at error level and is recorded under the action's
    /// key. A failing action never aborts the scenario.
    pub async fn execute(&mut self, action: Action) {
        let key = action.key(self);
        match action.run(self).await {
            Ok(()) => debug!(session = %self.id, action = %key, "action completed"),
            Err(reason) => {
                error!(session = %self.id, action = %key, %reason, "action failed");
                self.record_error(key, reason);
            }
        }
    }

    // --- merge plumbing (crate-internal) -----------------------------------

    pub(crate) fn results_mut(&mut self) -> &mut RecordedSeries<ActionKey> {
        &mut self.results
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut RecordedSeries<MetricKey> {
        &mut self.metrics
    }

    pub(crate) fn overlay_own_name(&mut self) {
        let name = self.name().to_owned();
        merge::overlay_session_name(&mut self.results, &name);
        merge::overlay_session_name(&mut self.metrics, &name);
    }

    pub(crate) fn into_parts(
        mut self,
    ) -> (
        RecordedSeries<ActionKey>,
        RecordedSeries<MetricKey>,
        HashMap<ActionKey, ActionError>,
    ) {
        (
            std::mem::take(&mut self.results),
            std::mem::take(&mut self.metrics),
            std::mem::take(&mut self.errors),
        )
    }

    pub(crate) fn absorb_errors(&mut self, errors: HashMap<ActionKey, ActionError>) {
        self.errors.extend(errors);
    }
}

/// Cancellation is structured: dropping a session (including via worker
/// abort) releases every fork it still tracks, recursively through their
/// own sessions.
impl Drop for Session {
    fn drop(&mut self) {
        if self.async_tasks.is_empty() {
            return;
        }
        let pending: usize = self.async_tasks.values().map(Vec::len).sum();
        debug!(session = %self.id, pending, "aborting unjoined forks");
        for tasks in self.async_tasks.values() {
            for task in tasks {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("unit", Config::new(), Arc::new(Registry::new()))
    }

    fn call_key(name: &str) -> ActionKey {
        ActionKey::Call {
            name: name.to_owned(),
        }
    }

    #[test]
    fn results_coalesce_newest_first() {
        let mut session = session();
        session.add_result(call_key("a"), Value::Int(1));
        session.add_result(call_key("a"), Value::Int(2));
        session.add_result(call_key("a"), Value::Int(3));

        let values = session.result_values(&call_key("a"));
        assert_eq!(values, vec![&Value::Int(3), &Value::Int(2), &Value::Int(1)]);
    }

    #[test]
    fn distinct_paths_are_distinct_keys() {
        let mut session = session();
        session.add_result(
            ActionKey::Http {
                method: HttpMethod::Get,
                path: "/a".to_owned(),
            },
            Value::Int(1),
        );

        let other = ActionKey::Http {
            method: HttpMethod::Get,
            path: "/b".to_owned(),
        };
        assert!(session.result_values(&other).is_empty());
    }

    #[test]
    fn errors_overwrite_per_key() {
        let mut session = session();
        session.record_error(
            call_key("a"),
            ActionError::UnknownCallback { name: "x".into() },
        );
        session.record_error(
            call_key("a"),
            ActionError::UnknownCallback { name: "y".into() },
        );

        assert_eq!(session.errors().len(), 1);
        let recorded = session.errors().get(&call_key("a")).expect("error kept");
        assert!(matches!(
            recorded,
            ActionError::UnknownCallback { name } if name == "y"
        ));
    }

    #[test]
    fn update_assign_sees_current_value() {
        let mut session = session();
        session.assign("count", 1i64);
        session.update_assign("count", |current| {
            Value::Int(current.and_then(Value::as_int).unwrap_or_default() + 1)
        });
        assert_eq!(session.assigned("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn session_name_falls_back_to_scenario() {
        let unnamed = session();
        assert_eq!(unnamed.name(), "unit");

        let named = Session::new(
            "unit",
            Config::new().with_session_name("primary"),
            Arc::new(Registry::new()),
        );
        assert_eq!(named.name(), "primary");
    }

    #[tokio::test]
    async fn add_then_remove_every_task_clears_the_name() {
        let mut session = session();
        let first = TaskHandle::new(
            "work".to_owned(),
            tokio::spawn(async { Session::new("child", Config::new(), Arc::new(Registry::new())) }),
        );
        let second = TaskHandle::new(
            "work".to_owned(),
            tokio::spawn(async { Session::new("child", Config::new(), Arc::new(Registry::new())) }),
        );
        let (first_id, second_id) = (first.id(), second.id());

        session.add_async_task("work", first);
        session.add_async_task("work", second);
        assert!(session.has_pending_task("work"));

        let removed = session.remove_async_task("work", first_id).expect("first");
        removed.abort();
        let removed = session.remove_async_task("work", second_id).expect("second");
        removed.abort();
        assert!(!session.has_pending_task("work"));
    }

    #[test]
    fn fork_copies_assigns_but_not_recorded_state() {
        let mut parent = session();
        parent.assign("shared", "value");
        parent.add_result(call_key("a"), Value::Int(1));

        let child = parent.fork();
        assert_eq!(child.assigned("shared"), Some(&Value::Text("value".into())));
        assert!(child.results().is_empty());
        assert!(child.errors().is_empty());
        assert_ne!(child.id(), parent.id());
    }
}
