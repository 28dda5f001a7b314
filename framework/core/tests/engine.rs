use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use stampede_core::{
    ActionKey, Callback, Config, DynError, MetricKey, Recorded, Registry, Session, Value,
    adjust_timeout,
};

fn call_key(name: &str) -> ActionKey {
    ActionKey::Call {
        name: name.to_owned(),
    }
}

fn task_key(name: &str) -> ActionKey {
    ActionKey::Task {
        name: name.to_owned(),
    }
}

/// Records one integer result under its own call key.
struct RecordResult {
    key: String,
    value: i64,
}

impl Callback for RecordResult {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            session.add_result(call_key(&self.key), Value::Int(self.value));
            session.add_metric(
                MetricKey::Custom(format!("{}_samples", self.key)),
                Value::Duration(Duration::from_millis(1)),
            );
            Ok(())
        })
    }
}

/// Appends the invocation instant to a shared log, then records a result.
struct LogStart {
    started: Arc<Mutex<Vec<Instant>>>,
}

impl Callback for LogStart {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            self.started
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(Instant::now());
            session.add_result(call_key("ping"), Value::Int(1));
            Ok(())
        })
    }
}

/// Counts one metric tick per invocation.
struct Tick;

impl Callback for Tick {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            session.add_metric(MetricKey::Custom("ticks".to_owned()), Value::Int(1));
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        })
    }
}

/// Sleeps well past any join deadline used by the tests.
struct Slow;

impl Callback for Slow {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            session.add_result(call_key("slow"), Value::Int(1));
            Ok(())
        })
    }
}

/// Counts invocations across sessions.
struct Count {
    seen: Arc<AtomicUsize>,
}

impl Callback for Count {
    fn invoke<'a>(
        &'a self,
        _session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            self.seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

struct Failing;

impl Callback for Failing {
    fn invoke<'a>(
        &'a self,
        _session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move { Err("deliberate failure".into()) })
    }
}

fn session_with(registry: Registry, config: Config) -> Session {
    Session::new("engine-test", config, Arc::new(registry))
}

#[tokio::test]
async fn forked_results_merge_tagged_under_the_task_name() {
    let registry = Registry::new().register(
        "work",
        RecordResult {
            key: "inner".to_owned(),
            value: 7,
        },
    );
    let mut session = session_with(registry, Config::new());

    session.spawn("work", Vec::new()).await;
    session.spawn("work", Vec::new()).await;
    assert!(session.has_pending_task("work"));

    session.await_tasks("work").await;

    assert!(!session.has_pending_task("work"));
    let entries = session
        .results()
        .get(&task_key("work"))
        .expect("merged entries present");
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert!(matches!(entry, Recorded::Async { key, .. } if *key == call_key("inner")));
        assert_eq!(entry.value(), &Value::Int(7));
    }

    // Metrics round-trip the same way, under a series named after the task.
    let samples = session
        .metrics()
        .get(&MetricKey::Custom("work".to_owned()))
        .expect("metrics merged");
    assert_eq!(samples.len(), 2);
}

#[tokio::test]
async fn await_is_idempotent_without_new_forks() {
    let registry = Registry::new().register(
        "work",
        RecordResult {
            key: "inner".to_owned(),
            value: 1,
        },
    );
    let mut session = session_with(registry, Config::new());

    session.spawn("work", Vec::new()).await;
    session.await_tasks("work").await;
    let after_first = session.results().get(&task_key("work")).cloned();

    session.await_tasks("work").await;
    assert_eq!(session.results().get(&task_key("work")), after_first.as_ref());
}

#[tokio::test]
async fn spread_paces_forks_across_the_interval() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new().register(
        "ping",
        LogStart {
            started: Arc::clone(&started),
        },
    );
    let mut session = session_with(registry, Config::new());

    let begun = Instant::now();
    session
        .spread("ping", 4, adjust_timeout(Duration::from_millis(400)))
        .await;
    let spawn_window = begun.elapsed();

    // Last fork starts at interval * 3/4; spawning must cover that window
    // but not the whole interval.
    assert!(spawn_window >= Duration::from_millis(250), "window {spawn_window:?}");

    session.await_tasks("ping").await;
    let entries = session
        .results()
        .get(&task_key("ping"))
        .expect("all forks joined");
    assert_eq!(entries.len(), 4);

    let starts = started
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    assert_eq!(starts.len(), 4);
}

#[tokio::test]
async fn loop_runs_until_the_deadline() {
    let registry = Registry::new().register("tick", Tick);
    let mut session = session_with(registry, Config::new());

    let begun = Instant::now();
    session
        .loop_call("tick", Duration::from_millis(300))
        .await;
    let elapsed = begun.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    let ticks = session.metric_values(&MetricKey::Custom("ticks".to_owned()));
    assert!(!ticks.is_empty());
}

#[tokio::test]
async fn loop_survives_inner_failures() {
    let registry = Registry::new().register("broken", Failing);
    let mut session = session_with(registry, Config::new());

    session
        .loop_call("broken", Duration::from_millis(50))
        .await;

    assert!(session.errors().contains_key(&call_key("broken")));
    assert!(session.results().is_empty());
}

#[tokio::test]
async fn join_timeout_aborts_the_child_and_merges_nothing() {
    let registry = Registry::new().register("slow", Slow);
    let mut session = session_with(registry, Config::new().with_timeout_ms(300));

    session.spawn("slow", Vec::new()).await;

    let begun = Instant::now();
    session.await_tasks("slow").await;
    let elapsed = begun.elapsed();

    assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(session.results().is_empty());
    assert!(!session.has_pending_task("slow"));

    let reason = session
        .errors()
        .get(&ActionKey::Await {
            name: "slow".to_owned(),
        })
        .expect("join timeout recorded");
    assert!(reason.is_join_timeout());
}

#[tokio::test]
async fn failing_action_records_error_and_continues() {
    let registry = Registry::new().register("broken", Failing);
    let mut session = session_with(registry, Config::new());

    session.call("broken", Vec::new()).await;

    assert!(session.results().is_empty());
    assert!(session.errors().contains_key(&call_key("broken")));

    // The session stays usable after a failure.
    session.add_result(call_key("next"), Value::Int(1));
    assert_eq!(session.result_values(&call_key("next")), vec![&Value::Int(1)]);
}

#[tokio::test]
async fn unknown_callback_is_a_recorded_error() {
    let mut session = session_with(Registry::new(), Config::new());
    session.spawn("ghost", Vec::new()).await;

    assert!(!session.has_pending_task("ghost"));
    assert!(session.errors().contains_key(&task_key("ghost")));
}

#[tokio::test]
async fn with_response_sees_every_joined_response() {
    let seen = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new().register(
        "work",
        RecordResult {
            key: "inner".to_owned(),
            value: 3,
        },
    );
    let mut session = session_with(registry, Config::new());

    session.spawn("work", Vec::new()).await;
    session.spawn("work", Vec::new()).await;

    let counter = Count {
        seen: Arc::clone(&seen),
    };
    session.with_response("work", &counter).await;

    assert!(!session.has_pending_task("work"));
    assert_eq!(seen.load(Ordering::Relaxed), 2);
}
