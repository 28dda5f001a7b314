use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use stampede_core::{
    ActionKey, Callback, Config, DynError, Environment, MetricKey, Session, Value,
};
use stampede_workflows::{EnvironmentBuilderExt as _, HttpBlastWorkload, WsEchoWorkload};

struct CountHit {
    seen: Arc<AtomicUsize>,
}

impl Callback for CountHit {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            self.seen.fetch_add(1, Ordering::Relaxed);
            session.add_result(
                ActionKey::Call {
                    name: "hit".to_owned(),
                },
                Value::Int(1),
            );
            Ok(())
        })
    }
}

#[tokio::test]
async fn spread_burst_joins_every_fork() {
    let seen = Arc::new(AtomicUsize::new(0));
    let results = Environment::builder("burst")
        .register(
            "ping",
            CountHit {
                seen: Arc::clone(&seen),
            },
        )
        .spread_burst("ping", 4, Duration::from_millis(400))
        .build()
        .run()
        .await;

    assert_eq!(seen.load(Ordering::Relaxed), 4);
    assert_eq!(results.sessions().len(), 1);

    let session = &results.sessions()[0];
    let merged = session
        .results()
        .get(&ActionKey::Task {
            name: "ping".to_owned(),
        })
        .expect("forks merged");
    assert_eq!(merged.len(), 4);
    assert!(!session.has_pending_task("ping"));
}

#[tokio::test]
async fn zero_rate_burst_is_ignored() {
    let results = Environment::builder("noop")
        .spread_burst("ping", 0, Duration::from_secs(1))
        .build()
        .run()
        .await;

    assert!(results.sessions().is_empty());
}

#[test]
fn try_spread_burst_rejects_zero_rate() {
    let outcome = Environment::builder("invalid").try_spread_burst("ping", 0, Duration::from_secs(1));
    assert!(outcome.is_err());
}

#[tokio::test]
#[ignore = "requires a target service at STAMPEDE_BASE_URL"]
async fn http_blast_records_latency_samples() {
    let base_url =
        stampede_env::stampede_base_url().unwrap_or_else(|| "http://127.0.0.1:8080".to_owned());

    let results = Environment::builder("blast")
        .default_config(Config::new().with_base_url(base_url))
        .run(
            HttpBlastWorkload::new("/", Duration::from_millis(500)),
            Config::new(),
        )
        .build()
        .run()
        .await;

    assert_eq!(results.sessions().len(), 1);
    let session = &results.sessions()[0];
    assert!(session.errors().is_empty());

    let samples = session.metric_values(&MetricKey::Http {
        path: "/".to_owned(),
    });
    assert!(!samples.is_empty());
}

#[tokio::test]
#[ignore = "requires an echoing websocket server at STAMPEDE_BASE_URL"]
async fn ws_echo_round_trips_frames() {
    let base_url =
        stampede_env::stampede_base_url().unwrap_or_else(|| "http://127.0.0.1:8080".to_owned());

    let results = Environment::builder("echo")
        .default_config(Config::new().with_base_url(base_url))
        .run(WsEchoWorkload::new("/echo", 3), Config::new())
        .build()
        .run()
        .await;

    let session = &results.sessions()[0];
    assert!(session.errors().is_empty());
    assert_eq!(session.result_values(&ActionKey::WsRecv).len(), 3);
}
