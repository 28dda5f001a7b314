use std::time::Duration;

use stampede_core::{Config, Environment, TimeLimit};
use stampede_demos::{PingTarget, init_tracing};
use stampede_workflows::EnvironmentBuilderExt as _;
use tracing::info;

#[tokio::main]
async fn main() {
    init_tracing();

    let base_url =
        stampede_env::stampede_base_url().unwrap_or_else(|| "http://127.0.0.1:8080".to_owned());
    let concurrency = stampede_env::stampede_session_count().unwrap_or(4);

    info!(%base_url, concurrency, "assembling local environment");

    let results = Environment::builder("local-blast")
        .default_config(
            Config::new()
                .with_base_url(base_url)
                .with_timeout_ms(5_000)
                .with_scenario_timeout(TimeLimit::from_millis(60_000)),
        )
        .register("ping", PingTarget::new("/"))
        .http_blast("/", Duration::from_secs(10), concurrency)
        .spread_burst("ping", 10, Duration::from_secs(2))
        .build()
        .run()
        .await;

    info!(
        sessions = results.sessions().len(),
        duration_ms = results.duration_ms(),
        "run finished"
    );

    match serde_json::to_string_pretty(&results) {
        Ok(report) => println!("{report}"),
        Err(err) => tracing::error!(%err, "failed to serialize results"),
    }
}
