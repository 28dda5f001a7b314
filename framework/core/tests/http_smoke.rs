use std::sync::Arc;

use stampede_core::{ActionKey, Config, HttpMethod, MetricKey, Registry, Session};

#[tokio::test]
#[ignore = "requires a target service at STAMPEDE_BASE_URL"]
async fn simple_get_records_response_and_timing() {
    let base_url =
        stampede_env::stampede_base_url().unwrap_or_else(|| "http://127.0.0.1:8080".to_owned());

    let mut session = Session::new(
        "http-smoke",
        Config::new().with_base_url(base_url),
        Arc::new(Registry::new()),
    );

    session.get("/").await;

    assert!(session.errors().is_empty());

    let key = ActionKey::Http {
        method: HttpMethod::Get,
        path: "/".to_owned(),
    };
    let responses = session.result_values(&key);
    assert_eq!(responses.len(), 1);
    assert!(responses[0].as_http().is_some());

    let samples = session.metric_values(&MetricKey::Http {
        path: "/".to_owned(),
    });
    assert_eq!(samples.len(), 1);
    assert!(samples[0].as_duration().is_some());
}
