use std::time::Duration;

use async_trait::async_trait;
use stampede_core::{Action, DynError, Scenario, Session};

use crate::util::start_delay;

/// Hammers one HTTP path with GET requests for a fixed window.
///
/// Each request records a timing sample, so a run's results double as a
/// latency series for the blasted path.
#[derive(Clone, Debug)]
pub struct HttpBlastWorkload {
    path: String,
    duration: Duration,
}

impl HttpBlastWorkload {
    #[must_use]
    pub fn new(path: impl Into<String>, duration: Duration) -> Self {
        Self {
            path: path.into(),
            duration,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl Scenario for HttpBlastWorkload {
    fn name(&self) -> &str {
        "http_blast"
    }

    async fn init(&self, session: &mut Session) -> Result<(), DynError> {
        start_delay(session).await;
        Ok(())
    }

    async fn run(&self, session: &mut Session) -> Result<(), DynError> {
        tracing::info!(
            session = %session.id(),
            path = %self.path,
            duration_ms = self.duration.as_millis(),
            "starting http blast"
        );
        session
            .loop_for(Action::http_get(self.path.clone()), self.duration)
            .await;
        Ok(())
    }
}
