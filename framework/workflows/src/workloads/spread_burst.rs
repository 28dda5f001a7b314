use std::time::Duration;

use async_trait::async_trait;
use stampede_core::{DynError, Scenario, Session};

/// Fans a registered callback out at a fixed rate over an interval, then
/// joins every fork before finishing.
#[derive(Clone, Debug)]
pub struct SpreadBurstWorkload {
    callback: String,
    rate: u32,
    interval: Duration,
}

impl SpreadBurstWorkload {
    #[must_use]
    pub fn new(callback: impl Into<String>, rate: u32, interval: Duration) -> Self {
        Self {
            callback: callback.into(),
            rate,
            interval,
        }
    }

    /// Build from a raw rate, returning `None` when zero is given.
    #[must_use]
    pub fn with_rate(callback: impl Into<String>, rate: u32, interval: Duration) -> Option<Self> {
        (rate > 0).then(|| Self::new(callback, rate, interval))
    }

    #[must_use]
    pub const fn rate(&self) -> u32 {
        self.rate
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Scenario for SpreadBurstWorkload {
    fn name(&self) -> &str {
        "spread_burst"
    }

    async fn run(&self, session: &mut Session) -> Result<(), DynError> {
        tracing::info!(
            session = %session.id(),
            callback = %self.callback,
            rate = self.rate,
            interval_ms = self.interval.as_millis(),
            "starting spread burst"
        );

        session
            .spread(&self.callback, self.rate, self.interval)
            .await;
        session.await_all(&self.callback).await;
        Ok(())
    }
}
