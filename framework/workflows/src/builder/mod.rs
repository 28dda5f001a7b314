use std::time::Duration;

use stampede_core::{Config, EnvironmentBuilder};

use crate::workloads::{
    http_blast::HttpBlastWorkload, spread_burst::SpreadBurstWorkload, ws_echo::WsEchoWorkload,
};

#[derive(Debug, thiserror::Error)]
pub enum BuilderInputError {
    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },
}

/// Extension methods for assembling environments from common load patterns.
pub trait EnvironmentBuilderExt: Sized {
    /// Add `concurrency` sessions hammering `path` for `duration`.
    #[must_use]
    fn http_blast(self, path: &str, duration: Duration, concurrency: usize) -> Self;

    /// Add a websocket echo session playing `rounds` send/recv pairs.
    #[must_use]
    fn ws_echo(self, path: &str, rounds: u32) -> Self;

    /// Add a spread burst of the registered `callback`. A zero rate is
    /// ignored with a warning.
    #[must_use]
    fn spread_burst(self, callback: &str, rate: u32, interval: Duration) -> Self;

    /// Like `spread_burst`, but returns an error instead of ignoring a
    /// zero rate.
    fn try_spread_burst(
        self,
        callback: &str,
        rate: u32,
        interval: Duration,
    ) -> Result<Self, BuilderInputError>;
}

impl EnvironmentBuilderExt for EnvironmentBuilder {
    fn http_blast(self, path: &str, duration: Duration, concurrency: usize) -> Self {
        self.run_many(
            concurrency,
            HttpBlastWorkload::new(path, duration),
            Config::new(),
        )
    }

    fn ws_echo(self, path: &str, rounds: u32) -> Self {
        self.run(WsEchoWorkload::new(path, rounds), Config::new())
    }

    fn spread_burst(self, callback: &str, rate: u32, interval: Duration) -> Self {
        let Some(workload) = SpreadBurstWorkload::with_rate(callback, rate, interval) else {
            tracing::warn!(callback, "spread burst rate must be non-zero; ignoring");
            return self;
        };
        self.run(workload, Config::new())
    }

    fn try_spread_burst(
        self,
        callback: &str,
        rate: u32,
        interval: Duration,
    ) -> Result<Self, BuilderInputError> {
        let workload = SpreadBurstWorkload::with_rate(callback, rate, interval)
            .ok_or(BuilderInputError::ZeroValue { field: "rate" })?;
        Ok(self.run(workload, Config::new()))
    }
}
