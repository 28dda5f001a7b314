use std::time::Duration;

use rand::{Rng as _, thread_rng};
use stampede_core::Session;
use tracing::debug;

/// Honor the scenario-interpreted `delay` and `random_delay` config keys
/// before a workload starts issuing traffic. `random_delay` adds a uniform
/// jitter in `[0, ceiling]` so concurrent sessions do not start in lockstep.
pub async fn start_delay(session: &mut Session) {
    let base = session
        .config()
        .delay
        .map(Duration::from_millis)
        .unwrap_or_default();
    let jitter = session
        .config()
        .random_delay
        .filter(|ceiling| *ceiling > 0)
        .map(|ceiling| Duration::from_millis(thread_rng().gen_range(0..=ceiling)))
        .unwrap_or_default();

    let total = base + jitter;
    if total.is_zero() {
        return;
    }

    debug!(session = %session.id(), delay_ms = total.as_millis(), "applying start delay");
    session.delay(total).await;
}
