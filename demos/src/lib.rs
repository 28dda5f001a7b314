use futures::future::BoxFuture;
use stampede_core::{Callback, DynError, Session, Value};
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_tracing() {
    let default_level = stampede_env::stampede_log_level().unwrap_or_else(|| "info".to_owned());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

/// Callback used by the spread-burst demo: one GET per fork.
pub struct PingTarget {
    path: String,
}

impl PingTarget {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Callback for PingTarget {
    fn invoke<'a>(
        &'a self,
        session: &'a mut Session,
        _args: &'a [Value],
    ) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            session.get(&self.path).await;
            Ok(())
        })
    }
}
