use async_trait::async_trait;
use stampede_core::{DynError, Scenario, Session, WsFrame};

use crate::util::start_delay;

/// Connects a websocket and plays send/recv rounds against an echoing peer.
#[derive(Clone, Debug)]
pub struct WsEchoWorkload {
    path: String,
    rounds: u32,
    payload: String,
}

impl WsEchoWorkload {
    #[must_use]
    pub fn new(path: impl Into<String>, rounds: u32) -> Self {
        Self {
            path: path.into(),
            rounds,
            payload: "ping".to_owned(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[async_trait]
impl Scenario for WsEchoWorkload {
    fn name(&self) -> &str {
        "ws_echo"
    }

    async fn init(&self, session: &mut Session) -> Result<(), DynError> {
        start_delay(session).await;
        Ok(())
    }

    async fn run(&self, session: &mut Session) -> Result<(), DynError> {
        tracing::info!(
            session = %session.id(),
            path = %self.path,
            rounds = self.rounds,
            "starting ws echo"
        );

        session.ws_connect(&self.path).await;
        for _ in 0..self.rounds {
            session.ws_send(WsFrame::Text(self.payload.clone())).await;
            session.ws_recv().await;
        }
        Ok(())
    }
}
