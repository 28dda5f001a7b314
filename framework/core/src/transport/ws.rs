use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::debug;

use crate::value::WsFrame;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("no base_url configured for websocket actions")]
    MissingBaseUrl,
    #[error("invalid websocket url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("websocket closed by peer")]
    Closed,
    #[error(transparent)]
    Transport(#[from] tungstenite::Error),
}

/// Derive the websocket endpoint from the session's HTTP base url.
fn ws_url(base_url: Option<&str>, path: &str) -> Result<String, WsError> {
    let base = base_url.ok_or(WsError::MissingBaseUrl)?;
    let scheme_swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    Ok(format!(
        "{}/{}",
        scheme_swapped.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// A live websocket connection owned by exactly one session. Forks never
/// inherit it; each fork must establish its own.
pub struct WsConn {
    path: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsConn {
    /// Open a connection to `path` below the session's base url.
    pub async fn connect(base_url: Option<&str>, path: &str) -> Result<Self, WsError> {
        let url = ws_url(base_url, path)?;
        debug!(%url, "opening websocket");
        let (stream, _response) = connect_async(url.as_str()).await?;
        Ok(Self {
            path: path.to_owned(),
            stream,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn send(&mut self, frame: WsFrame) -> Result<(), WsError> {
        let message = match frame {
            WsFrame::Text(text) => Message::Text(text.into()),
            WsFrame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    /// Wait for the next data frame, skipping protocol frames. The caller
    /// bounds this with its own deadline.
    pub async fn recv(&mut self) -> Result<WsFrame, WsError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(WsFrame::Text(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => return Ok(WsFrame::Binary(bytes.to_vec())),
                Some(Ok(Message::Close(_))) | None => return Err(WsError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    /// Receive with an explicit deadline; `None` when the deadline expires.
    pub async fn recv_timeout(&mut self, deadline: Duration) -> Option<Result<WsFrame, WsError>> {
        tokio::time::timeout(deadline, self.recv()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme_and_joins() {
        let url = ws_url(Some("http://localhost:4000/"), "/socket").expect("url");
        assert_eq!(url, "ws://localhost:4000/socket");

        let secure = ws_url(Some("https://example.test"), "feed").expect("url");
        assert_eq!(secure, "wss://example.test/feed");
    }

    #[test]
    fn ws_url_requires_base() {
        assert!(matches!(ws_url(None, "/socket"), Err(WsError::MissingBaseUrl)));
    }
}
