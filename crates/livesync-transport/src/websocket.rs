//! WebSocket record source
//!
//! Each text or binary frame carries one JSON change envelope. Pings are
//! answered, a Close frame or end of stream ends the connection.

use crate::error::TransportError;
use crate::source::RecordSource;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use livesync_event::RawRecord;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client-mode WebSocket source
pub struct WebSocketSource {
    url: String,
    subscribe_message: Option<String>,
    stream: Option<Stream>,
}

impl WebSocketSource {
    /// Source for `url` (`ws://` or `wss://`)
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscribe_message: None,
            stream: None,
        }
    }

    /// Text frame sent after every successful open
    #[must_use]
    pub fn with_subscribe_message(mut self, message: impl Into<String>) -> Self {
        self.subscribe_message = Some(message.into());
        self
    }

    /// Endpoint URL
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for WebSocketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSource")
            .field("url", &self.url)
            .field("open", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RecordSource for WebSocketSource {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.stream = None;

        let (mut stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: self.url.clone(),
                reason: e.to_string(),
            })?;

        if let Some(message) = &self.subscribe_message {
            stream
                .send(Message::Text(message.clone()))
                .await
                .map_err(|e| TransportError::Connect {
                    endpoint: self.url.clone(),
                    reason: format!("subscribe message rejected: {e}"),
                })?;
            debug!(url = %self.url, "subscribe message sent");
        }

        self.stream = Some(stream);
        Ok(())
    }

    async fn next_record(&mut self) -> Option<Result<RawRecord, TransportError>> {
        let stream = self.stream.as_mut()?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(RawRecord::from_json(&text).map_err(TransportError::from));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Some(RawRecord::from_slice(&data).map_err(TransportError::from));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        self.stream = None;
                        return Some(Err(TransportError::Read(e.to_string())));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(url = %self.url, ?frame, "server closed connection");
                    self.stream = None;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return Some(Err(TransportError::Read(e.to_string())));
                }
                None => {
                    self.stream = None;
                    return None;
                }
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(url = %self.url, error = %e, "close handshake failed");
            }
        }
    }
}
