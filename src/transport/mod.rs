pub mod backoff;
pub mod connection;
pub mod network;
pub mod websocket;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, ConnectionStatus};

/// Outbound `{"type":"subscribe","channels":[...]}` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub channels: Vec<String>,
}

impl SubscribeMessage {
    pub fn new(channels: &[String]) -> Self {
        Self {
            kind: "subscribe".to_string(),
            channels: channels.to_vec(),
        }
    }

    pub fn to_frame(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Closed,
}

/// Something the peer did, as seen by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Pong,
    Closed { code: Option<u16>, reason: String },
}

/// One established duplex channel. Owned by a single session at a time.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Transport-level liveness probe; the answer arrives as `TransportEvent::Pong`.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Next inbound event, `None` once the stream has ended. Must be cancel safe.
    async fn next_event(&mut self) -> Option<Result<TransportEvent, TransportError>>;

    /// Best-effort shutdown; never fails.
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
