//! Duplex transport seam and the router that runs one conversation over it.
//!
//! A transport is anything that can deliver [`WireMessage`]s in both
//! directions: the in-memory pair in [`memory`], JSON lines over byte
//! streams in [`lines`], or a websocket adapter supplied by the embedder.

pub mod lines;
pub mod memory;
pub mod messages;
mod router;

pub use messages::{InboundMessage, OutboundMessage, StartMessage};
pub use router::ConversationRouter;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// One framed message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unsupported frame: {0}")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait TransportReader: Send {
    /// Next inbound message; `Ok(None)` once the peer has disconnected.
    ///
    /// Must be cancel safe: the router races it against session shutdown.
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError>;
}

#[async_trait]
pub trait TransportWriter: Send {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Whether audio may be sent as binary frames instead of base64 JSON.
    fn supports_binary(&self) -> bool {
        true
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
