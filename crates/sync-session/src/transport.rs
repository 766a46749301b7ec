use async_trait::async_trait;

use crate::error::Result;

/// One frame off (or onto) the wire, transport-agnostic.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// The host's duplex message channel — deliberately out of scope for this
/// crate (spec.md §1: "provided by the host HTTP framework"). `sync-gateway`
/// supplies the Axum WebSocket implementation; tests use an in-memory one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;
    async fn send_binary(&self, bytes: Vec<u8>) -> Result<()>;
    /// `Ok(None)` on a clean close, `Err` on a transport-level failure.
    async fn recv(&self) -> Result<Option<InboundFrame>>;
    async fn close(&self) -> Result<()>;
}
