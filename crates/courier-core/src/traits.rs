//! The channel capability trait consumed by the dispatch engine.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// Lifecycle events published by a channel adapter.
///
/// Broadcast so that several consumers (engine, observability) can each hold
/// a subscription without overwriting one another.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The channel can accept sends.
    Ready,
    /// The channel lost its session; readiness may come back at any time.
    Disconnected { reason: String },
    /// An inbound message arrived on the channel.
    MessageReceived { from: String, body: String },
}

/// An outbound messaging channel that flips between ready and not-ready
/// independently of the engine.
///
/// Readiness observed at one moment says nothing about the next: callers
/// must re-check `is_ready` immediately before every `send`.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the channel can currently accept sends.
    fn is_ready(&self) -> bool;

    /// Send `body` to `to` now. `to` is a digit string; the adapter applies
    /// its own transport addressing.
    async fn send(&self, to: &str, body: &str) -> Result<()>;

    /// Whether `to` is a valid, registered recipient on this channel.
    async fn is_registered(&self, to: &str) -> Result<bool>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}
