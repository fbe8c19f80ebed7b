//! Listener contract: passive components fed one event at a time by the watcher.

use crate::event::Event;
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a listener for one event.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Event is unusable for this listener (e.g. a malformed optional field). Logged and skipped.
    #[error("ignorable: {0}")]
    Ignorable(String),
    /// Derived state cannot be trusted past this event; ingestion stops.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Receives events in watermark order. Implementations must tolerate being handed the same
/// event again after a restart (replay from the last committed watermark).
#[async_trait]
pub trait Listener: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    async fn on_event(&self, event: &Event) -> Result<(), ListenerError>;
}
