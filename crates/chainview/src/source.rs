//! Event sources: append-only, per-chain ordered tables of decoded events.
//!
//! The production source is an external ingestion pipeline; [MemoryEventSource] is a complete
//! in-process implementation used by tests, replays and local tooling.

use crate::event::{Event, EventKey};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Read contract of an event source.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events of `chain_id` with key strictly greater than `after` (all events when None),
    /// ascending, at most `limit`. Deterministic for a given source state.
    async fn list_events_since(
        &self,
        chain_id: u64,
        after: Option<EventKey>,
        limit: usize,
    ) -> anyhow::Result<Vec<Event>>;

    /// Optional push channel carrying the chain id of newly appended rows.
    fn subscribe(&self) -> Option<broadcast::Receiver<u64>> {
        None
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("event {got} does not follow {last} on chain {chain_id}")]
    OutOfOrder {
        chain_id: u64,
        last: EventKey,
        got: EventKey,
    },
}

/// In-memory append-only source. Appends must be strictly increasing per chain.
pub struct MemoryEventSource {
    chains: RwLock<BTreeMap<u64, Vec<Event>>>,
    notify_tx: broadcast::Sender<u64>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            chains: RwLock::new(BTreeMap::new()),
            notify_tx,
        }
    }

    /// Append one event and notify subscribers.
    pub async fn push(&self, event: Event) -> Result<(), SourceError> {
        let chain_id = event.key.chain_id;
        {
            let mut chains = self.chains.write().await;
            let rows = chains.entry(chain_id).or_default();
            if let Some(last) = rows.last() {
                if event.key <= last.key {
                    return Err(SourceError::OutOfOrder {
                        chain_id,
                        last: last.key,
                        got: event.key,
                    });
                }
            }
            rows.push(event);
        }
        let _ = self.notify_tx.send(chain_id);
        Ok(())
    }

    /// Append many events in order; stops at the first out-of-order one.
    pub async fn extend(
        &self,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<(), SourceError> {
        for ev in events {
            self.push(ev).await?;
        }
        Ok(())
    }

    pub async fn len(&self, chain_id: u64) -> usize {
        self.chains
            .read()
            .await
            .get(&chain_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for MemoryEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn list_events_since(
        &self,
        chain_id: u64,
        after: Option<EventKey>,
        limit: usize,
    ) -> anyhow::Result<Vec<Event>> {
        let chains = self.chains.read().await;
        let rows = match chains.get(&chain_id) {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        let start = match after {
            Some(k) => rows.partition_point(|e| e.key <= k),
            None => 0,
        };
        Ok(rows[start..].iter().take(limit).cloned().collect())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<u64>> {
        Some(self.notify_tx.subscribe())
    }
}
