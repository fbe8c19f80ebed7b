//! Watcher: the single driver of ingestion.
//!
//! Reads each registered event source past its watermark, hands every event to every listener
//! in registration order, and commits the watermark after each applied batch. Catch-up
//! ([Watcher::init]) and live polling ([Watcher::run]) share the same delivery path.
//!
//! A listener's `Fatal` error halts the chain it came from: the watermark of the last event
//! applied to all listeners is committed and the chain stops until [Watcher::resume]. Other
//! chains keep going. Under [Watcher::run] a halted chain's loop parks until it is resumed or
//! the watcher is closed, then replays from the failed event. Source read failures are retried
//! with backoff and, during live polling, simply retried again on the next interval since
//! nothing was applied.

use crate::config::WatcherConfig;
use crate::cursor::Cursor;
use crate::event::{Event, EventKey};
use crate::listener::{Listener, ListenerError};
use crate::retry::{retry, RetryExhausted, RetryPolicy};
use crate::source::EventSource;
use crate::watermark::{MemoryWatermarkStore, WatermarkStore};
use futures_util::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("fatal ingestion on chain {chain_id} at {key} in listener {listener}: {source:#}")]
    FatalIngestion {
        chain_id: u64,
        key: EventKey,
        listener: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("event source for chain {chain_id}: {source}")]
    Source {
        chain_id: u64,
        #[source]
        source: RetryExhausted,
    },
    #[error("watermark store for chain {chain_id}: {source}")]
    Watermark {
        chain_id: u64,
        #[source]
        source: RetryExhausted,
    },
    #[error("chain {chain_id} halted: {reason}")]
    Halted { chain_id: u64, reason: String },
    #[error("unknown chain {0}")]
    UnknownChain(u64),
    #[error("watcher has no event sources")]
    NoSources,
    #[error("duplicate event source for chain {0}")]
    DuplicateChain(u64),
}

struct ChainEntry {
    chain_id: u64,
    source: Arc<dyn EventSource>,
    cursor: Mutex<Cursor>,
    /// Bumped by [Watcher::resume]; wakes a parked polling loop.
    resumed: watch::Sender<u64>,
}

/// Builder for the watcher.
pub struct WatcherBuilder {
    sources: Vec<(u64, Arc<dyn EventSource>)>,
    store: Option<Arc<dyn WatermarkStore>>,
    listeners: Vec<Arc<dyn Listener>>,
    config: WatcherConfig,
    retry: RetryPolicy,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            store: None,
            listeners: Vec::new(),
            config: WatcherConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Add the event source for `chain_id`. One source per chain.
    pub fn source(mut self, chain_id: u64, source: Arc<dyn EventSource>) -> Self {
        self.sources.push((chain_id, source));
        self
    }

    /// Watermark persistence. Defaults to [MemoryWatermarkStore].
    pub fn store(mut self, store: Arc<dyn WatermarkStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a listener; delivery follows registration order.
    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn build(self) -> Result<Watcher, WatcherError> {
        if self.sources.is_empty() {
            return Err(WatcherError::NoSources);
        }
        let mut chains: Vec<ChainEntry> = Vec::with_capacity(self.sources.len());
        for (chain_id, source) in self.sources {
            if chains.iter().any(|c| c.chain_id == chain_id) {
                return Err(WatcherError::DuplicateChain(chain_id));
            }
            chains.push(ChainEntry {
                chain_id,
                source,
                cursor: Mutex::new(Cursor::default()),
                resumed: watch::channel(0).0,
            });
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryWatermarkStore::new()));
        let (applied_tx, _) = broadcast::channel(1024);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Watcher {
            config: self.config,
            retry: self.retry,
            store,
            chains,
            listeners: RwLock::new(self.listeners),
            delivery: Mutex::new(()),
            applied_tx,
            shutdown_tx,
        })
    }
}

impl Default for WatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives event sources into listeners. See the module docs for failure semantics.
pub struct Watcher {
    config: WatcherConfig,
    retry: RetryPolicy,
    store: Arc<dyn WatermarkStore>,
    chains: Vec<ChainEntry>,
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    /// Serializes delivery across chains so listeners see one event at a time.
    delivery: Mutex<()>,
    applied_tx: broadcast::Sender<Event>,
    shutdown_tx: watch::Sender<bool>,
}

impl Watcher {
    pub fn builder() -> WatcherBuilder {
        WatcherBuilder::new()
    }

    /// Register more listeners. Ones added after [Watcher::init] only see events from then on.
    pub async fn add(&self, listeners: impl IntoIterator<Item = Arc<dyn Listener>>) {
        let mut current = self.listeners.write().await;
        for l in listeners {
            tracing::debug!(listener = l.name(), "listener registered");
            current.push(l);
        }
    }

    /// Listener names in delivery order.
    pub async fn listener_names(&self) -> Vec<String> {
        self.listeners
            .read()
            .await
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.chain_id).collect()
    }

    /// Events after they have been applied to every listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.applied_tx.subscribe()
    }

    /// Key of the last event applied on `chain_id`. None at genesis or for an unknown chain.
    pub async fn watermark(&self, chain_id: u64) -> Option<EventKey> {
        let entry = self.chains.iter().find(|c| c.chain_id == chain_id)?;
        let cursor = entry.cursor.lock().await;
        cursor.watermark
    }

    /// Halt reason for `chain_id`, if it stopped ingesting.
    pub async fn halted(&self, chain_id: u64) -> Option<String> {
        let entry = self.chains.iter().find(|c| c.chain_id == chain_id)?;
        let cursor = entry.cursor.lock().await;
        cursor.halted.clone()
    }

    /// Catch every chain up from its persisted watermark (or genesis).
    ///
    /// Every chain is attempted; the first error is returned after all have run.
    pub async fn init(&self) -> Result<(), WatcherError> {
        let mut first_err = None;
        for entry in &self.chains {
            match self.sync_chain(entry).await {
                Ok(count) => {
                    let watermark = entry.cursor.lock().await.watermark;
                    tracing::info!(
                        chain_id = entry.chain_id,
                        events = count,
                        watermark = ?watermark,
                        "catch-up complete"
                    );
                }
                Err(e) => {
                    tracing::error!(chain_id = entry.chain_id, reason = %e, "catch-up failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One polling cycle for `chain_id`: apply everything currently past the watermark.
    /// Returns the number of events delivered.
    pub async fn poll_once(&self, chain_id: u64) -> Result<usize, WatcherError> {
        let entry = self
            .chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or(WatcherError::UnknownChain(chain_id))?;
        self.sync_chain(entry).await
    }

    /// Clear a halt and reload the watermark from the store on the next poll.
    ///
    /// A polling loop parked on the halt wakes and replays from the failed event.
    pub async fn resume(&self, chain_id: u64) -> Result<(), WatcherError> {
        let entry = self
            .chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or(WatcherError::UnknownChain(chain_id))?;
        {
            let mut cursor = entry.cursor.lock().await;
            if let Some(reason) = cursor.halted.take() {
                tracing::info!(chain_id, %reason, "resuming halted chain");
            }
            cursor.loaded = false;
        }
        entry.resumed.send_modify(|generation| *generation += 1);
        Ok(())
    }

    /// Follow every chain until [Watcher::close]. Call from a spawned task.
    pub async fn run(self: Arc<Self>) {
        let tasks = (0..self.chains.len()).map(|idx| {
            let watcher = Arc::clone(&self);
            tokio::spawn(async move { watcher.follow(idx).await })
        });
        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                tracing::error!(reason = %e, "chain task panicked");
            }
        }
        tracing::info!("watcher stopped");
    }

    /// Ask every polling loop to stop after its current batch.
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn follow(&self, idx: usize) {
        let entry = &self.chains[idx];
        let chain_id = entry.chain_id;
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut notify = entry.source.subscribe();
        let mut resumed = entry.resumed.subscribe();
        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }
            match self.sync_chain(entry).await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(chain_id, events = count, "poll applied events"),
                Err(e) => {
                    let halted = entry.cursor.lock().await.halted.is_some();
                    if halted {
                        tracing::error!(chain_id, reason = %e, "chain halted, waiting for resume");
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = resumed.changed() => {}
                        }
                        continue;
                    }
                    tracing::warn!(chain_id, reason = %e, "poll failed, retrying next interval");
                }
            }
            tokio::select! {
                _ = sleep(self.config.poll_interval()) => {}
                _ = shutdown.changed() => {}
                _ = resumed.changed() => {}
                _ = next_notification(&mut notify) => {}
            }
        }
        tracing::info!(chain_id, "polling loop stopped");
    }

    async fn sync_chain(&self, entry: &ChainEntry) -> Result<usize, WatcherError> {
        let chain_id = entry.chain_id;
        let mut cursor = entry.cursor.lock().await;
        if let Some(reason) = &cursor.halted {
            return Err(WatcherError::Halted {
                chain_id,
                reason: reason.clone(),
            });
        }
        if !cursor.loaded {
            let store = Arc::clone(&self.store);
            let persisted = retry("load_watermark", &self.retry, || {
                let store = Arc::clone(&store);
                async move { store.load(chain_id).await.map_err(anyhow::Error::from) }
            })
            .await
            .map_err(|source| WatcherError::Watermark { chain_id, source })?;
            *cursor = Cursor::new(persisted);
            tracing::info!(chain_id, watermark = ?persisted, "watermark loaded");
        }

        let limit = self.config.batch_size.max(1);
        let mut delivered = 0;
        loop {
            let after = cursor.watermark;
            let source = Arc::clone(&entry.source);
            let mut batch = retry("list_events_since", &self.retry, || {
                let source = Arc::clone(&source);
                async move { source.list_events_since(chain_id, after, limit).await }
            })
            .await
            .map_err(|source| WatcherError::Source { chain_id, source })?;
            if batch.is_empty() {
                break;
            }
            let fetched = batch.len();
            batch.sort_by_key(|e| e.key);
            let listeners = self.listeners.read().await.clone();

            for ev in batch {
                if ev.key.chain_id != chain_id || !cursor.is_new(&ev.key) {
                    tracing::warn!(
                        chain_id,
                        key = %ev.key,
                        "source returned an event at or below the watermark, skipping"
                    );
                    continue;
                }
                if let Err(e) = self.deliver(&listeners, &ev).await {
                    if let Err(commit_err) = self.commit(chain_id, &mut cursor).await {
                        tracing::error!(
                            chain_id,
                            reason = %commit_err,
                            "commit after fatal event failed"
                        );
                    }
                    cursor.halted = Some(e.to_string());
                    return Err(e);
                }
                cursor.advance(ev.key);
                delivered += 1;
                let _ = self.applied_tx.send(ev);
            }

            if let Err(e) = self.commit(chain_id, &mut cursor).await {
                cursor.halted = Some(e.to_string());
                return Err(e);
            }
            tracing::info!(
                chain_id,
                fetched,
                watermark = ?cursor.watermark,
                "applied batch"
            );
            if fetched < limit || cursor.watermark == after {
                break;
            }
        }
        Ok(delivered)
    }

    async fn deliver(
        &self,
        listeners: &[Arc<dyn Listener>],
        ev: &Event,
    ) -> Result<(), WatcherError> {
        let _guard = self.delivery.lock().await;
        for listener in listeners {
            match listener.on_event(ev).await {
                Ok(()) => {}
                Err(ListenerError::Ignorable(reason)) => {
                    tracing::warn!(
                        listener = listener.name(),
                        key = %ev.key,
                        kind = ev.kind.name(),
                        %reason,
                        "listener skipped event"
                    );
                }
                Err(ListenerError::Fatal(source)) => {
                    tracing::error!(
                        listener = listener.name(),
                        key = %ev.key,
                        kind = ev.kind.name(),
                        reason = %source,
                        "listener failed"
                    );
                    return Err(WatcherError::FatalIngestion {
                        chain_id: ev.key.chain_id,
                        key: ev.key,
                        listener: listener.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    async fn commit(&self, chain_id: u64, cursor: &mut Cursor) -> Result<(), WatcherError> {
        let key = match cursor.watermark {
            Some(k) if cursor.is_dirty() => k,
            _ => return Ok(()),
        };
        let store = Arc::clone(&self.store);
        retry("save_watermark", &self.retry, || {
            let store = Arc::clone(&store);
            async move { store.save(key).await.map_err(anyhow::Error::from) }
        })
        .await
        .map_err(|source| WatcherError::Watermark { chain_id, source })?;
        cursor.committed = Some(key);
        Ok(())
    }
}

/// Resolves on the next push notification; never resolves without a channel.
async fn next_notification(rx: &mut Option<broadcast::Receiver<u64>>) {
    let closed = match rx.as_mut() {
        Some(r) => matches!(r.recv().await, Err(RecvError::Closed)),
        None => std::future::pending::<bool>().await,
    };
    if closed {
        *rx = None;
    }
}
