//! Common helpers for integration tests.
#![allow(dead_code)]

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chainview::{
    Event, EventKey, EventKind, EventSource, Listener, ListenerError, MemoryEventSource,
    RetryPolicy,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chainview=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: Duration::ZERO,
    }
}

pub fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn key(chain_id: u64, block: u64) -> EventKey {
    EventKey::new(chain_id, block, 0, 0)
}

pub fn transfer(chain_id: u64, block: u64) -> Event {
    Event::new(
        key(chain_id, block),
        EventKind::Transfer {
            from: Address::ZERO,
            to: addr(1),
            amount: U256::from(block),
        },
    )
}

pub fn name_registered(block: u64, name: &str, who: Address) -> Event {
    Event::new(
        key(1, block),
        EventKind::NameRegistered {
            name: name.into(),
            addr: who,
        },
    )
}

pub fn invite(block: u64, inviter: Option<Address>, invitee: Address) -> Event {
    Event::new(key(1, block), EventKind::InviteRedeemed { inviter, invitee })
}

pub fn request_created(block: u64, id: u64, recipient: Address, dollars: u64) -> Event {
    Event::new(
        key(1, block),
        EventKind::RequestCreated {
            id: U256::from(id),
            recipient,
            amount: U256::from(dollars * 1_000_000),
            memo: format!("pay me {dollars}"),
            created_at: 1_700_000_000 + block,
        },
    )
}

pub fn request_fulfilled(block: u64, id: u64, fulfiller: Address) -> Event {
    Event::new(
        key(1, block),
        EventKind::RequestFulfilled {
            id: U256::from(id),
            fulfiller,
            fulfilled_at: 1_700_000_000 + block,
        },
    )
}

/// Records every key it sees; fails fatally on `fail_block` while armed.
pub struct TripwireListener {
    fail_chain: Option<u64>,
    fail_block: u64,
    armed: AtomicBool,
    seen: Mutex<Vec<EventKey>>,
}

impl TripwireListener {
    /// Trips on `fail_block` of any chain.
    pub fn new(fail_block: u64) -> Arc<Self> {
        Self::build(None, fail_block)
    }

    /// Trips on `fail_block` of `chain_id` only.
    pub fn on_chain(chain_id: u64, fail_block: u64) -> Arc<Self> {
        Self::build(Some(chain_id), fail_block)
    }

    fn build(fail_chain: Option<u64>, fail_block: u64) -> Arc<Self> {
        Arc::new(Self {
            fail_chain,
            fail_block,
            armed: AtomicBool::new(true),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn trips_on(&self, key: &EventKey) -> bool {
        self.armed.load(Ordering::SeqCst)
            && key.block_number == self.fail_block
            && self.fail_chain.map_or(true, |c| c == key.chain_id)
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<EventKey> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Listener for TripwireListener {
    fn name(&self) -> &str {
        "tripwire"
    }

    async fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        if self.trips_on(&event.key) {
            return Err(anyhow::anyhow!("tripwire at block {}", self.fail_block).into());
        }
        self.seen.lock().unwrap().push(event.key);
        Ok(())
    }
}

/// Rejects `skip_block` as ignorable; records the keys it accepted.
pub struct SkippingListener {
    skip_block: u64,
    accepted: Mutex<Vec<EventKey>>,
}

impl SkippingListener {
    pub fn new(skip_block: u64) -> Arc<Self> {
        Arc::new(Self {
            skip_block,
            accepted: Mutex::new(Vec::new()),
        })
    }

    pub fn accepted(&self) -> Vec<EventKey> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Listener for SkippingListener {
    fn name(&self) -> &str {
        "skipping"
    }

    async fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        if event.key.block_number == self.skip_block {
            return Err(ListenerError::Ignorable(format!(
                "block {} not for us",
                self.skip_block
            )));
        }
        self.accepted.lock().unwrap().push(event.key);
        Ok(())
    }
}

/// Source whose first `failures` reads error out.
pub struct FlakySource {
    inner: MemoryEventSource,
    failures: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakySource {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryEventSource::new(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryEventSource {
        &self.inner
    }
}

#[async_trait]
impl EventSource for FlakySource {
    async fn list_events_since(
        &self,
        chain_id: u64,
        after: Option<EventKey>,
        limit: usize,
    ) -> anyhow::Result<Vec<Event>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("connection reset");
        }
        self.inner.list_events_since(chain_id, after, limit).await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<u64>> {
        self.inner.subscribe()
    }
}
