//! RequestIndexer: payment requests joined with their fulfillments.

use crate::event::{Event, EventKey, EventKind};
use crate::listener::{Listener, ListenerError};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Token base units per dollar (6-decimal stablecoin).
const UNITS_PER_DOLLAR: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fulfillment {
    pub by: Address,
    pub at: u64,
    pub key: EventKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub id: U256,
    pub recipient: Address,
    /// Token base units.
    pub amount: U256,
    pub memo: String,
    pub created_at: u64,
    pub created_key: EventKey,
    pub fulfilled: Option<Fulfillment>,
}

impl Request {
    pub fn status(&self) -> RequestStatus {
        match self.fulfilled {
            Some(_) => RequestStatus::Fulfilled,
            None => RequestStatus::Pending,
        }
    }

    /// Amount as dollars with cents, truncated (`"12.50"`).
    pub fn amount_dollars(&self) -> String {
        let unit = U256::from(UNITS_PER_DOLLAR);
        let whole = self.amount / unit;
        let cents = (self.amount % unit).as_limbs()[0] / (UNITS_PER_DOLLAR / 100);
        format!("{whole}.{cents:02}")
    }
}

#[derive(Debug, Default)]
struct RequestBook {
    by_id: HashMap<U256, Request>,
    /// Request ids per recipient in creation order.
    by_recipient: HashMap<Address, Vec<U256>>,
    pending: usize,
}

#[derive(Debug, Default)]
pub struct RequestIndexer {
    book: RwLock<RequestBook>,
}

impl RequestIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: U256) -> Option<Request> {
        self.book.read().await.by_id.get(&id).cloned()
    }

    /// Requests addressed to `recipient`, oldest first.
    pub async fn get_requests_by_recipient(&self, recipient: &Address) -> Vec<Request> {
        let book = self.book.read().await;
        book.by_recipient
            .get(recipient)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| book.by_id.get(id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    pub async fn pending_count(&self) -> usize {
        self.book.read().await.pending
    }

    pub async fn len(&self) -> usize {
        self.book.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn create(&self, key: EventKey, request: Request) {
        let mut book = self.book.write().await;
        if let Some(existing) = book.by_id.get(&request.id) {
            if *existing != request {
                tracing::warn!(
                    %key,
                    id = %request.id,
                    first = %existing.created_key,
                    "conflicting request creation ignored"
                );
            } else {
                tracing::debug!(%key, id = %request.id, "request creation replayed");
            }
            return;
        }
        tracing::debug!(%key, id = %request.id, recipient = %request.recipient, "request created");
        book.by_recipient
            .entry(request.recipient)
            .or_default()
            .push(request.id);
        book.pending += 1;
        book.by_id.insert(request.id, request);
    }

    async fn fulfill(&self, key: EventKey, id: U256, by: Address, at: u64) {
        let mut book = self.book.write().await;
        let Some(request) = book.by_id.get_mut(&id) else {
            tracing::warn!(%key, %id, fulfiller = %by, "fulfillment for unknown request ignored");
            return;
        };
        if let Some(previous) = &request.fulfilled {
            if previous.key != key {
                tracing::warn!(%key, %id, first = %previous.key, "request already fulfilled");
            }
            return;
        }
        request.fulfilled = Some(Fulfillment { by, at, key });
        book.pending -= 1;
        tracing::debug!(%key, %id, fulfiller = %by, "request fulfilled");
    }
}

#[async_trait]
impl Listener for RequestIndexer {
    fn name(&self) -> &str {
        "requests"
    }

    async fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        match &event.kind {
            EventKind::RequestCreated {
                id,
                recipient,
                amount,
                memo,
                created_at,
            } => {
                let request = Request {
                    id: *id,
                    recipient: *recipient,
                    amount: *amount,
                    memo: memo.clone(),
                    created_at: *created_at,
                    created_key: event.key,
                    fulfilled: None,
                };
                self.create(event.key, request).await;
            }
            EventKind::RequestFulfilled {
                id,
                fulfiller,
                fulfilled_at,
            } => {
                self.fulfill(event.key, *id, *fulfiller, *fulfilled_at).await;
            }
            _ => {}
        }
        Ok(())
    }
}
