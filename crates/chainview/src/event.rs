//! Decoded chain events as read from an event source.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an event. Ordering is `(chain_id, block_number, tx_index, log_index)` and is
/// strictly increasing within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub chain_id: u64,
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
}

impl EventKey {
    pub fn new(chain_id: u64, block_number: u64, tx_index: u64, log_index: u64) -> Self {
        Self {
            chain_id,
            block_number,
            tx_index,
            log_index,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chain_id, self.block_number, self.tx_index, self.log_index
        )
    }
}

/// One immutable decoded log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub key: EventKey,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub kind: EventKind,
}

/// Event payloads the derived state cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Token transfer. Carried through the pipeline; no built-in listener consumes it.
    Transfer {
        from: Address,
        to: Address,
        amount: U256,
    },
    /// Name registry binding `name -> addr`.
    NameRegistered { name: String, addr: Address },
    /// Invite redemption at account creation. `inviter` is None for root accounts.
    InviteRedeemed {
        inviter: Option<Address>,
        invitee: Address,
    },
    /// Payment request created. `amount` is in token base units (6 decimals).
    RequestCreated {
        id: U256,
        recipient: Address,
        amount: U256,
        memo: String,
        created_at: u64,
    },
    /// Payment request paid.
    RequestFulfilled {
        id: U256,
        fulfiller: Address,
        fulfilled_at: u64,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Transfer { .. } => "transfer",
            EventKind::NameRegistered { .. } => "name_registered",
            EventKind::InviteRedeemed { .. } => "invite_redeemed",
            EventKind::RequestCreated { .. } => "request_created",
            EventKind::RequestFulfilled { .. } => "request_fulfilled",
        }
    }
}

impl Event {
    pub fn new(key: EventKey, kind: EventKind) -> Self {
        Self {
            key,
            block_hash: B256::ZERO,
            tx_hash: B256::ZERO,
            kind,
        }
    }

    pub fn with_hashes(mut self, block_hash: B256, tx_hash: B256) -> Self {
        self.block_hash = block_hash;
        self.tx_hash = tx_hash;
        self
    }
}
