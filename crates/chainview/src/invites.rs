//! InviteGraph: who invited whom.
//!
//! Edges come from `InviteRedeemed` events. The edge set is a forest: every invitee has at most
//! one inviter (the first registration observed wins) and no address is its own ancestor.
//! Nodes live in an arena indexed by address; inserting an edge walks only the inviter's
//! ancestor chain, so validation cost is bounded by chain depth, not graph size.

use crate::event::{Event, EventKind};
use crate::listener::{Listener, ListenerError};
use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

/// Rejected edge. Logged and dropped by the listener; never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{0} cannot invite itself")]
    SelfInvite(Address),
    #[error("{invitee} is already registered (inviter {existing:?})")]
    DuplicateInviter {
        invitee: Address,
        existing: Option<Address>,
    },
    #[error("edge {inviter} -> {invitee} would form a cycle")]
    Cycle { inviter: Address, invitee: Address },
}

/// Result of an accepted insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same registration seen again (replay).
    AlreadyPresent,
}

type NodeId = usize;

#[derive(Debug)]
struct Node {
    addr: Address,
    inviter: Option<NodeId>,
    invitees: Vec<NodeId>,
    /// True once the address's own registration has been observed.
    registered: bool,
}

/// Arena-backed invite forest without locking. [InviteGraph] wraps it for shared use.
#[derive(Debug, Default)]
pub struct InviteForest {
    nodes: Vec<Node>,
    index: HashMap<Address, NodeId>,
    edges: usize,
}

impl InviteForest {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, addr: Address) -> NodeId {
        if let Some(id) = self.index.get(&addr) {
            return *id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            addr,
            inviter: None,
            invitees: Vec::new(),
            registered: false,
        });
        self.index.insert(addr, id);
        id
    }

    /// Whether node `a` lies strictly above node `b`.
    fn is_ancestor_id(&self, a: NodeId, b: NodeId) -> bool {
        let mut cur = self.nodes[b].inviter;
        while let Some(id) = cur {
            if id == a {
                return true;
            }
            cur = self.nodes[id].inviter;
        }
        false
    }

    /// Record the registration of `invitee`, invited by `inviter` (None for a root account).
    pub fn insert(
        &mut self,
        inviter: Option<Address>,
        invitee: Address,
    ) -> Result<InsertOutcome, InvariantViolation> {
        if let Some(&id) = self.index.get(&invitee) {
            let node = &self.nodes[id];
            if node.registered {
                let existing = node.inviter.map(|p| self.nodes[p].addr);
                if existing == inviter {
                    return Ok(InsertOutcome::AlreadyPresent);
                }
                return Err(InvariantViolation::DuplicateInviter { invitee, existing });
            }
        }

        let Some(inviter) = inviter else {
            let id = self.intern(invitee);
            self.nodes[id].registered = true;
            return Ok(InsertOutcome::Inserted);
        };
        if inviter == invitee {
            return Err(InvariantViolation::SelfInvite(invitee));
        }
        if let (Some(&child), Some(&parent)) = (self.index.get(&invitee), self.index.get(&inviter))
        {
            if self.is_ancestor_id(child, parent) {
                return Err(InvariantViolation::Cycle { inviter, invitee });
            }
        }

        let parent = self.intern(inviter);
        let child = self.intern(invitee);
        self.nodes[child].inviter = Some(parent);
        self.nodes[child].registered = true;
        self.nodes[parent].invitees.push(child);
        self.edges += 1;
        Ok(InsertOutcome::Inserted)
    }

    pub fn get_inviter(&self, addr: &Address) -> Option<Address> {
        let id = *self.index.get(addr)?;
        self.nodes[id].inviter.map(|p| self.nodes[p].addr)
    }

    pub fn get_invitees(&self, addr: &Address) -> HashSet<Address> {
        match self.index.get(addr) {
            Some(&id) => self.nodes[id]
                .invitees
                .iter()
                .map(|c| self.nodes[*c].addr)
                .collect(),
            None => HashSet::new(),
        }
    }

    /// True if `a` is on the invite chain from `b` up to its root, excluding `b` itself.
    pub fn is_ancestor(&self, a: &Address, b: &Address) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&a), Some(&b)) => self.is_ancestor_id(a, b),
            _ => false,
        }
    }

    /// Inviters of `addr`, nearest first.
    pub fn ancestors(&self, addr: &Address) -> Vec<Address> {
        let mut out = Vec::new();
        let Some(&id) = self.index.get(addr) else {
            return out;
        };
        let mut cur = self.nodes[id].inviter;
        while let Some(p) = cur {
            out.push(self.nodes[p].addr);
            cur = self.nodes[p].inviter;
        }
        out
    }

    pub fn is_registered(&self, addr: &Address) -> bool {
        self.index
            .get(addr)
            .is_some_and(|id| self.nodes[*id].registered)
    }

    /// Number of known addresses (registered or referenced as an inviter).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges
    }

    /// Every known address.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.nodes.iter().map(|n| &n.addr)
    }
}

/// Shared invite forest fed by the watcher and read concurrently by callers.
#[derive(Debug, Default)]
pub struct InviteGraph {
    forest: RwLock<InviteForest>,
}

impl InviteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge directly (outside the watcher, e.g. for backfills and tests).
    pub async fn insert(
        &self,
        inviter: Option<Address>,
        invitee: Address,
    ) -> Result<InsertOutcome, InvariantViolation> {
        self.forest.write().await.insert(inviter, invitee)
    }

    pub async fn get_inviter(&self, addr: &Address) -> Option<Address> {
        self.forest.read().await.get_inviter(addr)
    }

    pub async fn get_invitees(&self, addr: &Address) -> HashSet<Address> {
        self.forest.read().await.get_invitees(addr)
    }

    pub async fn is_ancestor(&self, a: &Address, b: &Address) -> bool {
        self.forest.read().await.is_ancestor(a, b)
    }

    pub async fn ancestors(&self, addr: &Address) -> Vec<Address> {
        self.forest.read().await.ancestors(addr)
    }

    /// Hops from `addr` to its root.
    pub async fn depth(&self, addr: &Address) -> usize {
        self.forest.read().await.ancestors(addr).len()
    }

    pub async fn is_registered(&self, addr: &Address) -> bool {
        self.forest.read().await.is_registered(addr)
    }

    pub async fn len(&self) -> usize {
        self.forest.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.forest.read().await.is_empty()
    }

    pub async fn edge_count(&self) -> usize {
        self.forest.read().await.edge_count()
    }
}

#[async_trait]
impl Listener for InviteGraph {
    fn name(&self) -> &str {
        "invites"
    }

    async fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        let EventKind::InviteRedeemed { inviter, invitee } = &event.kind else {
            return Ok(());
        };
        match self.insert(*inviter, *invitee).await {
            Ok(InsertOutcome::Inserted) => {
                tracing::debug!(
                    key = %event.key,
                    %invitee,
                    inviter = ?inviter,
                    "invite edge added"
                );
            }
            Ok(InsertOutcome::AlreadyPresent) => {
                tracing::debug!(key = %event.key, %invitee, "invite edge replayed");
            }
            Err(violation) => {
                tracing::warn!(key = %event.key, reason = %violation, "invite edge dropped");
            }
        }
        Ok(())
    }
}
