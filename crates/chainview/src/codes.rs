//! InviteCodeTracker: invite code selection and redemption.
//!
//! Rows are imported by an external admin action and mutated only by [InviteCodeTracker::redeem],
//! which checks `use_count < max_uses` and increments under one write lock, so concurrent
//! redemptions of the same code can never exceed `max_uses`.

use crate::invites::InviteGraph;
use crate::names::{NameError, NameRegistry};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// One invite code with its usage counter and configured bonuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteCodeRow {
    pub code: String,
    pub inviter: Address,
    pub max_uses: u32,
    #[serde(default)]
    pub use_count: u32,
    #[serde(default)]
    pub bonus_dollars_invitee: u64,
    #[serde(default)]
    pub bonus_dollars_inviter: u64,
    #[serde(default)]
    pub zupass_email: Option<String>,
}

impl InviteCodeRow {
    pub fn remaining(&self) -> u32 {
        self.max_uses.saturating_sub(self.use_count)
    }

    /// Bonuses paid on redemption. When both sides are configured, each gets the smaller
    /// amount; otherwise each side keeps its configured amount.
    pub fn bonus(&self) -> Bonus {
        let (invitee, inviter) = (self.bonus_dollars_invitee, self.bonus_dollars_inviter);
        if invitee > 0 && inviter > 0 {
            let both = invitee.min(inviter);
            Bonus {
                bonus_dollars_invitee: both,
                bonus_dollars_inviter: both,
            }
        } else {
            Bonus {
                bonus_dollars_invitee: invitee,
                bonus_dollars_inviter: inviter,
            }
        }
    }
}

/// Bonus amounts (whole dollars) granted by one redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bonus {
    pub bonus_dollars_invitee: u64,
    pub bonus_dollars_inviter: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedemptionError {
    #[error("unknown invite code {0:?}")]
    UnknownCode(String),
    #[error("invite code {code:?} exhausted ({max_uses} uses)")]
    CodeExhausted { code: String, max_uses: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("duplicate invite code {0:?}")]
    DuplicateCode(String),
    #[error("invalid invite code row {code:?}: {reason}")]
    InvalidRow { code: String, reason: String },
}

/// Invite activity of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InviteStats {
    /// Accounts this address invited.
    pub invitees: usize,
    /// Codes owned.
    pub codes: usize,
    /// Redemptions left across all owned codes.
    pub remaining_uses: u64,
}

/// Preference order: partially used before unused, then fewest remaining uses, then code.
fn preference(a: &InviteCodeRow, b: &InviteCodeRow) -> Ordering {
    (a.use_count == 0, a.remaining(), a.code.as_str()).cmp(&(
        b.use_count == 0,
        b.remaining(),
        b.code.as_str(),
    ))
}

pub struct InviteCodeTracker {
    codes: RwLock<HashMap<String, InviteCodeRow>>,
    graph: Arc<InviteGraph>,
    names: Arc<NameRegistry>,
}

impl InviteCodeTracker {
    pub fn new(graph: Arc<InviteGraph>, names: Arc<NameRegistry>) -> Self {
        Self {
            codes: RwLock::new(HashMap::new()),
            graph,
            names,
        }
    }

    /// Add rows. All-or-nothing: any duplicate or invalid row rejects the whole import.
    pub async fn import(
        &self,
        rows: impl IntoIterator<Item = InviteCodeRow>,
    ) -> Result<usize, ImportError> {
        let rows: Vec<InviteCodeRow> = rows.into_iter().collect();
        let mut codes = self.codes.write().await;
        let mut seen = HashSet::new();
        for row in &rows {
            if row.code.trim().is_empty() {
                return Err(ImportError::InvalidRow {
                    code: row.code.clone(),
                    reason: "empty code".into(),
                });
            }
            if row.use_count > row.max_uses {
                return Err(ImportError::InvalidRow {
                    code: row.code.clone(),
                    reason: format!("use_count {} > max_uses {}", row.use_count, row.max_uses),
                });
            }
            if codes.contains_key(&row.code) || !seen.insert(row.code.as_str()) {
                return Err(ImportError::DuplicateCode(row.code.clone()));
            }
        }
        let count = rows.len();
        for row in rows {
            codes.insert(row.code.clone(), row);
        }
        tracing::info!(count, total = codes.len(), "invite codes imported");
        Ok(count)
    }

    pub async fn get(&self, code: &str) -> Option<InviteCodeRow> {
        self.codes.read().await.get(code).cloned()
    }

    /// Codes owned by `inviter`, ordered by code.
    pub async fn codes_for(&self, inviter: &Address) -> Vec<InviteCodeRow> {
        let mut rows: Vec<InviteCodeRow> = self
            .codes
            .read()
            .await
            .values()
            .filter(|r| r.inviter == *inviter)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        rows
    }

    /// Best code for `inviter` to hand out, or None when no owned code has uses left.
    pub async fn best_invite_code_for_sender(&self, inviter: &Address) -> Option<String> {
        self.codes
            .read()
            .await
            .values()
            .filter(|r| r.inviter == *inviter && r.use_count < r.max_uses)
            .min_by(|a, b| preference(a, b))
            .map(|r| r.code.clone())
    }

    /// [Self::best_invite_code_for_sender] for the address bound to `name`.
    pub async fn best_invite_code_for_name(&self, name: &str) -> Result<Option<String>, NameError> {
        match self.names.resolve_addr(name).await? {
            Some(addr) => Ok(self.best_invite_code_for_sender(&addr).await),
            None => Ok(None),
        }
    }

    /// Consume one use of `code` and return the bonuses it grants.
    pub async fn redeem(&self, code: &str) -> Result<Bonus, RedemptionError> {
        let mut codes = self.codes.write().await;
        let row = codes
            .get_mut(code)
            .ok_or_else(|| RedemptionError::UnknownCode(code.to_string()))?;
        if row.use_count >= row.max_uses {
            return Err(RedemptionError::CodeExhausted {
                code: code.to_string(),
                max_uses: row.max_uses,
            });
        }
        row.use_count += 1;
        let bonus = row.bonus();
        tracing::info!(
            code,
            inviter = %row.inviter,
            use_count = row.use_count,
            max_uses = row.max_uses,
            "invite code redeemed"
        );
        Ok(bonus)
    }

    pub async fn invite_stats(&self, addr: &Address) -> InviteStats {
        let invitees = self.graph.get_invitees(addr).await.len();
        let owned = self.codes_for(addr).await;
        InviteStats {
            invitees,
            codes: owned.len(),
            remaining_uses: owned.iter().map(|r| u64::from(r.remaining())).sum(),
        }
    }
}
