//! NameRegistry: cached, bidirectional name <-> address bindings.
//!
//! The on-chain registry is the source of truth; this is a cache fed two ways:
//! - write-through from `NameRegistered` events delivered by the watcher, and
//! - read-through on a cache miss via a retried [NameResolver] call.
//!
//! The cache keeps the binding bijective: binding `name -> addr` drops any previous name of
//! `addr` and any previous address of `name` (last observed wins). Blacklisted names never
//! resolve; a cached entry for a newly blacklisted name is evicted on its next lookup.

use crate::event::{Event, EventKind};
use crate::listener::{Listener, ListenerError};
use crate::resolver::NameResolver;
use crate::retry::{retry, RetryExhausted, RetryPolicy};
use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Longest name the registry can store (one bytes32 word).
pub const MAX_NAME_LEN: usize = 32;

/// Malformed caller input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is empty")]
    EmptyName,
    #[error("name is {0} bytes, max {MAX_NAME_LEN}")]
    NameTooLong(usize),
    #[error("name contains invalid character {0:?}")]
    InvalidNameChar(char),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum NameError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lookup(#[from] RetryExhausted),
}

/// Lowercase and validate a name: ASCII letters, digits, `-` and `_`, at most 32 bytes.
pub fn normalize_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong(name.len()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidNameChar(c));
    }
    Ok(name)
}

/// Parse a 0x-prefixed hex address supplied by a caller.
pub fn parse_address(raw: &str) -> Result<Address, ValidationError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("0x") {
        return Err(ValidationError::InvalidAddress(raw.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidAddress(raw.to_string()))
}

#[derive(Debug, Default)]
struct NameCache {
    by_name: HashMap<String, Address>,
    by_addr: HashMap<Address, String>,
    /// Count of bindings observed from events.
    observed: u64,
}

impl NameCache {
    fn observe(&mut self, name: String, addr: Address) {
        self.observed += 1;
        self.bind(name, addr);
    }

    /// Bind a registry read that started when `observed` was `as_of`.
    /// A binding observed since then for either side wins over the read.
    fn bind_fetched(&mut self, name: String, addr: Address, as_of: u64) -> bool {
        if self.observed != as_of
            && (self.by_addr.contains_key(&addr) || self.by_name.contains_key(&name))
        {
            return false;
        }
        self.bind(name, addr);
        true
    }

    fn bind(&mut self, name: String, addr: Address) {
        if let Some(old_name) = self.by_addr.insert(addr, name.clone()) {
            if old_name != name && self.by_name.get(&old_name) == Some(&addr) {
                self.by_name.remove(&old_name);
            }
        }
        if let Some(old_addr) = self.by_name.insert(name.clone(), addr) {
            if old_addr != addr && self.by_addr.get(&old_addr) == Some(&name) {
                self.by_addr.remove(&old_addr);
            }
        }
    }

    fn evict_name(&mut self, name: &str) {
        if let Some(addr) = self.by_name.remove(name) {
            if self.by_addr.get(&addr).map(String::as_str) == Some(name) {
                self.by_addr.remove(&addr);
            }
        }
    }
}

pub struct NameRegistry {
    resolver: Arc<dyn NameResolver>,
    retry: RetryPolicy,
    cache: RwLock<NameCache>,
    blacklist: RwLock<HashSet<String>>,
}

impl NameRegistry {
    pub fn new(resolver: Arc<dyn NameResolver>, retry: RetryPolicy) -> Self {
        Self {
            resolver,
            retry,
            cache: RwLock::new(NameCache::default()),
            blacklist: RwLock::new(HashSet::new()),
        }
    }

    /// Replace the blacklist. Cached entries are invalidated lazily.
    pub async fn set_blacklist(&self, names: impl IntoIterator<Item = String>) {
        let set: HashSet<String> = names
            .into_iter()
            .map(|n| n.trim().to_ascii_lowercase())
            .collect();
        tracing::info!(entries = set.len(), "name blacklist updated");
        *self.blacklist.write().await = set;
    }

    pub async fn add_to_blacklist(&self, name: &str) {
        self.blacklist
            .write()
            .await
            .insert(name.trim().to_ascii_lowercase());
    }

    pub async fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist
            .read()
            .await
            .contains(&name.trim().to_ascii_lowercase())
    }

    async fn unlisted(&self, name: String) -> Option<String> {
        if self.is_blacklisted(&name).await {
            return None;
        }
        Some(name)
    }

    async fn unless_blacklisted(&self, name: String) -> Option<String> {
        if self.is_blacklisted(&name).await {
            self.cache.write().await.evict_name(&name);
            return None;
        }
        Some(name)
    }

    /// Name bound to `addr`, from cache or the registry.
    pub async fn resolve_name(&self, addr: Address) -> Result<Option<String>, NameError> {
        let (cached, as_of) = {
            let cache = self.cache.read().await;
            (cache.by_addr.get(&addr).cloned(), cache.observed)
        };
        if let Some(name) = cached {
            return Ok(self.unless_blacklisted(name).await);
        }

        let resolver = Arc::clone(&self.resolver);
        let fetched = retry("resolveName", &self.retry, || {
            let resolver = Arc::clone(&resolver);
            async move { resolver.resolve_name(addr).await }
        })
        .await?;
        let fetched = match fetched {
            Some(raw) => match normalize_name(&raw) {
                Ok(n) => self.unlisted(n).await,
                Err(e) => {
                    tracing::warn!(
                        %addr,
                        name = %raw,
                        reason = %e,
                        "registry returned an unusable name"
                    );
                    None
                }
            },
            None => None,
        };

        let mut cache = self.cache.write().await;
        if cache.observed != as_of {
            if let Some(current) = cache.by_addr.get(&addr).cloned() {
                drop(cache);
                tracing::debug!(%addr, name = %current, "registration observed during lookup");
                return Ok(self.unless_blacklisted(current).await);
            }
        }
        let Some(name) = fetched else {
            return Ok(None);
        };
        if !cache.bind_fetched(name.clone(), addr, as_of) {
            tracing::debug!(%addr, %name, "registry answer superseded by a newer registration");
            return Ok(None);
        }
        Ok(Some(name))
    }

    /// Address bound to `name`, from cache or the registry. Blacklisted names are always None.
    pub async fn resolve_addr(&self, name: &str) -> Result<Option<Address>, NameError> {
        let name = normalize_name(name)?;
        if self.is_blacklisted(&name).await {
            self.cache.write().await.evict_name(&name);
            return Ok(None);
        }
        let (cached, as_of) = {
            let cache = self.cache.read().await;
            (cache.by_name.get(&name).copied(), cache.observed)
        };
        if cached.is_some() {
            return Ok(cached);
        }

        let resolver = Arc::clone(&self.resolver);
        let fetched = retry("resolveAddr", &self.retry, || {
            let resolver = Arc::clone(&resolver);
            let name = name.clone();
            async move { resolver.resolve_addr(&name).await }
        })
        .await?;

        let mut cache = self.cache.write().await;
        if cache.observed != as_of {
            if let Some(current) = cache.by_name.get(&name).copied() {
                tracing::debug!(%name, addr = %current, "registration observed during lookup");
                return Ok(Some(current));
            }
        }
        let Some(addr) = fetched else {
            return Ok(None);
        };
        if !cache.bind_fetched(name.clone(), addr, as_of) {
            tracing::debug!(%name, %addr, "registry answer superseded by a newer registration");
            return Ok(None);
        }
        Ok(Some(addr))
    }

    /// Cached name of `addr` without touching the network.
    pub async fn cached_name(&self, addr: &Address) -> Option<String> {
        self.cache.read().await.by_addr.get(addr).cloned()
    }

    /// Cached address of `name` without touching the network.
    pub async fn cached_addr(&self, name: &str) -> Option<Address> {
        self.cache.read().await.by_name.get(name).copied()
    }

    /// Number of cached bindings.
    pub async fn len(&self) -> usize {
        self.cache.read().await.by_name.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Listener for NameRegistry {
    fn name(&self) -> &str {
        "names"
    }

    async fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        let EventKind::NameRegistered { name, addr } = &event.kind else {
            return Ok(());
        };
        let name = normalize_name(name)
            .map_err(|e| ListenerError::Ignorable(format!("name registration {name:?}: {e}")))?;
        tracing::debug!(key = %event.key, %name, %addr, "name registered");
        self.cache.write().await.observe(name, *addr);
        Ok(())
    }
}
