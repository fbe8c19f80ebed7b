//! ChainState: one explicitly constructed set of derived-state components.
//!
//! Owns the name registry, invite graph, code tracker and request index. The name registry,
//! invite graph and request index are the listeners handed to its single [Watcher]; the code
//! tracker is driven by consumer calls. Address inputs are strings from API callers and are
//! validated here; everything below works on parsed [Address] values.

use crate::codes::{
    Bonus, ImportError, InviteCodeRow, InviteCodeTracker, InviteStats, RedemptionError,
};
use crate::config::{Config, ConfigError, WatcherConfig};
use crate::invites::InviteGraph;
use crate::listener::Listener;
use crate::names::{parse_address, NameError, NameRegistry, ValidationError};
use crate::requests::{Request, RequestIndexer};
use crate::resolver::{NameResolver, NoopResolver, RpcNameResolver};
use crate::retry::RetryPolicy;
use crate::source::EventSource;
use crate::watcher::{Watcher, WatcherError};
use crate::watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
use alloy::primitives::{Address, U256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    #[error("a watcher already feeds this state")]
    WatcherExists,
}

pub struct ChainStateBuilder {
    resolver: Arc<dyn NameResolver>,
    retry: RetryPolicy,
    blacklist: Vec<String>,
    watcher: WatcherConfig,
    watermark_dir: Option<PathBuf>,
}

impl ChainStateBuilder {
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(NoopResolver),
            retry: RetryPolicy::default(),
            blacklist: Vec::new(),
            watcher: WatcherConfig::default(),
            watermark_dir: None,
        }
    }

    /// Builder preloaded from a validated [Config]. Uses the RPC resolver when `rpc` is set.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let resolver: Arc<dyn NameResolver> = match &config.rpc {
            Some(rpc) => Arc::new(RpcNameResolver::new(rpc)?),
            None => Arc::new(NoopResolver),
        };
        Ok(Self {
            resolver,
            retry: RetryPolicy::from(&config.retry),
            blacklist: config.blacklist.clone(),
            watcher: config.watcher.clone(),
            watermark_dir: config.watermark_dir.clone(),
        })
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn blacklist(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.blacklist = names.into_iter().collect();
        self
    }

    pub fn watcher_config(mut self, config: WatcherConfig) -> Self {
        self.watcher = config;
        self
    }

    pub fn watermark_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watermark_dir = Some(dir.into());
        self
    }

    pub async fn build(self) -> ChainState {
        let names = Arc::new(NameRegistry::new(self.resolver, self.retry.clone()));
        names.set_blacklist(self.blacklist).await;
        let graph = Arc::new(InviteGraph::new());
        let codes = Arc::new(InviteCodeTracker::new(
            Arc::clone(&graph),
            Arc::clone(&names),
        ));
        ChainState {
            names,
            graph,
            codes,
            requests: Arc::new(RequestIndexer::new()),
            retry: self.retry,
            watcher: self.watcher,
            watermark_dir: self.watermark_dir,
            watcher_built: AtomicBool::new(false),
        }
    }
}

impl Default for ChainStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChainState {
    names: Arc<NameRegistry>,
    graph: Arc<InviteGraph>,
    codes: Arc<InviteCodeTracker>,
    requests: Arc<RequestIndexer>,
    retry: RetryPolicy,
    watcher: WatcherConfig,
    watermark_dir: Option<PathBuf>,
    watcher_built: AtomicBool,
}

impl ChainState {
    pub fn builder() -> ChainStateBuilder {
        ChainStateBuilder::new()
    }

    /// Listeners in delivery order: names, invites, requests.
    pub fn listeners(&self) -> Vec<Arc<dyn Listener>> {
        vec![
            Arc::clone(&self.names) as Arc<dyn Listener>,
            Arc::clone(&self.graph) as Arc<dyn Listener>,
            Arc::clone(&self.requests) as Arc<dyn Listener>,
        ]
    }

    /// Watcher over `sources` feeding this state, with a file watermark store when configured.
    ///
    /// Only one watcher may feed a state; later calls fail with [BuildError::WatcherExists].
    pub fn watcher(
        &self,
        sources: impl IntoIterator<Item = (u64, Arc<dyn EventSource>)>,
    ) -> Result<Watcher, BuildError> {
        if self.watcher_built.swap(true, Ordering::SeqCst) {
            return Err(BuildError::WatcherExists);
        }
        let built = self.build_watcher(sources);
        if built.is_err() {
            self.watcher_built.store(false, Ordering::SeqCst);
        }
        built
    }

    fn build_watcher(
        &self,
        sources: impl IntoIterator<Item = (u64, Arc<dyn EventSource>)>,
    ) -> Result<Watcher, BuildError> {
        let store: Arc<dyn WatermarkStore> = match &self.watermark_dir {
            Some(dir) => Arc::new(FileWatermarkStore::new(dir.clone())),
            None => Arc::new(MemoryWatermarkStore::new()),
        };
        let mut builder = Watcher::builder()
            .store(store)
            .config(self.watcher.clone())
            .retry(self.retry.clone());
        for (chain_id, source) in sources {
            builder = builder.source(chain_id, source);
        }
        for listener in self.listeners() {
            builder = builder.listener(listener);
        }
        Ok(builder.build()?)
    }

    pub fn names(&self) -> &Arc<NameRegistry> {
        &self.names
    }

    pub fn graph(&self) -> &Arc<InviteGraph> {
        &self.graph
    }

    pub fn codes(&self) -> &Arc<InviteCodeTracker> {
        &self.codes
    }

    pub fn requests(&self) -> &Arc<RequestIndexer> {
        &self.requests
    }

    pub async fn resolve_name(&self, addr: &str) -> Result<Option<String>, NameError> {
        let addr = parse_address(addr)?;
        self.names.resolve_name(addr).await
    }

    pub async fn resolve_addr(&self, name: &str) -> Result<Option<Address>, NameError> {
        self.names.resolve_addr(name).await
    }

    pub async fn get_inviter(&self, addr: &str) -> Result<Option<Address>, ValidationError> {
        let addr = parse_address(addr)?;
        Ok(self.graph.get_inviter(&addr).await)
    }

    pub async fn best_invite_code_for_sender(
        &self,
        addr: &str,
    ) -> Result<Option<String>, ValidationError> {
        let addr = parse_address(addr)?;
        Ok(self.codes.best_invite_code_for_sender(&addr).await)
    }

    pub async fn best_invite_code_for_name(&self, name: &str) -> Result<Option<String>, NameError> {
        self.codes.best_invite_code_for_name(name).await
    }

    pub async fn requests_for_recipient(
        &self,
        addr: &str,
    ) -> Result<Vec<Request>, ValidationError> {
        let addr = parse_address(addr)?;
        Ok(self.requests.get_requests_by_recipient(&addr).await)
    }

    /// Requests addressed to the account currently bound to `name`; empty if unbound.
    pub async fn requests_for_recipient_name(&self, name: &str) -> Result<Vec<Request>, NameError> {
        match self.names.resolve_addr(name).await? {
            Some(addr) => Ok(self.requests.get_requests_by_recipient(&addr).await),
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_request(&self, id: U256) -> Option<Request> {
        self.requests.get(id).await
    }

    pub async fn invite_stats(&self, addr: &str) -> Result<InviteStats, ValidationError> {
        let addr = parse_address(addr)?;
        Ok(self.codes.invite_stats(&addr).await)
    }

    pub async fn import_codes(
        &self,
        rows: impl IntoIterator<Item = InviteCodeRow>,
    ) -> Result<usize, ImportError> {
        self.codes.import(rows).await
    }

    pub async fn redeem(&self, code: &str) -> Result<Bonus, RedemptionError> {
        self.codes.redeem(code).await
    }
}
