//! Derived application state from append-only chain event logs.
//!
//! - **Watcher**: reads each chain's [EventSource] past its watermark and delivers every event
//!   to the registered [Listener]s in order, committing the watermark per applied batch.
//! - **NameRegistry**: cached name <-> address bindings with an on-chain read path and a
//!   blacklist.
//! - **InviteGraph**: who invited whom, kept a forest (one inviter each, no cycles).
//! - **InviteCodeTracker**: best-code selection and atomic redemption with bonus rules.
//! - **RequestIndexer**: payment requests joined with their fulfillments.
//! - **ChainState**: wires the above together and serves consumer queries.

pub mod abi;
pub mod codes;
pub mod config;
pub mod cursor;
pub mod event;
pub mod invites;
pub mod listener;
pub mod names;
pub mod requests;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod state;
pub mod watcher;
pub mod watermark;

pub use codes::{Bonus, ImportError, InviteCodeRow, InviteCodeTracker, InviteStats, RedemptionError};
pub use config::{Config, ConfigError, RetryConfig, RpcConfig, WatcherConfig};
pub use cursor::Cursor;
pub use event::{Event, EventKey, EventKind};
pub use invites::{InsertOutcome, InviteForest, InviteGraph, InvariantViolation};
pub use listener::{Listener, ListenerError};
pub use names::{normalize_name, parse_address, NameError, NameRegistry, ValidationError};
pub use requests::{Fulfillment, Request, RequestIndexer, RequestStatus};
pub use resolver::{NameResolver, NoopResolver, ResolverError, RpcNameResolver};
pub use retry::{retry, RetryExhausted, RetryPolicy};
pub use source::{EventSource, MemoryEventSource, SourceError};
pub use state::{BuildError, ChainState, ChainStateBuilder};
pub use watcher::{Watcher, WatcherBuilder, WatcherError};
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkError, WatermarkStore};
