//! Per-chain watermark persistence: the key of the last event applied to every listener.
//!
//! [MemoryWatermarkStore] forgets everything on restart (replay from genesis);
//! [FileWatermarkStore] keeps one small JSON file per chain id.

use crate::event::EventKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermark io for chain {chain_id}: {source}")]
    Io {
        chain_id: u64,
        source: std::io::Error,
    },
    #[error("corrupt watermark for chain {chain_id}: {source}")]
    Corrupt {
        chain_id: u64,
        source: serde_json::Error,
    },
    #[error("watermark for chain {chain_id} would move backwards: {current} -> {proposed}")]
    Regression {
        chain_id: u64,
        current: EventKey,
        proposed: EventKey,
    },
    #[error("watermark key belongs to chain {got}, store asked for chain {expected}")]
    ChainMismatch { expected: u64, got: u64 },
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Last committed key for `chain_id`; None means start from genesis.
    async fn load(&self, chain_id: u64) -> Result<Option<EventKey>, WatermarkError>;

    /// Commit `key` as the watermark of `key.chain_id`. Never moves backwards.
    async fn save(&self, key: EventKey) -> Result<(), WatermarkError>;
}

fn check_forward(current: Option<EventKey>, proposed: EventKey) -> Result<(), WatermarkError> {
    match current {
        Some(cur) if proposed < cur => Err(WatermarkError::Regression {
            chain_id: proposed.chain_id,
            current: cur,
            proposed,
        }),
        _ => Ok(()),
    }
}

/// In-memory watermarks.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    keys: RwLock<HashMap<u64, EventKey>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self, chain_id: u64) -> Result<Option<EventKey>, WatermarkError> {
        Ok(self.keys.read().await.get(&chain_id).copied())
    }

    async fn save(&self, key: EventKey) -> Result<(), WatermarkError> {
        let mut keys = self.keys.write().await;
        check_forward(keys.get(&key.chain_id).copied(), key)?;
        keys.insert(key.chain_id, key);
        Ok(())
    }
}

/// One JSON file per chain under `dir`, replaced atomically (write temp, then rename).
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    dir: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, chain_id: u64) -> PathBuf {
        self.dir.join(format!("watermark-{chain_id}.json"))
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self, chain_id: u64) -> Result<Option<EventKey>, WatermarkError> {
        let raw = match tokio::fs::read(self.path_for(chain_id)).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(WatermarkError::Io { chain_id, source }),
        };
        let key: EventKey = serde_json::from_slice(&raw)
            .map_err(|source| WatermarkError::Corrupt { chain_id, source })?;
        if key.chain_id != chain_id {
            return Err(WatermarkError::ChainMismatch {
                expected: chain_id,
                got: key.chain_id,
            });
        }
        Ok(Some(key))
    }

    async fn save(&self, key: EventKey) -> Result<(), WatermarkError> {
        let chain_id = key.chain_id;
        check_forward(self.load(chain_id).await?, key)?;
        let io = |source: std::io::Error| WatermarkError::Io { chain_id, source };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        let body = serde_json::to_vec(&key)
            .map_err(|source| WatermarkError::Corrupt { chain_id, source })?;
        let path = self.path_for(chain_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io)?;
        tracing::debug!(chain_id, watermark = %key, "watermark committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_starts_empty_and_advances() {
        let s = MemoryWatermarkStore::new();
        assert_eq!(s.load(1).await.unwrap(), None);
        s.save(EventKey::new(1, 5, 0, 0)).await.unwrap();
        s.save(EventKey::new(1, 5, 0, 0)).await.unwrap();
        s.save(EventKey::new(1, 6, 1, 2)).await.unwrap();
        assert_eq!(s.load(1).await.unwrap(), Some(EventKey::new(1, 6, 1, 2)));
        assert_eq!(s.load(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_rejects_regression() {
        let s = MemoryWatermarkStore::new();
        s.save(EventKey::new(1, 9, 0, 0)).await.unwrap();
        let err = s.save(EventKey::new(1, 8, 0, 0)).await.unwrap_err();
        assert!(matches!(err, WatermarkError::Regression { chain_id: 1, .. }));
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileWatermarkStore::new(dir.path().join("wm"));
        assert_eq!(s.load(8453).await.unwrap(), None);
        s.save(EventKey::new(8453, 100, 2, 7)).await.unwrap();

        let reopened = FileWatermarkStore::new(dir.path().join("wm"));
        assert_eq!(
            reopened.load(8453).await.unwrap(),
            Some(EventKey::new(8453, 100, 2, 7))
        );
        assert!(reopened.save(EventKey::new(8453, 99, 0, 0)).await.is_err());
    }

    #[tokio::test]
    async fn file_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("watermark-1.json"), b"not json").unwrap();
        let s = FileWatermarkStore::new(dir.path());
        let err = s.load(1).await.unwrap_err();
        assert!(matches!(err, WatermarkError::Corrupt { chain_id: 1, .. }));
    }
}
