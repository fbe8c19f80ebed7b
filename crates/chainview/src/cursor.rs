//! In-memory per-chain cursor held by the watcher.
//!
//! Mirrors the persisted watermark once loaded; never moves backwards.

use crate::event::EventKey;

/// Progress of one chain through its event source.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    /// Key of the last event applied to every listener. None until the first event.
    pub watermark: Option<EventKey>,
    /// Watermark last written to the store.
    pub committed: Option<EventKey>,
    /// Set once the persisted watermark has been read.
    pub loaded: bool,
    /// Reason the chain stopped ingesting, if it did.
    pub halted: Option<String>,
}

impl Cursor {
    pub fn new(watermark: Option<EventKey>) -> Self {
        Self {
            watermark,
            committed: watermark,
            loaded: true,
            halted: None,
        }
    }

    /// Whether `key` is past the watermark.
    pub fn is_new(&self, key: &EventKey) -> bool {
        self.watermark.map_or(true, |w| *key > w)
    }

    /// Move the watermark to `key` if it is ahead. Returns false when `key` is not new.
    pub fn advance(&mut self, key: EventKey) -> bool {
        if !self.is_new(&key) {
            return false;
        }
        self.watermark = Some(key);
        true
    }

    /// True when applied progress has not been written to the store yet.
    pub fn is_dirty(&self) -> bool {
        self.watermark != self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_default() {
        let c = Cursor::default();
        assert_eq!(c.watermark, None);
        assert!(!c.loaded);
        assert!(c.halted.is_none());
        assert!(c.is_new(&EventKey::new(1, 0, 0, 0)));
    }

    #[test]
    fn cursor_advances_monotonically() {
        let mut c = Cursor::new(Some(EventKey::new(1, 10, 0, 0)));
        assert!(!c.is_dirty());
        assert!(!c.advance(EventKey::new(1, 9, 5, 5)));
        assert!(!c.advance(EventKey::new(1, 10, 0, 0)));
        assert!(c.advance(EventKey::new(1, 10, 0, 1)));
        assert_eq!(c.watermark, Some(EventKey::new(1, 10, 0, 1)));
        assert!(c.is_dirty());
    }
}
