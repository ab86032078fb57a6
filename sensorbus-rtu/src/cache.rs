//! Last known register values per device.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::frame::DeviceAddress;

/// The most recent successful read of a register block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Raw register words, as received.
    pub words: Vec<u16>,
    pub updated_at: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }
}

/// Fallback store keyed by (device, start register).
///
/// Entries are overwritten on every successful read and never expire; they
/// are only dropped when their device is removed from the registry.
#[derive(Debug, Default)]
pub struct LastKnownValueCache {
    entries: RwLock<HashMap<(DeviceAddress, u16), CacheEntry>>,
}

impl LastKnownValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: DeviceAddress, register: u16) -> Option<CacheEntry> {
        self.entries.read().get(&(device, register)).cloned()
    }

    pub fn put(&self, device: DeviceAddress, register: u16, words: Vec<u16>) {
        self.entries.write().insert(
            (device, register),
            CacheEntry {
                words,
                updated_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for `device`. Returns how many were removed.
    pub fn purge_device(&self, device: DeviceAddress) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(addr, _), _| *addr != device);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: u8) -> DeviceAddress {
        DeviceAddress::new(raw).unwrap()
    }

    #[test]
    fn test_put_overwrites() {
        let cache = LastKnownValueCache::new();
        cache.put(addr(3), 1, vec![0x4000, 0x449A]);
        cache.put(addr(3), 1, vec![0x0000, 0x4120]);

        assert_eq!(cache.get(addr(3), 1).unwrap().words, vec![0x0000, 0x4120]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(addr(3), 3).is_none());
        assert!(cache.get(addr(4), 1).is_none());
    }

    #[test]
    fn test_purge_device_leaves_others() {
        let cache = LastKnownValueCache::new();
        cache.put(addr(1), 0, vec![1]);
        cache.put(addr(1), 2, vec![2]);
        cache.put(addr(2), 0, vec![3]);

        assert_eq!(cache.purge_device(addr(1)), 2);
        assert!(cache.get(addr(1), 0).is_none());
        assert_eq!(cache.get(addr(2), 0).unwrap().words, vec![3]);
        assert_eq!(cache.purge_device(addr(9)), 0);
    }
}
