use crate::{KVStore, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory store; contents are lost when dropped
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KVStore for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(true)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_in_key_order() {
        let backend = MemoryBackend::new();
        backend.put(b"a/2", b"two").unwrap();
        backend.put(b"a/1", b"one").unwrap();
        backend.put(b"b/1", b"other").unwrap();

        let results = backend.scan(b"a/").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Bytes::from("a/1"));
    }

    #[test]
    fn test_put_if_absent() {
        let backend = MemoryBackend::new();
        assert!(backend.put_if_absent(b"k", b"v1").unwrap());
        assert!(!backend.put_if_absent(b"k", b"v2").unwrap());
        assert_eq!(backend.get(b"k").unwrap(), Some(Bytes::from("v1")));
    }
}
