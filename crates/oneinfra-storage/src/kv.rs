use crate::Result;
use bytes::Bytes;

/// Key-value store trait
pub trait KVStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Put a key-value pair, replacing any previous value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Insert only if `key` is absent. Returns whether the value was written.
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool>;

    /// Delete a key; deleting a missing key is not an error
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;
}
