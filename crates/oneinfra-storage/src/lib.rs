//! oneinfra storage - key-value persistence for host-side bookkeeping
//!
//! This crate provides:
//! - KVStore trait for storage abstraction
//! - redb-based implementation
//! - in-memory implementation for tests and ephemeral runs

pub mod error;
pub mod kv;
pub mod memory;
pub mod redb_backend;

// Re-export commonly used types
pub use error::{Result, StorageError};
pub use kv::KVStore;
pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;
