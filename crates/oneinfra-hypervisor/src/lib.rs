//! oneinfra hypervisor - the gateway reconcilers use to act on hosts
//!
//! This crate provides:
//! - `HypervisorGateway`: images, files, pods, one-shot jobs and host ports
//! - `PortAllocator`: named host-port leases persisted in a KVStore
//! - `MockHypervisor`: in-memory gateway recording every call

pub mod error;
pub mod mock;
pub mod ports;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{HypervisorError, Result};
pub use mock::{MockHypervisor, CLEANUP_PATHS_ANNOTATION};
pub use ports::PortAllocator;
pub use traits::HypervisorGateway;
pub use types::{pod_spec_hash, GatewayEvent, PodHandle, PortRange};
