//! oneinfra reconciler - converges control-plane components onto hypervisors
//!
//! This crate provides:
//! - The component contract: PreReconcile, Reconcile and ReconcileDeletion
//! - The control-plane reconciler, including etcd membership management
//! - The ingress reconciler with its optional WireGuard tunnel
//! - A driver running reconcilers over a manifest, one cluster at a time

pub mod component;
pub mod config;
pub mod controlplane;
pub mod driver;
pub mod error;
pub mod etcd;
pub mod ingress;
pub mod layout;
pub mod net;
pub mod pods;
pub mod retry;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use component::{ComponentReconciler, ReconcileContext};
pub use config::{EtcdConfig, ReconcilerConfig};
pub use driver::{Driver, Outcome, Report};
pub use error::{ReconcileError, Result};
pub use etcd::{EtcdConnector, FakeEtcd, GrpcEtcdConnector};
pub use retry::RetryPolicy;
