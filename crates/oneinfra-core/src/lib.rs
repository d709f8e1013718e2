//! oneinfra core - data model shared by the reconcilers
//!
//! This crate provides:
//! - Cluster, component and hypervisor definitions
//! - Certificate authorities, certificate issuance and kubeconfig rendering
//! - The embedded Kubernetes release bundle
//! - The `Inquirer` snapshot seam and the YAML manifest driving the CLI

pub mod cluster;
pub mod component;
pub mod error;
pub mod hypervisor;
pub mod inquirer;
mod kubeconfig;
pub mod manifest;
pub mod pki;
pub mod release;
pub mod types;

// Re-export commonly used types
pub use cluster::{
    ApiServer, CertificateAuthorities, Cluster, EtcdServer, VpnConfig, VpnPeer,
    DEFAULT_SERVICE_CIDR,
};
pub use component::{
    Component, ComponentStatus, EtcdBootstrap, InitialClusterMember, InitialClusterState, Role,
};
pub use error::{OneinfraError, Result};
pub use hypervisor::Hypervisor;
pub use inquirer::{Inquirer, ReconcileSnapshot};
pub use manifest::Manifest;
pub use pki::{
    Certificate, CertificateAuthority, CertificateKind, CertificateRequest, ServiceAccountKey,
};
pub use release::{KubernetesImages, ReleaseData};
pub use types::{ClusterKey, ComponentKey};
