use crate::cluster::Cluster;
use crate::error::Result;
use crate::kubeconfig;
use crate::pki::{Certificate, CertificateAuthority, CertificateKind, CertificateRequest};
use crate::types::{ClusterKey, ComponentKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Role a component plays in its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// etcd + API server + controller-manager + scheduler
    ControlPlane,
    /// Load balancer in front of the control plane API servers
    ControlPlaneIngress,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ControlPlane => write!(f, "control-plane"),
            Role::ControlPlaneIngress => write!(f, "control-plane-ingress"),
        }
    }
}

/// `--initial-cluster-state` of an etcd member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InitialClusterState {
    New,
    Existing,
}

impl fmt::Display for InitialClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialClusterState::New => write!(f, "new"),
            InitialClusterState::Existing => write!(f, "existing"),
        }
    }
}

/// One `name=peerURL` entry of `--initial-cluster`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialClusterMember {
    pub name: String,
    pub peer_url: String,
}

/// Static etcd flags chosen when the member was first brought up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBootstrap {
    pub state: InitialClusterState,
    pub initial_cluster: Vec<InitialClusterMember>,
}

impl EtcdBootstrap {
    /// Render the `--initial-cluster` flag value
    pub fn initial_cluster_flag(&self) -> String {
        self.initial_cluster
            .iter()
            .map(|m| format!("{}={}", m.name, m.peer_url))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Observed state written back by reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub allocated_host_ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub client_certificates: BTreeMap<String, Certificate>,
    #[serde(default)]
    pub server_certificates: BTreeMap<String, Certificate>,
    #[serde(default)]
    pub input_endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub output_endpoints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_bootstrap: Option<EtcdBootstrap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_config_hash: Option<String>,
}

/// One control-plane role instance, bound to at most one hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub namespace: String,
    pub cluster: String,
    pub name: String,
    pub role: Role,
    /// Name of the assigned hypervisor, set by placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ComponentStatus,
}

impl Component {
    pub fn new(
        namespace: impl Into<String>,
        cluster: impl Into<String>,
        name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            cluster: cluster.into(),
            name: name.into(),
            role,
            hypervisor: None,
            deletion_timestamp: None,
            status: ComponentStatus::default(),
        }
    }

    pub fn key(&self) -> ComponentKey {
        ComponentKey::new(&self.namespace, &self.cluster, &self.name)
    }

    pub fn cluster_key(&self) -> ClusterKey {
        ClusterKey::new(&self.namespace, &self.cluster)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn allocated_port(&self, name: &str) -> Option<u16> {
        self.status.allocated_host_ports.get(name).copied()
    }

    /// Client certificate `name`, issued by `ca`
    ///
    /// The certificate is cached in the component status and only re-issued
    /// when the subject, SANs or issuing authority change.
    pub fn client_certificate(
        &mut self,
        ca: &CertificateAuthority,
        name: &str,
        common_name: &str,
        organization: Option<&str>,
        extra_sans: &[String],
    ) -> Result<Certificate> {
        let request = CertificateRequest {
            kind: CertificateKind::Client,
            common_name: common_name.to_string(),
            organization: organization.map(str::to_string),
            sans: extra_sans.to_vec(),
        };
        let key = self.key();
        cached_or_issue(&mut self.status.client_certificates, &key, ca, name, request)
    }

    /// Server certificate `name`, issued by `ca`; cached like client certificates
    pub fn server_certificate(
        &mut self,
        ca: &CertificateAuthority,
        name: &str,
        common_name: &str,
        extra_sans: &[String],
    ) -> Result<Certificate> {
        self.issue_cached(ca, name, CertificateKind::Server, common_name, extra_sans)
    }

    /// Peer certificate `name` (server and client auth), issued by `ca`
    pub fn peer_certificate(
        &mut self,
        ca: &CertificateAuthority,
        name: &str,
        common_name: &str,
        extra_sans: &[String],
    ) -> Result<Certificate> {
        self.issue_cached(ca, name, CertificateKind::Peer, common_name, extra_sans)
    }

    fn issue_cached(
        &mut self,
        ca: &CertificateAuthority,
        name: &str,
        kind: CertificateKind,
        common_name: &str,
        extra_sans: &[String],
    ) -> Result<Certificate> {
        let request = CertificateRequest {
            kind,
            common_name: common_name.to_string(),
            organization: None,
            sans: extra_sans.to_vec(),
        };
        let key = self.key();
        cached_or_issue(&mut self.status.server_certificates, &key, ca, name, request)
    }

    /// Kubeconfig for `identity`, pointing at `server_url`
    ///
    /// The embedded client certificate comes from the cluster's API server
    /// client authority and is cached under `kubeconfig/{identity}`.
    pub fn kubeconfig(
        &mut self,
        cluster: &Cluster,
        server_url: &str,
        identity: &str,
    ) -> Result<String> {
        let client_ca = cluster.certificate_authorities.api_server_client()?;
        let server_ca = cluster.api_server_ca()?;
        let certificate = self.client_certificate(
            client_ca,
            &format!("kubeconfig/{}", identity),
            identity,
            None,
            &[],
        )?;
        kubeconfig::render(&cluster.name, server_url, server_ca, identity, &certificate)
    }
}

fn cached_or_issue(
    cache: &mut BTreeMap<String, Certificate>,
    owner: &ComponentKey,
    ca: &CertificateAuthority,
    name: &str,
    request: CertificateRequest,
) -> Result<Certificate> {
    if let Some(existing) = cache.get(name) {
        if existing.matches(ca, &request) {
            return Ok(existing.clone());
        }
    }

    debug!("Issuing certificate '{}' for component {}", name, owner);
    let certificate = ca.issue(&request)?;
    cache.insert(name.to_string(), certificate.clone());
    Ok(certificate)
}
