use crate::error::{OneinfraError, Result};
use crate::pki::{CertificateAuthority, ServiceAccountKey};
use crate::types::ClusterKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default service CIDR handed to the API server
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";

/// Certificate authorities owned by a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthorities {
    /// Signs client certificates presented to the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_client: Option<CertificateAuthority>,
    /// Used by the controller-manager to sign CSRs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_signer: Option<CertificateAuthority>,
    /// Signs client certificates presented to etcd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_client: Option<CertificateAuthority>,
    /// Signs etcd peer certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_peer: Option<CertificateAuthority>,
}

impl CertificateAuthorities {
    pub fn api_server_client(&self) -> Result<&CertificateAuthority> {
        self.api_server_client
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("api-server-client"))
    }

    pub fn certificate_signer(&self) -> Result<&CertificateAuthority> {
        self.certificate_signer
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("certificate-signer"))
    }

    pub fn etcd_client(&self) -> Result<&CertificateAuthority> {
        self.etcd_client
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("etcd-client"))
    }

    pub fn etcd_peer(&self) -> Result<&CertificateAuthority> {
        self.etcd_peer
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("etcd-peer"))
    }
}

/// etcd server settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdServer {
    /// Authority for etcd serving certificates; its certificate is the pool
    /// clients use to verify etcd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificateAuthority>,
}

/// API server settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    /// Authority for API server serving certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CertificateAuthority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountKey>,
    /// Extra SANs added to every API server serving certificate
    #[serde(default)]
    pub extra_sans: Vec<String>,
}

/// Encrypted tunnel overlay terminated on the ingress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnConfig {
    pub enabled: bool,
    /// Overlay network, e.g. "10.0.0.0/16"; the ingress takes the first address
    pub cidr: String,
    /// WireGuard private key of the ingress (base64)
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// A tunnel peer allowed to reach the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnPeer {
    pub name: String,
    pub public_key: String,
    /// Overlay addresses routed to this peer, e.g. "10.0.0.2/32"
    pub allowed_ips: Vec<String>,
}

fn default_service_cidr() -> String {
    DEFAULT_SERVICE_CIDR.to_string()
}

/// A tenant's desired Kubernetes control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub namespace: String,
    pub name: String,
    pub kubernetes_version: String,
    pub control_plane_replicas: u32,
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,
    #[serde(default)]
    pub certificate_authorities: CertificateAuthorities,
    #[serde(default)]
    pub etcd_server: EtcdServer,
    #[serde(default)]
    pub api_server: ApiServer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn: Option<VpnConfig>,
    #[serde(default)]
    pub vpn_peers: Vec<VpnPeer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Cluster {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kubernetes_version: impl Into<String>,
        control_plane_replicas: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kubernetes_version: kubernetes_version.into(),
            control_plane_replicas,
            service_cidr: default_service_cidr(),
            certificate_authorities: CertificateAuthorities::default(),
            etcd_server: EtcdServer::default(),
            api_server: ApiServer::default(),
            vpn: None,
            vpn_peers: Vec::new(),
            deletion_timestamp: None,
        }
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(&self.namespace, &self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The tunnel configuration, only when the overlay is enabled
    pub fn vpn_enabled(&self) -> Option<&VpnConfig> {
        self.vpn.as_ref().filter(|vpn| vpn.enabled)
    }

    pub fn etcd_server_ca(&self) -> Result<&CertificateAuthority> {
        self.etcd_server
            .ca
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("etcd-server"))
    }

    pub fn api_server_ca(&self) -> Result<&CertificateAuthority> {
        self.api_server
            .ca
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("api-server"))
    }

    pub fn service_account_key(&self) -> Result<&ServiceAccountKey> {
        self.api_server
            .service_account
            .as_ref()
            .ok_or_else(|| OneinfraError::ca_not_initialized("service-account"))
    }

    /// Create every missing certificate authority and the service account
    /// key. Existing material is never replaced. Returns whether anything was
    /// generated.
    pub fn initialize_certificate_authorities(&mut self) -> Result<bool> {
        let mut generated = Vec::new();

        let slots: [(&str, &mut Option<CertificateAuthority>); 6] = [
            ("api-server", &mut self.api_server.ca),
            (
                "api-server-client",
                &mut self.certificate_authorities.api_server_client,
            ),
            (
                "certificate-signer",
                &mut self.certificate_authorities.certificate_signer,
            ),
            ("etcd-server", &mut self.etcd_server.ca),
            ("etcd-client", &mut self.certificate_authorities.etcd_client),
            ("etcd-peer", &mut self.certificate_authorities.etcd_peer),
        ];
        for (name, slot) in slots {
            if slot.is_none() {
                *slot = Some(CertificateAuthority::generate(&format!("{}-ca", name))?);
                generated.push(name);
            }
        }

        if self.api_server.service_account.is_none() {
            self.api_server.service_account = Some(ServiceAccountKey::generate()?);
            generated.push("service-account");
        }

        if !generated.is_empty() {
            info!(
                "Initialized {:?} for cluster {}",
                generated,
                self.key()
            );
        }
        Ok(!generated.is_empty())
    }
}
