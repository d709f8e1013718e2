//! Certificates, keys and kubeconfigs a control-plane component needs on its
//! hypervisor, keyed by absolute path under the component secrets directory.

use crate::error::Result;
use crate::layout;
use crate::net::Ipv4Cidr;
use oneinfra_core::{Cluster, Component, ComponentKey, Hypervisor};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// In-cluster address every control-plane container reaches its local API server on
pub const LOCAL_API_SERVER_URL: &str = "https://127.0.0.1:6443";

const CONTROLLER_MANAGER_IDENTITY: &str = "system:kube-controller-manager";
const SCHEDULER_IDENTITY: &str = "system:kube-scheduler";

struct SecretBundle {
    key: ComponentKey,
    files: BTreeMap<String, String>,
}

impl SecretBundle {
    fn add(&mut self, relative: &str, contents: impl Into<String>) {
        self.files
            .insert(layout::secrets_path(&self.key, relative), contents.into());
    }
}

/// Render every secret file of a control-plane component
///
/// Certificates come from the component's certificate cache, so rendering
/// twice yields identical contents unless a SAN or an authority changed.
pub fn render(
    component: &mut Component,
    cluster: &Cluster,
    hypervisor: &Hypervisor,
    ingress_addresses: &[IpAddr],
) -> Result<BTreeMap<String, String>> {
    let mut bundle = SecretBundle {
        key: component.key(),
        files: BTreeMap::new(),
    };
    let host = hypervisor.ip_address.to_string();
    let authorities = &cluster.certificate_authorities;

    // etcd
    let etcd_server_ca = cluster.etcd_server_ca()?;
    let etcd_client_ca = authorities.etcd_client()?;
    let etcd_peer_ca = authorities.etcd_peer()?;
    let member = component.name.clone();

    let server = component.server_certificate(
        etcd_server_ca,
        "etcd-server",
        &member,
        &[host.clone(), "127.0.0.1".to_string(), "localhost".to_string()],
    )?;
    let peer = component.peer_certificate(etcd_peer_ca, "etcd-peer", &member, &[host.clone()])?;
    bundle.add("etcd/server.crt", server.certificate);
    bundle.add("etcd/server.key", server.private_key);
    bundle.add("etcd/client-ca.crt", etcd_client_ca.certificate.as_str());
    bundle.add("etcd/peer.crt", peer.certificate);
    bundle.add("etcd/peer.key", peer.private_key);
    bundle.add("etcd/peer-ca.crt", etcd_peer_ca.certificate.as_str());

    // kube-apiserver
    let api_server_ca = cluster.api_server_ca()?;
    let service_account = cluster.service_account_key()?;
    let sans = api_server_sans(cluster, hypervisor, ingress_addresses)?;
    let serving = component.server_certificate(api_server_ca, "apiserver", "kube-apiserver", &sans)?;
    let etcd_client = component.client_certificate(
        etcd_client_ca,
        "apiserver-etcd-client",
        "kube-apiserver-etcd-client",
        None,
        &[],
    )?;
    bundle.add("apiserver/apiserver.crt", serving.certificate);
    bundle.add("apiserver/apiserver.key", serving.private_key);
    bundle.add(
        "apiserver/client-ca.crt",
        authorities.api_server_client()?.certificate.as_str(),
    );
    bundle.add("apiserver/etcd-ca.crt", etcd_server_ca.certificate.as_str());
    bundle.add("apiserver/etcd-client.crt", etcd_client.certificate);
    bundle.add("apiserver/etcd-client.key", etcd_client.private_key);
    bundle.add("apiserver/sa.pub", service_account.public_key.as_str());
    bundle.add("apiserver/sa.key", service_account.private_key.as_str());

    // kube-controller-manager
    let signer = authorities.certificate_signer()?;
    bundle.add(
        "controller-manager/kubeconfig",
        component.kubeconfig(cluster, LOCAL_API_SERVER_URL, CONTROLLER_MANAGER_IDENTITY)?,
    );
    bundle.add("controller-manager/ca.crt", api_server_ca.certificate.as_str());
    bundle.add("controller-manager/sa.key", service_account.private_key.as_str());
    bundle.add("controller-manager/signer.crt", signer.certificate.as_str());
    bundle.add("controller-manager/signer.key", signer.private_key.as_str());

    // kube-scheduler
    bundle.add(
        "scheduler/kubeconfig",
        component.kubeconfig(cluster, LOCAL_API_SERVER_URL, SCHEDULER_IDENTITY)?,
    );

    Ok(bundle.files)
}

/// SANs of the API server serving certificate, deduplicated in order
pub fn api_server_sans(
    cluster: &Cluster,
    hypervisor: &Hypervisor,
    ingress_addresses: &[IpAddr],
) -> Result<Vec<String>> {
    let service_ip = Ipv4Cidr::parse(&cluster.service_cidr)?.first_host();

    let candidates = [
        hypervisor.ip_address.to_string(),
        "127.0.0.1".to_string(),
        "kubernetes".to_string(),
        "kubernetes.default".to_string(),
        "kubernetes.default.svc".to_string(),
        "kubernetes.default.svc.cluster.local".to_string(),
        service_ip.to_string(),
    ]
    .into_iter()
    .chain(cluster.api_server.extra_sans.iter().cloned())
    .chain(ingress_addresses.iter().map(IpAddr::to_string));

    let mut sans: Vec<String> = Vec::new();
    for san in candidates {
        if !sans.contains(&san) {
            sans.push(san);
        }
    }
    Ok(sans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oneinfra_core::Role;

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new("tenant", "prod", "1.31.2", 1);
        cluster.initialize_certificate_authorities().unwrap();
        cluster
    }

    fn hypervisor() -> Hypervisor {
        Hypervisor::new("hv-1", "10.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_api_server_sans() {
        let mut cluster = cluster();
        cluster.api_server.extra_sans = vec!["api.example.com".to_string(), "10.0.0.1".to_string()];
        let ingress: Vec<IpAddr> = vec!["10.0.9.1".parse().unwrap()];

        let sans = api_server_sans(&cluster, &hypervisor(), &ingress).unwrap();
        assert_eq!(
            sans,
            vec![
                "10.0.0.1",
                "127.0.0.1",
                "kubernetes",
                "kubernetes.default",
                "kubernetes.default.svc",
                "kubernetes.default.svc.cluster.local",
                "10.96.0.1",
                "api.example.com",
                "10.0.9.1",
            ]
        );
    }

    #[test]
    fn test_render_is_stable() {
        let cluster = cluster();
        let mut component = Component::new("tenant", "prod", "cp-1", Role::ControlPlane);

        let first = render(&mut component, &cluster, &hypervisor(), &[]).unwrap();
        let second = render(&mut component, &cluster, &hypervisor(), &[]).unwrap();
        assert_eq!(first, second);

        let root = "/etc/oneinfra/clusters/tenant/prod/cp-1";
        for file in [
            "etcd/server.crt",
            "etcd/peer.key",
            "apiserver/apiserver.crt",
            "apiserver/sa.pub",
            "controller-manager/kubeconfig",
            "scheduler/kubeconfig",
        ] {
            assert!(first.contains_key(&format!("{}/{}", root, file)), "{}", file);
        }
    }

    #[test]
    fn test_render_requires_authorities() {
        let cluster = Cluster::new("tenant", "prod", "1.31.2", 1);
        let mut component = Component::new("tenant", "prod", "cp-1", Role::ControlPlane);
        assert!(render(&mut component, &cluster, &hypervisor(), &[]).is_err());
    }
}
