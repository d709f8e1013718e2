use super::{APISERVER_PORT, CONTROL_PLANE_POD, ETCD_CLIENT_PORT, ETCD_PEER_PORT, ETCD_POD};
use crate::component::required_port;
use crate::error::Result;
use crate::layout;
use crate::pods::{flags, host_path_volume, host_port, mount, PodBuilder};
use k8s_openapi::api::core::v1::{Container, Pod};
use oneinfra_core::{Cluster, Component, EtcdBootstrap, Hypervisor, KubernetesImages};

const ETCD_PEER_CONTAINER_PORT: u16 = 2380;
const ETCD_CLIENT_CONTAINER_PORT: u16 = 2379;
const API_SERVER_CONTAINER_PORT: u16 = 6443;

const SECRETS_MOUNT: &str = "/etc/oneinfra";
const ETCD_DATA_MOUNT: &str = "/var/lib/etcd";

fn secret(relative: &str) -> String {
    format!("{}/{}", SECRETS_MOUNT, relative)
}

/// The etcd member pod, started with the recorded bootstrap flags
pub fn etcd_pod(
    component: &Component,
    hypervisor: &Hypervisor,
    bootstrap: &EtcdBootstrap,
    image: &str,
) -> Result<Pod> {
    let key = component.key();
    let peer_port = required_port(component, ETCD_PEER_PORT)?;
    let client_port = required_port(component, ETCD_CLIENT_PORT)?;

    let args = flags(&[
        ("name", component.name.clone()),
        ("data-dir", ETCD_DATA_MOUNT.to_string()),
        (
            "listen-peer-urls",
            format!("https://0.0.0.0:{}", ETCD_PEER_CONTAINER_PORT),
        ),
        (
            "listen-client-urls",
            format!("https://0.0.0.0:{}", ETCD_CLIENT_CONTAINER_PORT),
        ),
        ("initial-advertise-peer-urls", hypervisor.https_url(peer_port)),
        ("advertise-client-urls", hypervisor.https_url(client_port)),
        ("initial-cluster", bootstrap.initial_cluster_flag()),
        ("initial-cluster-state", bootstrap.state.to_string()),
        ("cert-file", secret("etcd/server.crt")),
        ("key-file", secret("etcd/server.key")),
        ("trusted-ca-file", secret("etcd/client-ca.crt")),
        ("client-cert-auth", "true".to_string()),
        ("peer-cert-file", secret("etcd/peer.crt")),
        ("peer-key-file", secret("etcd/peer.key")),
        ("peer-trusted-ca-file", secret("etcd/peer-ca.crt")),
        ("peer-client-cert-auth", "true".to_string()),
    ]);

    Ok(PodBuilder::new(ETCD_POD, &key)
        .volume(host_path_volume("secrets", &layout::secrets_dir(&key)))
        .volume(host_path_volume("data", &layout::storage_dir(&key, "etcd")))
        .container(Container {
            name: "etcd".to_string(),
            image: Some(image.to_string()),
            command: Some(vec!["etcd".to_string()]),
            args: Some(args),
            ports: Some(vec![
                host_port("peer", ETCD_PEER_CONTAINER_PORT, peer_port, "TCP"),
                host_port("client", ETCD_CLIENT_CONTAINER_PORT, client_port, "TCP"),
            ]),
            volume_mounts: Some(vec![
                mount("secrets", SECRETS_MOUNT, true),
                mount("data", ETCD_DATA_MOUNT, false),
            ]),
            ..Default::default()
        })
        .build())
}

/// API server, controller-manager and scheduler in one pod
///
/// The API server talks to the etcd member running next to it.
pub fn control_plane_pod(
    component: &Component,
    cluster: &Cluster,
    hypervisor: &Hypervisor,
    images: &KubernetesImages,
) -> Result<Pod> {
    let key = component.key();
    let api_server_port = required_port(component, APISERVER_PORT)?;
    let etcd_client_port = required_port(component, ETCD_CLIENT_PORT)?;

    let api_server_args = flags(&[
        ("secure-port", API_SERVER_CONTAINER_PORT.to_string()),
        ("etcd-servers", hypervisor.https_url(etcd_client_port)),
        ("etcd-cafile", secret("apiserver/etcd-ca.crt")),
        ("etcd-certfile", secret("apiserver/etcd-client.crt")),
        ("etcd-keyfile", secret("apiserver/etcd-client.key")),
        ("tls-cert-file", secret("apiserver/apiserver.crt")),
        ("tls-private-key-file", secret("apiserver/apiserver.key")),
        ("client-ca-file", secret("apiserver/client-ca.crt")),
        ("service-account-key-file", secret("apiserver/sa.pub")),
        ("service-account-signing-key-file", secret("apiserver/sa.key")),
        (
            "service-account-issuer",
            "https://kubernetes.default.svc.cluster.local".to_string(),
        ),
        ("service-cluster-ip-range", cluster.service_cidr.clone()),
        ("authorization-mode", "Node,RBAC".to_string()),
        ("endpoint-reconciler-type", "none".to_string()),
    ]);

    let controller_manager_args = flags(&[
        ("kubeconfig", secret("controller-manager/kubeconfig")),
        ("root-ca-file", secret("controller-manager/ca.crt")),
        (
            "service-account-private-key-file",
            secret("controller-manager/sa.key"),
        ),
        ("cluster-signing-cert-file", secret("controller-manager/signer.crt")),
        ("cluster-signing-key-file", secret("controller-manager/signer.key")),
        ("use-service-account-credentials", "true".to_string()),
        ("leader-elect", "true".to_string()),
    ]);

    let scheduler_args = flags(&[
        ("kubeconfig", secret("scheduler/kubeconfig")),
        ("leader-elect", "true".to_string()),
    ]);

    let container = |name: &str, image: &str, args: Vec<String>| Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![name.to_string()]),
        args: Some(args),
        volume_mounts: Some(vec![mount("secrets", SECRETS_MOUNT, true)]),
        ..Default::default()
    };

    let mut api_server = container("kube-apiserver", &images.kube_apiserver, api_server_args);
    api_server.ports = Some(vec![host_port(
        "https",
        API_SERVER_CONTAINER_PORT,
        api_server_port,
        "TCP",
    )]);

    Ok(PodBuilder::new(CONTROL_PLANE_POD, &key)
        .volume(host_path_volume("secrets", &layout::secrets_dir(&key)))
        .container(api_server)
        .container(container(
            "kube-controller-manager",
            &images.kube_controller_manager,
            controller_manager_args,
        ))
        .container(container(
            "kube-scheduler",
            &images.kube_scheduler,
            scheduler_args,
        ))
        .build())
}
