use crate::layout;
use crate::pods::{host_path_volume, host_port, mount, PodBuilder};
use k8s_openapi::api::core::v1::{Container, Pod};
use oneinfra_core::ComponentKey;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

pub const HAPROXY_POD: &str = "haproxy";
pub const CONFIG_HASH_ANNOTATION: &str = "oneinfra/config-hash";
pub const CONFIG_PATH: &str = "haproxy/haproxy.cfg";

const FRONTEND_PORT: u16 = 6443;
const CONFIG_MOUNT: &str = "/usr/local/etc/haproxy";

/// One API server behind the load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    pub address: SocketAddr,
}

/// TCP passthrough to every API server, health checked on `/livez`
pub fn render(backends: &[Backend]) -> String {
    let mut config = String::from(
        "global\n\
         \x20 log stdout format raw local0\n\
         \n\
         defaults\n\
         \x20 mode tcp\n\
         \x20 log global\n\
         \x20 timeout connect 10s\n\
         \x20 timeout client 86400s\n\
         \x20 timeout server 86400s\n\
         \n",
    );
    config.push_str(&format!(
        "frontend control-plane\n\
         \x20 bind *:{}\n\
         \x20 default_backend apiservers\n\
         \n\
         backend apiservers\n\
         \x20 option httpchk GET /livez\n\
         \x20 http-check expect status 200\n\
         \x20 balance roundrobin\n",
        FRONTEND_PORT
    ));
    for backend in backends {
        config.push_str(&format!(
            "  server {} {} check check-ssl verify none\n",
            backend.name, backend.address
        ));
    }
    config
}

/// Hex SHA-256 of a rendered configuration
pub fn config_hash(config: &str) -> String {
    Sha256::digest(config.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// The load balancer pod
///
/// The configuration hash is part of the pod, so a changed backend set
/// changes the pod spec and the gateway restarts it.
pub fn pod(key: &ComponentKey, image: &str, host: u16, config_hash: &str) -> Pod {
    let config_dir = layout::secrets_path(key, "haproxy");

    PodBuilder::new(HAPROXY_POD, key)
        .annotation(CONFIG_HASH_ANNOTATION, config_hash)
        .volume(host_path_volume("config", &config_dir))
        .container(Container {
            name: "haproxy".to_string(),
            image: Some(image.to_string()),
            ports: Some(vec![host_port("https", FRONTEND_PORT, host, "TCP")]),
            volume_mounts: Some(vec![mount("config", CONFIG_MOUNT, true)]),
            ..Default::default()
        })
        .build()
}
