//! Encrypted tunnel terminated on the ingress hypervisor
//!
//! The tunnel is a WireGuard interface owned by a systemd unit on the host.
//! Its files live in the component secrets directory; a privileged job
//! entering the host namespaces links and (re)starts the unit whenever the
//! rendered files change.

use super::WIREGUARD_PORT;
use crate::component::{required_port, ReconcileContext};
use crate::error::Result;
use crate::layout;
use crate::net::Ipv4Cidr;
use crate::pods::PodBuilder;
use k8s_openapi::api::core::v1::{Container, Pod, SecurityContext};
use oneinfra_core::{Component, ComponentKey, Hypervisor, VpnConfig, VpnPeer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::info;

pub const ACTIVATE_JOB: &str = "wireguard-activate";
pub const DEACTIVATE_JOB: &str = "wireguard-deactivate";

const HOST: &str = "nsenter -t 1 -m -u -n -i --";

/// Interface name, unique per component and within the 15 byte limit
pub fn interface_name(key: &ComponentKey) -> String {
    let digest = Sha256::digest(key.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("wg{}", &hex[..10])
}

pub fn unit_name(interface: &str) -> String {
    format!("oneinfra-{}.service", interface)
}

/// WireGuard configuration in `wg setconf` format
///
/// Addresses are not part of this format; the up script assigns them.
pub fn render_config(vpn: &VpnConfig, peers: &[VpnPeer], listen_port: u16) -> String {
    let mut config = format!(
        "[Interface]\nPrivateKey = {}\nListenPort = {}\n",
        vpn.private_key, listen_port
    );
    for peer in peers {
        config.push_str(&format!(
            "\n[Peer]\n# {}\nPublicKey = {}\nAllowedIPs = {}\n",
            peer.name,
            peer.public_key,
            peer.allowed_ips.join(", ")
        ));
    }
    config
}

pub fn render_up_script(interface: &str, address: &str, config_path: &str) -> String {
    format!(
        "#!/bin/sh\n\
         set -e\n\
         ip link show {iface} >/dev/null 2>&1 || ip link add dev {iface} type wireguard\n\
         ip address replace {address} dev {iface}\n\
         wg setconf {iface} {config}\n\
         ip link set up dev {iface}\n",
        iface = interface,
        address = address,
        config = config_path,
    )
}

pub fn render_down_script(interface: &str) -> String {
    format!(
        "#!/bin/sh\nip link del dev {} 2>/dev/null || true\n",
        interface
    )
}

pub fn render_unit(key: &ComponentKey, up_path: &str, down_path: &str) -> String {
    format!(
        "[Unit]\n\
         Description=oneinfra tunnel for {key}\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         RemainAfterExit=yes\n\
         ExecStart=/bin/sh {up}\n\
         ExecStop=/bin/sh {down}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        key = key,
        up = up_path,
        down = down_path,
    )
}

/// Every tunnel file keyed by absolute path on the hypervisor
pub fn files(
    key: &ComponentKey,
    vpn: &VpnConfig,
    peers: &[VpnPeer],
    listen_port: u16,
) -> Result<BTreeMap<String, String>> {
    let interface = interface_name(key);
    let cidr = Ipv4Cidr::parse(&vpn.cidr)?;
    let address = format!("{}/{}", cidr.first_host(), cidr.prefix_len);

    let config_path = layout::secrets_path(key, &format!("wireguard/{}.conf", interface));
    let up_path = layout::secrets_path(key, "wireguard/up.sh");
    let down_path = layout::secrets_path(key, "wireguard/down.sh");
    let unit_path = layout::secrets_path(key, &format!("wireguard/{}", unit_name(&interface)));

    Ok(BTreeMap::from([
        (
            unit_path,
            render_unit(key, &up_path, &down_path),
        ),
        (
            up_path,
            render_up_script(&interface, &address, &config_path),
        ),
        (down_path, render_down_script(&interface)),
        (config_path, render_config(vpn, peers, listen_port)),
    ]))
}

/// Hash over paths and contents of the tunnel files
pub fn files_hash(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, contents) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(contents.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn host_job(key: &ComponentKey, name: &str, toolbox_image: &str, script: String) -> Pod {
    PodBuilder::new(name, key)
        .host_namespaces()
        .container(Container {
            name: name.to_string(),
            image: Some(toolbox_image.to_string()),
            command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        })
        .job()
        .build()
}

/// Job linking the unit from the secrets directory and restarting it
pub fn activation_job(key: &ComponentKey, toolbox_image: &str) -> Pod {
    let unit = unit_name(&interface_name(key));
    let unit_path = layout::secrets_path(key, &format!("wireguard/{}", unit));
    let script = format!(
        "set -e\n\
         {host} systemctl link --force {path}\n\
         {host} systemctl daemon-reload\n\
         {host} systemctl enable {unit}\n\
         {host} systemctl restart {unit}\n",
        host = HOST,
        path = unit_path,
        unit = unit,
    );
    host_job(key, ACTIVATE_JOB, toolbox_image, script)
}

/// Job stopping and unlinking the unit; succeeds when it is already gone
pub fn deactivation_job(key: &ComponentKey, toolbox_image: &str) -> Pod {
    let unit = unit_name(&interface_name(key));
    let script = format!(
        "{host} systemctl disable --now {unit} || true\n\
         {host} systemctl daemon-reload\n",
        host = HOST,
        unit = unit,
    );
    host_job(key, DEACTIVATE_JOB, toolbox_image, script)
}

/// Upload the tunnel files and activate them when they changed
pub async fn reconcile(
    ctx: &ReconcileContext,
    vpn: &VpnConfig,
    peers: &[VpnPeer],
    hypervisor: &Hypervisor,
    component: &mut Component,
) -> Result<()> {
    let key = component.key();
    let listen_port = required_port(component, WIREGUARD_PORT)?;
    let files = files(&key, vpn, peers, listen_port)?;
    ctx.gateway.upload_files(hypervisor, &key, &files).await?;

    let hash = files_hash(&files);
    if component.status.tunnel_config_hash.as_deref() == Some(hash.as_str()) {
        return Ok(());
    }

    let job = activation_job(&key, &ctx.release.toolbox_image);
    ctx.gateway.run_and_wait_for_pod(hypervisor, &key, &job).await?;
    component.status.tunnel_config_hash = Some(hash);
    info!(component = %key, interface = %interface_name(&key), "tunnel activated");
    Ok(())
}

/// Stop the tunnel if it may have been activated
///
/// An activation that failed halfway can leave the unit linked and enabled
/// without a recorded hash, so a leased tunnel port is enough to run the
/// deactivation job.
pub async fn deactivate(
    ctx: &ReconcileContext,
    hypervisor: &Hypervisor,
    component: &mut Component,
) -> Result<()> {
    if component.status.tunnel_config_hash.is_none()
        && component.allocated_port(WIREGUARD_PORT).is_none()
    {
        return Ok(());
    }
    let key = component.key();
    let job = deactivation_job(&key, &ctx.release.toolbox_image);
    ctx.gateway.run_and_wait_for_pod(hypervisor, &key, &job).await?;
    component.status.tunnel_config_hash = None;
    info!(component = %key, "tunnel deactivated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ComponentKey {
        ComponentKey::new("tenant", "prod", "ingress")
    }

    fn vpn() -> VpnConfig {
        VpnConfig {
            enabled: true,
            cidr: "10.10.0.0/16".to_string(),
            private_key: "cHJpdmF0ZQ==".to_string(),
            public_key: None,
        }
    }

    fn peers() -> Vec<VpnPeer> {
        vec![VpnPeer {
            name: "laptop".to_string(),
            public_key: "cHVibGlj".to_string(),
            allowed_ips: vec!["10.10.0.2/32".to_string()],
        }]
    }

    #[test]
    fn test_interface_name() {
        let name = interface_name(&key());
        assert_eq!(name.len(), 12);
        assert!(name.starts_with("wg"));
        assert_eq!(name, interface_name(&key()));
        assert_ne!(name, interface_name(&ComponentKey::new("tenant", "dev", "ingress")));
    }

    #[test]
    fn test_render_config() {
        let config = render_config(&vpn(), &peers(), 30500);
        assert!(config.starts_with("[Interface]\nPrivateKey = cHJpdmF0ZQ==\nListenPort = 30500\n"));
        assert!(config.contains("[Peer]\n# laptop\nPublicKey = cHVibGlj\nAllowedIPs = 10.10.0.2/32\n"));
        assert!(!config.contains("Address"));
    }

    #[test]
    fn test_files_assign_first_host() {
        let files = files(&key(), &vpn(), &peers(), 30500).unwrap();
        assert_eq!(files.len(), 4);
        let up = &files[&layout::secrets_path(&key(), "wireguard/up.sh")];
        assert!(up.contains("ip address replace 10.10.0.1/16 dev wg"));
    }

    #[test]
    fn test_hash_changes_with_peers() {
        let before = files_hash(&files(&key(), &vpn(), &peers(), 30500).unwrap());
        let after = files_hash(&files(&key(), &vpn(), &[], 30500).unwrap());
        assert_ne!(before, after);
    }

    #[test]
    fn test_activation_job_runs_in_host_namespaces() {
        let job = activation_job(&key(), "busybox:1.36.1");
        let spec = job.spec.unwrap();
        assert_eq!(spec.host_pid, Some(true));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let script = &spec.containers[0].command.as_ref().unwrap()[2];
        assert!(script.contains("systemctl restart oneinfra-wg"));
    }
}
