//! Control-plane ingress: HAProxy in front of every API server, and an
//! optional WireGuard tunnel terminated on the same hypervisor.

mod haproxy;
mod wireguard;

pub use haproxy::{config_hash, Backend, CONFIG_HASH_ANNOTATION, HAPROXY_POD};
pub use wireguard::{interface_name, ACTIVATE_JOB, DEACTIVATE_JOB};

use crate::component::{
    assigned_hypervisor, free_ports, request_ports, required_port, ReconcileContext,
};
use crate::controlplane;
use crate::error::{ReconcileError, Result};
use crate::layout;
use oneinfra_core::{Component, Inquirer, Role};
use std::net::SocketAddr;
use tracing::{debug, info};

pub const APISERVER_PORT: &str = "apiserver";
pub const WIREGUARD_PORT: &str = "wireguard";

pub async fn pre_reconcile(
    ctx: &ReconcileContext,
    inquirer: &dyn Inquirer,
    component: &mut Component,
) -> Result<()> {
    let hypervisor = assigned_hypervisor(inquirer, component)?;
    let mut ports = vec![APISERVER_PORT];
    if inquirer.cluster().vpn_enabled().is_some() {
        ports.push(WIREGUARD_PORT);
    }
    request_ports(ctx, hypervisor, component, &ports).await
}

/// API servers to balance across
///
/// Every declared control-plane replica must exist, be placed and have its
/// API server port allocated; otherwise the ingress waits.
pub fn backends(inquirer: &dyn Inquirer, component: &Component) -> Result<Vec<Backend>> {
    let cluster = inquirer.cluster();
    let control_planes: Vec<&Component> = inquirer
        .cluster_components(Role::ControlPlane)
        .into_iter()
        .filter(|c| !c.is_deleting())
        .collect();

    if control_planes.len() != cluster.control_plane_replicas as usize {
        return Err(ReconcileError::replica_count_mismatch(
            component.key(),
            cluster.control_plane_replicas,
            control_planes.len(),
        ));
    }

    let mut backends = Vec::with_capacity(control_planes.len());
    let mut pending = Vec::new();
    for control_plane in control_planes {
        match (
            inquirer.component_hypervisor(control_plane),
            control_plane.allocated_port(controlplane::APISERVER_PORT),
        ) {
            (Some(hypervisor), Some(port)) => backends.push(Backend {
                name: control_plane.name.clone(),
                address: SocketAddr::new(hypervisor.ip_address, port),
            }),
            _ => pending.push(control_plane.name.clone()),
        }
    }

    if !pending.is_empty() {
        return Err(ReconcileError::siblings_not_placed(
            component.key(),
            Role::ControlPlane,
            &pending,
        ));
    }
    Ok(backends)
}

pub async fn reconcile(
    ctx: &ReconcileContext,
    inquirer: &dyn Inquirer,
    component: &mut Component,
) -> Result<()> {
    let hypervisor = assigned_hypervisor(inquirer, component)?;
    let cluster = inquirer.cluster();
    let key = component.key();

    let backends = backends(inquirer, component)?;
    let port = required_port(component, APISERVER_PORT)?;

    let config = haproxy::render(&backends);
    let hash = haproxy::config_hash(&config);
    let image = &ctx.release.haproxy_image;
    ctx.gateway.ensure_image(hypervisor, image).await?;
    ctx.gateway
        .upload_file(
            hypervisor,
            &key,
            &layout::secrets_path(&key, haproxy::CONFIG_PATH),
            &config,
        )
        .await?;
    let pod = haproxy::pod(&key, image, port, &hash);
    ctx.gateway.ensure_pod(hypervisor, &key, &pod).await?;

    match cluster.vpn_enabled() {
        Some(vpn) => {
            wireguard::reconcile(ctx, vpn, &cluster.vpn_peers, hypervisor, component).await?
        }
        None => {
            wireguard::deactivate(ctx, hypervisor, component).await?;
            if component.allocated_port(WIREGUARD_PORT).is_some() {
                free_ports(ctx, hypervisor, component, &[WIREGUARD_PORT]).await?;
            }
        }
    }

    component.status.input_endpoints = backends
        .iter()
        .map(|b| (b.name.clone(), format!("https://{}", b.address)))
        .collect();
    component
        .status
        .output_endpoints
        .insert(APISERVER_PORT.to_string(), hypervisor.https_url(port));

    debug!(component = %key, backends = backends.len(), "ingress reconciled");
    Ok(())
}

pub async fn reconcile_deletion(
    ctx: &ReconcileContext,
    inquirer: &dyn Inquirer,
    component: &mut Component,
) -> Result<()> {
    let key = component.key();
    let Some(hypervisor) = inquirer.hypervisor() else {
        debug!(component = %key, "no hypervisor assigned, nothing to tear down");
        return Ok(());
    };

    ctx.gateway.delete_pod(hypervisor, &key, HAPROXY_POD).await?;
    free_ports(ctx, hypervisor, component, &[APISERVER_PORT]).await?;

    wireguard::deactivate(ctx, hypervisor, component).await?;
    free_ports(ctx, hypervisor, component, &[WIREGUARD_PORT]).await?;

    let cleanup = layout::cleanup_job(&key, &ctx.release.toolbox_image);
    ctx.gateway
        .run_and_wait_for_pod(hypervisor, &key, &cleanup)
        .await?;

    component.status.input_endpoints.clear();
    component.status.output_endpoints.clear();
    info!(component = %key, hypervisor = %hypervisor.name, "ingress torn down");
    Ok(())
}
