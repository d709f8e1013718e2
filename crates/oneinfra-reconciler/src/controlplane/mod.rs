//! Control-plane component: an etcd member plus the API server,
//! controller-manager and scheduler, all on one hypervisor.

mod etcd;
mod pod;
mod secrets;

pub use etcd::{joining_bootstrap, new_cluster_bootstrap, EtcdPeer};
pub use secrets::{api_server_sans, LOCAL_API_SERVER_URL};

use crate::component::{
    assigned_hypervisor, free_ports, request_ports, required_port, ReconcileContext,
};
use crate::error::{ReconcileError, Result};
use crate::layout;
use oneinfra_core::{Component, Inquirer, Role};
use std::net::IpAddr;
use tracing::{debug, info};

pub const ETCD_PEER_PORT: &str = "etcd-peer";
pub const ETCD_CLIENT_PORT: &str = "etcd-client";
pub const APISERVER_PORT: &str = "apiserver";

pub const ETCD_POD: &str = "etcd";
pub const CONTROL_PLANE_POD: &str = "control-plane";

const PORTS: [&str; 3] = [ETCD_PEER_PORT, ETCD_CLIENT_PORT, APISERVER_PORT];

pub async fn pre_reconcile(
    ctx: &ReconcileContext,
    inquirer: &dyn Inquirer,
    component: &mut Component,
) -> Result<()> {
    let hypervisor = assigned_hypervisor(inquirer, component)?;
    request_ports(ctx, hypervisor, component, &PORTS).await
}

pub async fn reconcile(
    ctx: &ReconcileContext,
    inquirer: &dyn Inquirer,
    component: &mut Component,
) -> Result<()> {
    let hypervisor = assigned_hypervisor(inquirer, component)?;
    let cluster = inquirer.cluster();
    let key = component.key();

    // Preconditions first: nothing below runs until every sibling is placed
    let ingresses: Vec<&Component> = inquirer
        .cluster_components(Role::ControlPlaneIngress)
        .into_iter()
        .filter(|c| !c.is_deleting())
        .collect();
    let unplaced: Vec<String> = ingresses
        .iter()
        .filter(|c| inquirer.component_hypervisor(c).is_none())
        .map(|c| c.name.clone())
        .collect();
    if !unplaced.is_empty() {
        return Err(ReconcileError::siblings_not_placed(
            &key,
            Role::ControlPlaneIngress,
            &unplaced,
        ));
    }
    let peers = etcd::peers(inquirer, component)?;

    let images = ctx.release.images(&cluster.kubernetes_version)?;
    ctx.gateway.ensure_images(hypervisor, &images.all()).await?;

    let ingress_addresses: Vec<IpAddr> = ingresses
        .iter()
        .filter_map(|c| inquirer.component_hypervisor(c))
        .map(|h| h.ip_address)
        .collect();
    let files = secrets::render(component, cluster, hypervisor, &ingress_addresses)?;
    ctx.gateway.upload_files(hypervisor, &key, &files).await?;

    let siblings = etcd::sibling_bootstraps(inquirer, component);
    etcd::run_etcd(
        ctx,
        cluster,
        hypervisor,
        component,
        &peers,
        &siblings,
        &images.etcd,
    )
    .await?;

    let control_plane = pod::control_plane_pod(component, cluster, hypervisor, &images)?;
    ctx.gateway.ensure_pod(hypervisor, &key, &control_plane).await?;

    let api_server_url = required_port(component, APISERVER_PORT)
        .map(|port| hypervisor.https_url(port))?;
    let etcd_client_url = required_port(component, ETCD_CLIENT_PORT)
        .map(|port| hypervisor.https_url(port))?;
    let outputs = &mut component.status.output_endpoints;
    outputs.insert(APISERVER_PORT.to_string(), api_server_url);
    outputs.insert(ETCD_CLIENT_PORT.to_string(), etcd_client_url);

    debug!(component = %key, hypervisor = %hypervisor.name, "control plane reconciled");
    Ok(())
}

/// Tear the control plane down
///
/// The API server goes first so nothing writes to the member while it is
/// being removed. The etcd pod is only stopped once the member has left the
/// cluster, or removal was skipped.
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

    ctx.gateway
        .delete_pod(hypervisor, &key, CONTROL_PLANE_POD)
        .await?;
    free_ports(ctx, hypervisor, component, &[APISERVER_PORT]).await?;

    etcd::remove_member(ctx, inquirer, hypervisor, component).await?;

    ctx.gateway.delete_pod(hypervisor, &key, ETCD_POD).await?;
    free_ports(ctx, hypervisor, component, &[ETCD_PEER_PORT, ETCD_CLIENT_PORT]).await?;

    let cleanup = layout::cleanup_job(&key, &ctx.release.toolbox_image);
    ctx.gateway
        .run_and_wait_for_pod(hypervisor, &key, &cleanup)
        .await?;

    component.status.output_endpoints.clear();
    component.status.etcd_bootstrap = None;
    info!(component = %key, hypervisor = %hypervisor.name, "control plane torn down");
    Ok(())
}
