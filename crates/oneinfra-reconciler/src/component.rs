use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::etcd::EtcdConnector;
use crate::{controlplane, ingress};
use oneinfra_core::{Component, Hypervisor, Inquirer, ReleaseData, Role};
use oneinfra_hypervisor::HypervisorGateway;
use std::sync::Arc;

/// Collaborators shared by every reconciliation
pub struct ReconcileContext {
    pub gateway: Arc<dyn HypervisorGateway>,
    pub etcd: Arc<dyn EtcdConnector>,
    pub release: ReleaseData,
    pub config: ReconcilerConfig,
}

impl ReconcileContext {
    pub fn new(
        gateway: Arc<dyn HypervisorGateway>,
        etcd: Arc<dyn EtcdConnector>,
        release: ReleaseData,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            gateway,
            etcd,
            release,
            config,
        }
    }
}

/// The component variants and their reconciliation contract
///
/// `pre_reconcile` only reserves host ports and may be retried on its own.
/// `reconcile` converges the component and is a no-op once converged.
/// `reconcile_deletion` tears everything down and tolerates partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentReconciler {
    ControlPlane,
    Ingress,
}

impl ComponentReconciler {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::ControlPlane => ComponentReconciler::ControlPlane,
            Role::ControlPlaneIngress => ComponentReconciler::Ingress,
        }
    }

    pub async fn pre_reconcile(
        &self,
        ctx: &ReconcileContext,
        inquirer: &dyn Inquirer,
        component: &mut Component,
    ) -> Result<()> {
        match self {
            ComponentReconciler::ControlPlane => {
                controlplane::pre_reconcile(ctx, inquirer, component).await
            }
            ComponentReconciler::Ingress => ingress::pre_reconcile(ctx, inquirer, component).await,
        }
    }

    pub async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        inquirer: &dyn Inquirer,
        component: &mut Component,
    ) -> Result<()> {
        match self {
            ComponentReconciler::ControlPlane => {
                controlplane::reconcile(ctx, inquirer, component).await
            }
            ComponentReconciler::Ingress => ingress::reconcile(ctx, inquirer, component).await,
        }
    }

    pub async fn reconcile_deletion(
        &self,
        ctx: &ReconcileContext,
        inquirer: &dyn Inquirer,
        component: &mut Component,
    ) -> Result<()> {
        match self {
            ComponentReconciler::ControlPlane => {
                controlplane::reconcile_deletion(ctx, inquirer, component).await
            }
            ComponentReconciler::Ingress => {
                ingress::reconcile_deletion(ctx, inquirer, component).await
            }
        }
    }
}

/// The hypervisor the component is placed on
pub(crate) fn assigned_hypervisor<'a>(
    inquirer: &'a dyn Inquirer,
    component: &Component,
) -> Result<&'a Hypervisor> {
    inquirer
        .hypervisor()
        .ok_or_else(|| ReconcileError::no_hypervisor(component.key()))
}

/// A host port PreReconcile must already have recorded
pub(crate) fn required_port(component: &Component, name: &str) -> Result<u16> {
    component.allocated_port(name).ok_or_else(|| {
        ReconcileError::internal_error(format!(
            "host port '{}' of {} is not allocated; PreReconcile has not run",
            name,
            component.key()
        ))
    })
}

/// Lease every named port and record it in the component status
pub(crate) async fn request_ports(
    ctx: &ReconcileContext,
    hypervisor: &Hypervisor,
    component: &mut Component,
    names: &[&str],
) -> Result<()> {
    let key = component.key();
    for name in names {
        let port = ctx
            .gateway
            .request_port(hypervisor, &key.port_lease(name))
            .await?;
        component
            .status
            .allocated_host_ports
            .insert(name.to_string(), port);
    }
    Ok(())
}

/// Release named ports and forget them in the component status
pub(crate) async fn free_ports(
    ctx: &ReconcileContext,
    hypervisor: &Hypervisor,
    component: &mut Component,
    names: &[&str],
) -> Result<()> {
    let key = component.key();
    for name in names {
        ctx.gateway
            .free_port(hypervisor, &key.port_lease(name))
            .await?;
        component.status.allocated_host_ports.remove(*name);
    }
    Ok(())
}
