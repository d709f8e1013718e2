use crate::cluster::Cluster;
use crate::component::{Component, Role};
use crate::hypervisor::Hypervisor;
use crate::types::ComponentKey;
use std::collections::BTreeMap;

/// Read-only view of the world for one reconciliation invocation
///
/// The component under reconciliation is handed to the reconciler separately
/// as `&mut Component`; everything reachable through this trait is a
/// snapshot and must stay consistent for the whole invocation.
pub trait Inquirer: Send + Sync {
    /// Hypervisor assigned to the component under reconciliation
    fn hypervisor(&self) -> Option<&Hypervisor>;

    /// Cluster owning the component under reconciliation
    fn cluster(&self) -> &Cluster;

    /// Components of the owning cluster with `role`, in declaration order.
    /// Deletion-marked components are included.
    fn cluster_components(&self, role: Role) -> Vec<&Component>;

    /// Hypervisor assigned to an arbitrary component, if any
    fn component_hypervisor(&self, component: &Component) -> Option<&Hypervisor>;
}

/// Owned snapshot implementing [`Inquirer`]
#[derive(Debug, Clone)]
pub struct ReconcileSnapshot {
    component: ComponentKey,
    cluster: Cluster,
    components: Vec<Component>,
    hypervisors: BTreeMap<String, Hypervisor>,
}

impl ReconcileSnapshot {
    pub fn new(
        component: ComponentKey,
        cluster: Cluster,
        components: Vec<Component>,
        hypervisors: impl IntoIterator<Item = Hypervisor>,
    ) -> Self {
        Self {
            component,
            cluster,
            components,
            hypervisors: hypervisors
                .into_iter()
                .map(|h| (h.name.clone(), h))
                .collect(),
        }
    }

    pub fn component_key(&self) -> &ComponentKey {
        &self.component
    }
}

impl Inquirer for ReconcileSnapshot {
    fn hypervisor(&self) -> Option<&Hypervisor> {
        self.components
            .iter()
            .find(|c| c.key() == self.component)
            .and_then(|c| self.component_hypervisor(c))
    }

    fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    fn cluster_components(&self, role: Role) -> Vec<&Component> {
        self.components
            .iter()
            .filter(|c| {
                c.role == role && c.namespace == self.cluster.namespace && c.cluster == self.cluster.name
            })
            .collect()
    }

    fn component_hypervisor(&self, component: &Component) -> Option<&Hypervisor> {
        component
            .hypervisor
            .as_deref()
            .and_then(|name| self.hypervisors.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ReconcileSnapshot {
        let cluster = Cluster::new("ns", "c1", "1.31.2", 2);
        let mut cp1 = Component::new("ns", "c1", "cp-1", Role::ControlPlane);
        cp1.hypervisor = Some("hv-1".to_string());
        let cp2 = Component::new("ns", "c1", "cp-2", Role::ControlPlane);
        let ingress = Component::new("ns", "c1", "ingress", Role::ControlPlaneIngress);
        let foreign = Component::new("ns", "c2", "cp-1", Role::ControlPlane);

        ReconcileSnapshot::new(
            cp1.key(),
            cluster,
            vec![cp1, cp2, ingress, foreign],
            vec![Hypervisor::new("hv-1", "10.0.0.1".parse().unwrap())],
        )
    }

    #[test]
    fn test_cluster_components_filters_role_and_cluster() {
        let snapshot = snapshot();
        let names: Vec<_> = snapshot
            .cluster_components(Role::ControlPlane)
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["cp-1", "cp-2"]);
        assert_eq!(snapshot.cluster_components(Role::ControlPlaneIngress).len(), 1);
    }

    #[test]
    fn test_hypervisor_lookup() {
        let snapshot = snapshot();
        assert_eq!(snapshot.hypervisor().map(|h| h.name.as_str()), Some("hv-1"));

        let cp2 = snapshot.cluster_components(Role::ControlPlane)[1];
        assert!(snapshot.component_hypervisor(cp2).is_none());
    }
}
