use crate::cluster::Cluster;
use crate::component::Component;
use crate::error::{OneinfraError, Result};
use crate::hypervisor::Hypervisor;
use crate::inquirer::ReconcileSnapshot;
use crate::types::ClusterKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Desired state plus recorded statuses, as read and written by the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub hypervisors: Vec<Hypervisor>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Manifest {
    pub fn from_yaml(data: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(data).map_err(|e| {
            OneinfraError::serialization_error(
                format!("Failed to parse manifest: {}", e),
                Some(Box::new(e)),
            )
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            OneinfraError::serialization_error(
                format!("Failed to serialize manifest: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    fn validate(&self) -> Result<()> {
        let hypervisors: HashSet<&str> = self.hypervisors.iter().map(|h| h.name.as_str()).collect();
        let mut seen = HashSet::new();

        for component in &self.components {
            if !seen.insert(component.key()) {
                return Err(OneinfraError::invalid_config(
                    format!("Component {} is declared twice", component.key()),
                    "Component names must be unique within a cluster",
                ));
            }
            if self.cluster(&component.cluster_key()).is_none() {
                return Err(OneinfraError::invalid_config(
                    format!("Component {} references an unknown cluster", component.key()),
                    "Declare the cluster under `clusters`",
                ));
            }
            if let Some(name) = &component.hypervisor {
                if !hypervisors.contains(name.as_str()) {
                    return Err(OneinfraError::invalid_config(
                        format!(
                            "Component {} is assigned to unknown hypervisor '{}'",
                            component.key(),
                            name
                        ),
                        "Declare the hypervisor under `hypervisors`",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn cluster(&self, key: &ClusterKey) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.namespace == key.namespace && c.name == key.name)
    }

    /// Consistent view for reconciling `component`
    pub fn snapshot(&self, component: &Component) -> Result<ReconcileSnapshot> {
        let cluster = self.cluster(&component.cluster_key()).ok_or_else(|| {
            OneinfraError::invalid_config(
                format!("Component {} references an unknown cluster", component.key()),
                "Declare the cluster under `clusters`",
            )
        })?;

        let siblings = self
            .components
            .iter()
            .filter(|c| c.namespace == cluster.namespace && c.cluster == cluster.name)
            .cloned()
            .collect();

        Ok(ReconcileSnapshot::new(
            component.key(),
            cluster.clone(),
            siblings,
            self.hypervisors.iter().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Role;
    use crate::inquirer::Inquirer;

    const MANIFEST: &str = r#"
clusters:
  - namespace: tenant
    name: prod
    kubernetesVersion: "1.31.2"
    controlPlaneReplicas: 1
hypervisors:
  - name: hv-1
    ipAddress: 10.0.0.1
components:
  - namespace: tenant
    cluster: prod
    name: cp-1
    role: ControlPlane
    hypervisor: hv-1
  - namespace: tenant
    cluster: prod
    name: ingress
    role: ControlPlaneIngress
"#;

    #[test]
    fn test_parse_and_snapshot() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.components.len(), 2);

        let snapshot = manifest.snapshot(&manifest.components[0]).unwrap();
        assert_eq!(snapshot.cluster().name, "prod");
        assert_eq!(snapshot.hypervisor().map(|h| h.name.as_str()), Some("hv-1"));
        assert_eq!(snapshot.cluster_components(Role::ControlPlaneIngress).len(), 1);
    }

    #[test]
    fn test_status_survives_round_trip() {
        let mut manifest = Manifest::from_yaml(MANIFEST).unwrap();
        manifest.components[0]
            .status
            .allocated_host_ports
            .insert("etcd-peer".to_string(), 30000);

        let reparsed = Manifest::from_yaml(&manifest.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed.components[0].allocated_port("etcd-peer"), Some(30000));
    }

    #[test]
    fn test_unknown_hypervisor_rejected() {
        let yaml = MANIFEST.replace("hypervisor: hv-1", "hypervisor: hv-9");
        assert!(matches!(
            Manifest::from_yaml(&yaml).unwrap_err(),
            OneinfraError::InvalidConfig { .. }
        ));
    }
}
