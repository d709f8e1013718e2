use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a cluster across namespaces
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifies a component: (namespace, cluster, component name)
///
/// This is also the owner identity passed to the hypervisor gateway, so pods
/// and files of different components never collide on a shared host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    pub namespace: String,
    pub cluster: String,
    pub name: String,
}

impl ComponentKey {
    pub fn new(
        namespace: impl Into<String>,
        cluster: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            cluster: cluster.into(),
            name: name.into(),
        }
    }

    /// The key of the cluster this component belongs to
    pub fn cluster_key(&self) -> ClusterKey {
        ClusterKey::new(&self.namespace, &self.cluster)
    }

    /// Lease name for a named host port owned by this component
    ///
    /// Stable for the lifetime of the component, which is what makes
    /// repeated port requests return the same allocation.
    pub fn port_lease(&self, port_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.namespace, self.cluster, self.name, port_name
        )
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.cluster, self.name)
    }
}
