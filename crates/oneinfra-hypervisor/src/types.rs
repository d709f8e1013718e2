use crate::error::{HypervisorError, Result};
use k8s_openapi::api::core::v1::Pod;
use oneinfra_core::ComponentKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Inclusive range of host ports handed out to components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 30000,
            end: 32767,
        }
    }
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(HypervisorError::invalid_config(
                format!("Invalid host port range {}-{}", start, end),
                "Use a non-empty range such as 30000-32767",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Stable reference to a pod applied on a hypervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHandle {
    pub hypervisor: String,
    pub owner: ComponentKey,
    pub name: String,
    /// Hash of the applied specification
    pub spec_hash: String,
}

/// Name of a pod, required by every pod operation
pub fn pod_name(hypervisor: &str, pod: &Pod) -> Result<String> {
    pod.metadata
        .name
        .clone()
        .ok_or_else(|| HypervisorError::pod_operation_failed(hypervisor, "<unnamed>", "pod has no name"))
}

/// Content hash of a pod specification
pub fn pod_spec_hash(pod: &Pod) -> Result<String> {
    let encoded = serde_json::to_vec(pod).map_err(|e| {
        HypervisorError::internal_error(format!("failed to encode pod specification: {}", e))
    })?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}

/// A call observed by [`crate::MockHypervisor`], in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    EnsureImage {
        hypervisor: String,
        image: String,
        pulled: bool,
    },
    UploadFile {
        hypervisor: String,
        owner: ComponentKey,
        path: String,
        changed: bool,
    },
    EnsurePod {
        hypervisor: String,
        owner: ComponentKey,
        pod: String,
        changed: bool,
    },
    DeletePod {
        hypervisor: String,
        owner: ComponentKey,
        pod: String,
        existed: bool,
    },
    RunAndWait {
        hypervisor: String,
        owner: ComponentKey,
        pod: String,
        exit_code: i32,
    },
    RequestPort {
        hypervisor: String,
        lease: String,
        port: u16,
        allocated: bool,
    },
    FreePort {
        hypervisor: String,
        lease: String,
        port: Option<u16>,
    },
}

impl GatewayEvent {
    /// Whether the call changed state on the hypervisor
    pub fn is_mutation(&self) -> bool {
        match self {
            GatewayEvent::EnsureImage { pulled, .. } => *pulled,
            GatewayEvent::UploadFile { changed, .. } => *changed,
            GatewayEvent::EnsurePod { changed, .. } => *changed,
            GatewayEvent::DeletePod { existed, .. } => *existed,
            GatewayEvent::RunAndWait { .. } => true,
            GatewayEvent::RequestPort { allocated, .. } => *allocated,
            GatewayEvent::FreePort { port, .. } => port.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range_validation() {
        assert!(PortRange::new(30000, 30010).is_ok());
        assert!(PortRange::new(30010, 30000).is_err());
        assert_eq!(PortRange::default().to_string(), "30000-32767");
        assert!(PortRange::default().contains(30000));
        assert!(!PortRange::default().contains(2379));
    }

    #[test]
    fn test_spec_hash_follows_content() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("etcd".to_string());
        let first = pod_spec_hash(&pod).unwrap();
        assert_eq!(first, pod_spec_hash(&pod).unwrap());

        pod.metadata.name = Some("control-plane".to_string());
        assert_ne!(first, pod_spec_hash(&pod).unwrap());
    }
}
