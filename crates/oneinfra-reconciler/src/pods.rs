use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HostPathVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use oneinfra_core::ComponentKey;
use std::collections::BTreeMap;

/// Assembles the pods reconcilers hand to the hypervisor gateway
pub struct PodBuilder {
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
    host_network: bool,
    host_pid: bool,
    restart_policy: Option<String>,
}

impl PodBuilder {
    /// A pod labelled with its owning component
    pub fn new(name: &str, owner: &ComponentKey) -> Self {
        let labels = BTreeMap::from([
            ("oneinfra/namespace".to_string(), owner.namespace.clone()),
            ("oneinfra/cluster".to_string(), owner.cluster.clone()),
            ("oneinfra/component".to_string(), owner.name.clone()),
        ]);
        Self {
            name: name.to_string(),
            labels,
            annotations: BTreeMap::new(),
            containers: Vec::new(),
            volumes: Vec::new(),
            host_network: false,
            host_pid: false,
            restart_policy: None,
        }
    }

    pub fn annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    pub fn volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Share the host network and PID namespaces
    pub fn host_namespaces(mut self) -> Self {
        self.host_network = true;
        self.host_pid = true;
        self
    }

    /// Run to completion once instead of being restarted
    pub fn job(mut self) -> Self {
        self.restart_policy = Some("Never".to_string());
        self
    }

    pub fn build(self) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                labels: Some(self.labels),
                annotations: (!self.annotations.is_empty()).then_some(self.annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: self.containers,
                volumes: (!self.volumes.is_empty()).then_some(self.volumes),
                host_network: self.host_network.then_some(true),
                host_pid: self.host_pid.then_some(true),
                restart_policy: self.restart_policy,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some("DirectoryOrCreate".to_string()),
        }),
        ..Default::default()
    }
}

pub fn mount(volume: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

/// Container port published on the hypervisor at `host_port`
pub fn host_port(name: &str, container_port: u16, host_port: u16, protocol: &str) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(container_port),
        host_port: Some(i32::from(host_port)),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

/// Render `--key=value` flags, keeping their order
pub fn flags(pairs: &[(&str, String)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(key, value)| format!("--{}={}", key, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_labels_owner() {
        let owner = ComponentKey::new("tenant", "prod", "cp-1");
        let pod = PodBuilder::new("etcd", &owner)
            .container(Container {
                name: "etcd".to_string(),
                ..Default::default()
            })
            .build();

        assert_eq!(pod.metadata.name.as_deref(), Some("etcd"));
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels["oneinfra/component"], "cp-1");
        assert!(pod.metadata.annotations.is_none());
        assert!(pod.spec.unwrap().restart_policy.is_none());
    }

    #[test]
    fn test_flags() {
        assert_eq!(
            flags(&[("name", "cp-1".to_string()), ("data-dir", "/var/lib/etcd".to_string())]),
            vec!["--name=cp-1", "--data-dir=/var/lib/etcd"]
        );
    }
}
