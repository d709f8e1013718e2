use crate::error::{OneinfraError, Result};
use serde::{Deserialize, Serialize};

const EMBEDDED_RELEASE: &str = include_str!("../release.yaml");

/// etcd version paired with a Kubernetes version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBundle {
    pub kubernetes: String,
    pub etcd: String,
}

/// Supported Kubernetes versions and the images they run with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseData {
    pub registry: String,
    pub haproxy_image: String,
    /// Image used for one-shot host jobs (cleanup, service activation)
    pub toolbox_image: String,
    pub default_kubernetes_version: String,
    pub versions: Vec<VersionBundle>,
}

/// Images of the control-plane containers for one Kubernetes version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesImages {
    pub etcd: String,
    pub kube_apiserver: String,
    pub kube_controller_manager: String,
    pub kube_scheduler: String,
}

impl KubernetesImages {
    pub fn all(&self) -> Vec<String> {
        vec![
            self.etcd.clone(),
            self.kube_apiserver.clone(),
            self.kube_controller_manager.clone(),
            self.kube_scheduler.clone(),
        ]
    }
}

impl ReleaseData {
    /// The release bundle compiled into this binary
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(EMBEDDED_RELEASE)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let release: ReleaseData = serde_yaml::from_str(data).map_err(|e| {
            OneinfraError::serialization_error(
                format!("Failed to parse release data: {}", e),
                Some(Box::new(e)),
            )
        })?;

        if !release
            .versions
            .iter()
            .any(|v| v.kubernetes == release.default_kubernetes_version)
        {
            return Err(OneinfraError::invalid_config(
                format!(
                    "Default Kubernetes version {} has no image bundle",
                    release.default_kubernetes_version
                ),
                "Add the default version to the versions list",
            ));
        }

        Ok(release)
    }

    /// Resolve the image bundle for a Kubernetes version
    pub fn images(&self, kubernetes_version: &str) -> Result<KubernetesImages> {
        let bundle = self
            .versions
            .iter()
            .find(|v| v.kubernetes == kubernetes_version)
            .ok_or_else(|| OneinfraError::unknown_kubernetes_version(kubernetes_version))?;

        Ok(KubernetesImages {
            etcd: format!("{}/etcd:{}", self.registry, bundle.etcd),
            kube_apiserver: format!("{}/kube-apiserver:v{}", self.registry, bundle.kubernetes),
            kube_controller_manager: format!(
                "{}/kube-controller-manager:v{}",
                self.registry, bundle.kubernetes
            ),
            kube_scheduler: format!("{}/kube-scheduler:v{}", self.registry, bundle.kubernetes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_release_parses() {
        let release = ReleaseData::embedded().unwrap();
        assert!(!release.versions.is_empty());
        assert!(release.images(&release.default_kubernetes_version).is_ok());
    }

    #[test]
    fn test_images_for_version() {
        let release = ReleaseData::embedded().unwrap();
        let images = release.images("1.31.2").unwrap();
        assert_eq!(images.kube_apiserver, "registry.k8s.io/kube-apiserver:v1.31.2");
        assert_eq!(images.etcd, "registry.k8s.io/etcd:3.5.15-0");
        assert_eq!(images.all().len(), 4);
    }

    #[test]
    fn test_unknown_version() {
        let release = ReleaseData::embedded().unwrap();
        assert!(matches!(
            release.images("0.1.0").unwrap_err(),
            OneinfraError::UnknownKubernetesVersion { .. }
        ));
    }

    #[test]
    fn test_default_version_must_exist() {
        let yaml = r#"
registry: example.com
haproxyImage: haproxy
toolboxImage: busybox
defaultKubernetesVersion: "9.9.9"
versions:
  - kubernetes: "1.31.2"
    etcd: "3.5.15-0"
"#;
        assert!(ReleaseData::from_yaml(yaml).is_err());
    }
}
