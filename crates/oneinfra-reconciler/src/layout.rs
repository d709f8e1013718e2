//! Where components keep their state on a hypervisor
//!
//! Secrets live under `/etc/oneinfra/clusters/{namespace}/{cluster}/{component}`
//! and persistent data under `/var/lib/oneinfra/clusters/{namespace}/{cluster}/{component}/{subcomponent}`.

use crate::pods::{host_path_volume, mount, PodBuilder};
use k8s_openapi::api::core::v1::{Container, Pod};
use oneinfra_core::ComponentKey;
use oneinfra_hypervisor::CLEANUP_PATHS_ANNOTATION;

pub const SECRETS_ROOT: &str = "/etc/oneinfra/clusters";
pub const STORAGE_ROOT: &str = "/var/lib/oneinfra/clusters";

fn component_dir(root: &str, key: &ComponentKey) -> String {
    format!("{}/{}/{}/{}", root, key.namespace, key.cluster, key.name)
}

/// Secrets directory of a component
pub fn secrets_dir(key: &ComponentKey) -> String {
    component_dir(SECRETS_ROOT, key)
}

/// Path of a secret relative to the component secrets directory
pub fn secrets_path(key: &ComponentKey, relative: &str) -> String {
    format!("{}/{}", secrets_dir(key), relative)
}

/// Persistent storage directory of one subcomponent
pub fn storage_dir(key: &ComponentKey, subcomponent: &str) -> String {
    format!("{}/{}", component_dir(STORAGE_ROOT, key), subcomponent)
}

/// Shell script removing a component's on-host trees
///
/// The component directories are removed recursively; the cluster and
/// namespace directories above them are removed only when empty. Nothing
/// above the namespace directory is touched.
pub fn cleanup_script(key: &ComponentKey) -> String {
    let mut script = String::from("set -e\n");
    for root in [SECRETS_ROOT, STORAGE_ROOT] {
        script.push_str(&format!("rm -rf {}\n", component_dir(root, key)));
        script.push_str(&format!(
            "rmdir {}/{}/{} 2>/dev/null || true\n",
            root, key.namespace, key.cluster
        ));
        script.push_str(&format!(
            "rmdir {}/{} 2>/dev/null || true\n",
            root, key.namespace
        ));
    }
    script
}

/// One-shot pod running [`cleanup_script`] with both roots mounted
pub fn cleanup_job(key: &ComponentKey, toolbox_image: &str) -> Pod {
    let paths = [component_dir(SECRETS_ROOT, key), component_dir(STORAGE_ROOT, key)].join("\n");

    PodBuilder::new("cleanup", key)
        .annotation(CLEANUP_PATHS_ANNOTATION, paths)
        .volume(host_path_volume("secrets-root", SECRETS_ROOT))
        .volume(host_path_volume("storage-root", STORAGE_ROOT))
        .container(Container {
            name: "cleanup".to_string(),
            image: Some(toolbox_image.to_string()),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                cleanup_script(key),
            ]),
            volume_mounts: Some(vec![
                mount("secrets-root", SECRETS_ROOT, false),
                mount("storage-root", STORAGE_ROOT, false),
            ]),
            ..Default::default()
        })
        .job()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ComponentKey {
        ComponentKey::new("tenant", "prod", "cp-1")
    }

    #[test]
    fn test_paths() {
        assert_eq!(secrets_dir(&key()), "/etc/oneinfra/clusters/tenant/prod/cp-1");
        assert_eq!(
            secrets_path(&key(), "etcd/ca.crt"),
            "/etc/oneinfra/clusters/tenant/prod/cp-1/etcd/ca.crt"
        );
        assert_eq!(
            storage_dir(&key(), "etcd"),
            "/var/lib/oneinfra/clusters/tenant/prod/cp-1/etcd"
        );
    }

    #[test]
    fn test_cleanup_never_goes_above_namespace() {
        let script = cleanup_script(&key());
        assert!(script.contains("rm -rf /etc/oneinfra/clusters/tenant/prod/cp-1\n"));
        assert!(script.contains("rm -rf /var/lib/oneinfra/clusters/tenant/prod/cp-1\n"));
        assert!(script.contains("rmdir /etc/oneinfra/clusters/tenant 2>/dev/null || true"));
        assert!(!script.contains("rmdir /etc/oneinfra/clusters 2>"));
        assert!(!script.contains("rmdir /etc/oneinfra/clusters\n"));
    }

    #[test]
    fn test_cleanup_job_is_one_shot() {
        let pod = cleanup_job(&key(), "busybox:1.36.1");
        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers[0].image.as_deref(), Some("busybox:1.36.1"));
        assert!(pod
            .metadata
            .annotations
            .unwrap()
            .contains_key(CLEANUP_PATHS_ANNOTATION));
    }
}
