use crate::error::Result;
use crate::types::PodHandle;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use oneinfra_core::{ComponentKey, Hypervisor};
use std::collections::BTreeMap;

/// Operations a hypervisor exposes to reconcilers
///
/// Pods and files are scoped by their owning component so that components of
/// different clusters can share a host. Host ports are leased by name; a
/// lease keeps its port until freed.
#[async_trait]
pub trait HypervisorGateway: Send + Sync {
    // --- Images ---

    /// Pull `image` unless it is already present
    async fn ensure_image(&self, hypervisor: &Hypervisor, image: &str) -> Result<()>;

    async fn ensure_images(&self, hypervisor: &Hypervisor, images: &[String]) -> Result<()> {
        for image in images {
            self.ensure_image(hypervisor, image).await?;
        }
        Ok(())
    }

    // --- Files ---

    /// Write `contents` to the absolute host `path`
    async fn upload_file(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        path: &str,
        contents: &str,
    ) -> Result<()>;

    async fn upload_files(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        files: &BTreeMap<String, String>,
    ) -> Result<()> {
        for (path, contents) in files {
            self.upload_file(hypervisor, owner, path, contents).await?;
        }
        Ok(())
    }

    // --- Pods ---

    /// Create the pod, or update it when its specification changed
    async fn ensure_pod(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        pod: &Pod,
    ) -> Result<PodHandle>;

    /// Delete a pod; a missing pod is not an error
    async fn delete_pod(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        pod_name: &str,
    ) -> Result<()>;

    /// Run a one-shot pod to completion. A non-zero exit is an error.
    async fn run_and_wait_for_pod(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        pod: &Pod,
    ) -> Result<()>;

    // --- Host ports ---

    /// Port leased to `lease`, allocating one on first request
    async fn request_port(&self, hypervisor: &Hypervisor, lease: &str) -> Result<u16>;

    /// Release the port leased to `lease`, if any
    async fn free_port(&self, hypervisor: &Hypervisor, lease: &str) -> Result<()>;
}
