use crate::error::{HypervisorError, Result};
use crate::ports::PortAllocator;
use crate::traits::HypervisorGateway;
use crate::types::{pod_name, pod_spec_hash, GatewayEvent, PodHandle, PortRange};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use oneinfra_core::{ComponentKey, Hypervisor};
use oneinfra_storage::{KVStore, MemoryBackend};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

type Scoped = (String, ComponentKey, String);

#[derive(Default)]
struct MockState {
    images: HashSet<(String, String)>,
    files: BTreeMap<Scoped, String>,
    pods: BTreeMap<Scoped, (Pod, String)>,
    job_failures: HashMap<String, i32>,
    events: Vec<GatewayEvent>,
}

/// In-memory hypervisor gateway
///
/// Keeps images, files and pods per hypervisor in memory and leases host
/// ports through a [`PortAllocator`]. Every call is recorded as a
/// [`GatewayEvent`] so callers can assert on ordering and idempotence.
pub struct MockHypervisor {
    ports: PortAllocator,
    state: Mutex<MockState>,
}

impl MockHypervisor {
    pub fn new(storage: Arc<dyn KVStore>, range: PortRange) -> Self {
        Self {
            ports: PortAllocator::new(storage, range),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Gateway whose port leases live in memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), PortRange::default())
    }

    /// Make job pods named `pod` exit with `exit_code`
    pub fn fail_jobs(&self, pod: &str, exit_code: i32) {
        self.state
            .lock()
            .job_failures
            .insert(pod.to_string(), exit_code);
    }

    pub fn clear_job_failures(&self) {
        self.state.lock().job_failures.clear();
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Number of recorded calls that changed state
    pub fn mutations(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| e.is_mutation())
            .count()
    }

    pub fn pod(&self, hypervisor: &str, owner: &ComponentKey, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .pods
            .get(&(hypervisor.to_string(), owner.clone(), name.to_string()))
            .map(|(pod, _)| pod.clone())
    }

    /// Names of the pods `owner` has on `hypervisor`
    pub fn pods_of(&self, hypervisor: &str, owner: &ComponentKey) -> Vec<String> {
        self.state
            .lock()
            .pods
            .keys()
            .filter(|(h, o, _)| h == hypervisor && o == owner)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub fn file(&self, hypervisor: &str, owner: &ComponentKey, path: &str) -> Option<String> {
        self.state
            .lock()
            .files
            .get(&(hypervisor.to_string(), owner.clone(), path.to_string()))
            .cloned()
    }

    /// Paths uploaded by `owner` on `hypervisor`
    pub fn files_of(&self, hypervisor: &str, owner: &ComponentKey) -> Vec<String> {
        self.state
            .lock()
            .files
            .keys()
            .filter(|(h, o, _)| h == hypervisor && o == owner)
            .map(|(_, _, path)| path.clone())
            .collect()
    }

    pub fn has_image(&self, hypervisor: &str, image: &str) -> bool {
        self.state
            .lock()
            .images
            .contains(&(hypervisor.to_string(), image.to_string()))
    }

    pub fn port_allocations(&self, hypervisor: &str) -> Result<BTreeMap<u16, String>> {
        self.ports.allocations(hypervisor)
    }

    fn record(&self, event: GatewayEvent) {
        self.state.lock().events.push(event);
    }
}

#[async_trait]
impl HypervisorGateway for MockHypervisor {
    async fn ensure_image(&self, hypervisor: &Hypervisor, image: &str) -> Result<()> {
        let mut state = self.state.lock();
        let pulled = state
            .images
            .insert((hypervisor.name.clone(), image.to_string()));
        if pulled {
            debug!("Mock: pulled {} on {}", image, hypervisor.name);
        }
        state.events.push(GatewayEvent::EnsureImage {
            hypervisor: hypervisor.name.clone(),
            image: image.to_string(),
            pulled,
        });
        Ok(())
    }

    async fn upload_file(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        path: &str,
        contents: &str,
    ) -> Result<()> {
        if !path.starts_with('/') {
            return Err(HypervisorError::file_upload_failed(
                path,
                "path must be absolute",
            ));
        }

        let mut state = self.state.lock();
        let key = (hypervisor.name.clone(), owner.clone(), path.to_string());
        let changed = state.files.get(&key).map(String::as_str) != Some(contents);
        if changed {
            state.files.insert(key, contents.to_string());
        }
        state.events.push(GatewayEvent::UploadFile {
            hypervisor: hypervisor.name.clone(),
            owner: owner.clone(),
            path: path.to_string(),
            changed,
        });
        Ok(())
    }

    async fn ensure_pod(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        pod: &Pod,
    ) -> Result<PodHandle> {
        let name = pod_name(&hypervisor.name, pod)?;
        let spec_hash = pod_spec_hash(pod)?;

        let mut state = self.state.lock();
        let key = (hypervisor.name.clone(), owner.clone(), name.clone());
        let changed = state.pods.get(&key).map(|(_, hash)| hash) != Some(&spec_hash);
        if changed {
            debug!("Mock: applying pod {} for {} on {}", name, owner, hypervisor.name);
            state.pods.insert(key, (pod.clone(), spec_hash.clone()));
        }
        state.events.push(GatewayEvent::EnsurePod {
            hypervisor: hypervisor.name.clone(),
            owner: owner.clone(),
            pod: name.clone(),
            changed,
        });

        Ok(PodHandle {
            hypervisor: hypervisor.name.clone(),
            owner: owner.clone(),
            name,
            spec_hash,
        })
    }

    async fn delete_pod(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        pod_name: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let existed = state
            .pods
            .remove(&(hypervisor.name.clone(), owner.clone(), pod_name.to_string()))
            .is_some();
        state.events.push(GatewayEvent::DeletePod {
            hypervisor: hypervisor.name.clone(),
            owner: owner.clone(),
            pod: pod_name.to_string(),
            existed,
        });
        Ok(())
    }

    async fn run_and_wait_for_pod(
        &self,
        hypervisor: &Hypervisor,
        owner: &ComponentKey,
        pod: &Pod,
    ) -> Result<()> {
        let name = pod_name(&hypervisor.name, pod)?;

        let exit_code = {
            let mut state = self.state.lock();
            let exit_code = state.job_failures.get(&name).copied().unwrap_or(0);
            if exit_code == 0 {
                // A successful cleanup job removes the files it targets
                if let Some(targets) = cleanup_targets(pod) {
                    state.files.retain(|(h, _, path), _| {
                        h != &hypervisor.name || !targets.iter().any(|t| path.starts_with(t))
                    });
                }
            }
            state.events.push(GatewayEvent::RunAndWait {
                hypervisor: hypervisor.name.clone(),
                owner: owner.clone(),
                pod: name.clone(),
                exit_code,
            });
            exit_code
        };

        if exit_code != 0 {
            return Err(HypervisorError::job_failed(name, exit_code));
        }
        Ok(())
    }

    async fn request_port(&self, hypervisor: &Hypervisor, lease: &str) -> Result<u16> {
        let existing = self.ports.lookup(&hypervisor.name, lease)?;
        let port = self.ports.allocate(&hypervisor.name, lease)?;
        self.record(GatewayEvent::RequestPort {
            hypervisor: hypervisor.name.clone(),
            lease: lease.to_string(),
            port,
            allocated: existing.is_none(),
        });
        Ok(port)
    }

    async fn free_port(&self, hypervisor: &Hypervisor, lease: &str) -> Result<()> {
        let port = self.ports.release(&hypervisor.name, lease)?;
        self.record(GatewayEvent::FreePort {
            hypervisor: hypervisor.name.clone(),
            lease: lease.to_string(),
            port,
        });
        Ok(())
    }
}

/// Directories a job pod removes, read from its `oneinfra/cleanup-paths`
/// annotation (newline separated)
fn cleanup_targets(pod: &Pod) -> Option<Vec<String>> {
    pod.metadata
        .annotations
        .as_ref()?
        .get(CLEANUP_PATHS_ANNOTATION)
        .map(|paths| {
            paths
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| format!("{}/", l.trim_end_matches('/')))
                .collect()
        })
}

/// Annotation listing the host directories a cleanup job removes
pub const CLEANUP_PATHS_ANNOTATION: &str = "oneinfra/cleanup-paths";
