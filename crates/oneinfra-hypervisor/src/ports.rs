use crate::error::{HypervisorError, Result};
use crate::types::PortRange;
use oneinfra_storage::KVStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Named host-port leases backed by a KVStore
///
/// Storage keys:
/// - `ports/{hypervisor}/alloc/{port}` → lease name
///
/// Lease names are chosen by the caller and must be stable for the owner's
/// lifetime; requesting the same lease again returns the same port.
pub struct PortAllocator {
    storage: Arc<dyn KVStore>,
    range: PortRange,
    lock: Mutex<()>,
}

fn alloc_prefix(hypervisor: &str) -> String {
    format!("ports/{}/alloc/", hypervisor)
}

impl PortAllocator {
    pub fn new(storage: Arc<dyn KVStore>, range: PortRange) -> Self {
        debug!("Port allocator initialized with range {}", range);
        Self {
            storage,
            range,
            lock: Mutex::new(()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Port currently leased to `lease` on `hypervisor`
    pub fn lookup(&self, hypervisor: &str, lease: &str) -> Result<Option<u16>> {
        Ok(self
            .allocations(hypervisor)?
            .into_iter()
            .find(|(_, owner)| owner == lease)
            .map(|(port, _)| port))
    }

    /// Lease a port to `lease`. Idempotent; new leases get the lowest free port.
    pub fn allocate(&self, hypervisor: &str, lease: &str) -> Result<u16> {
        let _guard = self.lock.lock();

        let allocations = self.allocations(hypervisor)?;
        if let Some((port, _)) = allocations.iter().find(|(_, owner)| owner.as_str() == lease) {
            debug!("Port {} on {} already leased to {}", port, hypervisor, lease);
            return Ok(*port);
        }

        for port in self.range.start..=self.range.end {
            if allocations.contains_key(&port) {
                continue;
            }
            let key = format!("{}{}", alloc_prefix(hypervisor), port);
            if self.storage.put_if_absent(key.as_bytes(), lease.as_bytes())? {
                debug!("Leased port {} on {} to {}", port, hypervisor, lease);
                return Ok(port);
            }
        }

        Err(HypervisorError::PortRangeExhausted {
            hypervisor: hypervisor.to_string(),
            range: self.range.to_string(),
        })
    }

    /// Release the port leased to `lease`, returning it if there was one
    pub fn release(&self, hypervisor: &str, lease: &str) -> Result<Option<u16>> {
        let _guard = self.lock.lock();

        let Some(port) = self.lookup(hypervisor, lease)? else {
            debug!("No port leased to {} on {}", lease, hypervisor);
            return Ok(None);
        };

        let key = format!("{}{}", alloc_prefix(hypervisor), port);
        self.storage.delete(key.as_bytes())?;
        debug!("Released port {} on {} from {}", port, hypervisor, lease);
        Ok(Some(port))
    }

    /// All leases on `hypervisor`, by port
    pub fn allocations(&self, hypervisor: &str) -> Result<BTreeMap<u16, String>> {
        let prefix = alloc_prefix(hypervisor);
        let entries = self.storage.scan(prefix.as_bytes())?;

        let mut result = BTreeMap::new();
        for (key, value) in entries {
            let key = String::from_utf8_lossy(&key);
            if let Ok(port) = key[prefix.len()..].parse::<u16>() {
                result.insert(port, String::from_utf8_lossy(&value).into_owned());
            }
        }
        Ok(result)
    }
}
