use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A compute host capable of running pods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hypervisor {
    pub name: String,
    /// Address other hosts and clients use to reach this hypervisor
    pub ip_address: IpAddr,
}

impl Hypervisor {
    pub fn new(name: impl Into<String>, ip_address: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip_address,
        }
    }

    /// `https://{ip}:{port}` for a port published on this hypervisor
    pub fn https_url(&self, port: u16) -> String {
        match self.ip_address {
            IpAddr::V4(ip) => format!("https://{}:{}", ip, port),
            IpAddr::V6(ip) => format!("https://[{}]:{}", ip, port),
        }
    }
}
