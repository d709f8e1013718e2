use crate::error::{ReconcileError, Result};
use oneinfra_core::OneinfraError;
use std::net::Ipv4Addr;

/// Parsed IPv4 CIDR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Cidr {
    /// Parse a CIDR string like "10.96.0.0/12"
    pub fn parse(cidr: &str) -> Result<Self> {
        let invalid = |detail: &str| -> ReconcileError {
            OneinfraError::invalid_config(
                format!("Invalid CIDR '{}': {}", cidr, detail),
                "Use an IPv4 CIDR like '10.96.0.0/12'",
            )
            .into()
        };

        let (address, prefix) = cidr.split_once('/').ok_or_else(|| invalid("missing prefix length"))?;
        let address: Ipv4Addr = address.parse().map_err(|_| invalid("bad address"))?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
        if prefix_len > 30 {
            return Err(invalid("prefix leaves no host addresses"));
        }

        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        };
        Ok(Self {
            network: Ipv4Addr::from(u32::from(address) & mask),
            prefix_len,
        })
    }

    /// First usable host address (network + 1)
    pub fn first_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + 1)
    }
}
