//! Peer allow-list.
//!
//! Entries are a single address (`10.0.0.5`), CIDR (`10.0.0.0/8`,
//! `fd00::/8`) or address plus netmask (`10.0.0.0/255.0.0.0`).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    #[error("Invalid -rpcallowip subnet specification: {0}")]
    InvalidSubnet(String),
}

/// An address range given by a network address and prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: IpAddr,
    prefix_len: u8,
}

impl Subnet {
    /// Build a subnet, masking off host bits of `addr`.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, AclError> {
        let addr = addr.to_canonical();
        let max = max_prefix(&addr);
        if prefix_len > max {
            return Err(AclError::InvalidSubnet(format!("{addr}/{prefix_len}")));
        }
        Ok(Self {
            network: mask(addr, prefix_len),
            prefix_len,
        })
    }

    /// A subnet containing exactly one address.
    pub fn single(addr: IpAddr) -> Self {
        let addr = addr.to_canonical();
        Self {
            prefix_len: max_prefix(&addr),
            network: addr,
        }
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        let addr = addr.to_canonical();
        if addr.is_ipv4() != self.network.is_ipv4() {
            return false;
        }
        mask(addr, self.prefix_len) == self.network
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}

/// Prefix length of a contiguous netmask, or None if the mask has holes.
fn netmask_prefix(netmask: IpAddr) -> Option<u8> {
    let (ones, zeros, width) = match netmask {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            (bits.leading_ones(), bits.trailing_zeros(), 32)
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            (bits.leading_ones(), bits.trailing_zeros(), 128)
        }
    };
    (ones + zeros == width).then_some(ones as u8)
}

impl FromStr for Subnet {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AclError::InvalidSubnet(s.to_string());
        let spec = s.trim();

        let Some((addr, suffix)) = spec.split_once('/') else {
            let addr: IpAddr = spec.parse().map_err(|_| invalid())?;
            return Ok(Self::single(addr));
        };

        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        if let Ok(prefix_len) = suffix.parse::<u8>() {
            return Self::new(addr, prefix_len).map_err(|_| invalid());
        }

        let netmask: IpAddr = suffix.parse().map_err(|_| invalid())?;
        if netmask.is_ipv4() != addr.to_canonical().is_ipv4() {
            return Err(invalid());
        }
        let prefix_len = netmask_prefix(netmask).ok_or_else(invalid)?;
        Self::new(addr, prefix_len).map_err(|_| invalid())
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Subnets permitted to talk to the HTTP interface. Loopback is always allowed.
#[derive(Debug, Clone)]
pub struct AllowList {
    subnets: Vec<Subnet>,
}

impl AllowList {
    /// Only loopback: `127.0.0.0/8` and `::1`.
    pub fn loopback() -> Self {
        Self {
            subnets: vec![
                Subnet {
                    network: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)),
                    prefix_len: 8,
                },
                Subnet::single(IpAddr::V6(Ipv6Addr::LOCALHOST)),
            ],
        }
    }

    /// Loopback plus every entry of `specs`. Fails on the first bad entry.
    pub fn from_specs<I, S>(specs: I) -> Result<Self, AclError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::loopback();
        for spec in specs {
            list.subnets.push(spec.as_ref().parse()?);
        }
        Ok(list)
    }

    pub fn push(&mut self, subnet: Subnet) {
        self.subnets.push(subnet);
    }

    /// A missing or unspecified peer address is never allowed.
    pub fn allows(&self, peer: Option<IpAddr>) -> bool {
        let Some(peer) = peer else {
            return false;
        };
        let peer = peer.to_canonical();
        if peer.is_unspecified() {
            return false;
        }
        self.subnets.iter().any(|subnet| subnet.contains(&peer))
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Space-separated list for the startup log line.
    pub fn describe(&self) -> String {
        self.subnets
            .iter()
            .map(Subnet::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::loopback()
    }
}
