use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ipv4::{IPv4, ParseIpError};

/// An IPv4 network in CIDR notation. Construction always masks the supplied
/// network address down to `prefix` bits (spec.md §4.2).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Cidr {
    network: IPv4,
    prefix: u8,
}

impl Cidr {
    pub fn new(network: IPv4, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        let mask = Self::mask_for(prefix);
        Cidr {
            network: IPv4::from_u32(network.to_u32() & mask),
            prefix,
        }
    }

    fn mask_for(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        }
    }

    pub fn network(&self) -> IPv4 {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn subnet_mask(&self) -> IPv4 {
        IPv4::from_u32(Self::mask_for(self.prefix))
    }

    pub fn contains(&self, ip: IPv4) -> bool {
        let mask = Self::mask_for(self.prefix);
        (ip.to_u32() & mask) == self.network.to_u32()
    }

    /// Number of host bits remaining in the prefix.
    fn host_bits(&self) -> u8 {
        32 - self.prefix
    }

    pub fn broadcast_address(&self) -> IPv4 {
        if self.host_bits() == 0 {
            return self.network;
        }
        let mask = Self::mask_for(self.prefix);
        IPv4::from_u32(self.network.to_u32() | !mask)
    }

    /// First usable host address. For /31 and /32 this equals the network
    /// address itself (spec.md §4.2 edge case).
    pub fn first_host(&self) -> IPv4 {
        match self.host_bits() {
            0 | 1 => self.network,
            _ => self.network.advanced(1),
        }
    }

    /// Last usable host address. For /31 and /32 this equals the network
    /// address itself.
    pub fn last_host(&self) -> IPv4 {
        match self.host_bits() {
            0 => self.network,
            1 => self.network,
            _ => IPv4::from_u32(self.broadcast_address().to_u32() - 1),
        }
    }

    /// Iterates all host addresses in `[first_host, last_host]`, inclusive.
    pub fn hosts(&self) -> impl Iterator<Item = IPv4> {
        let first = self.first_host().to_u32();
        let last = self.last_host().to_u32();
        (first..=last).map(IPv4::from_u32)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl fmt::Debug for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cidr({self})")
    }
}

impl FromStr for Cidr {
    type Err = ParseCidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip_part, prefix_part) = s.split_once('/').ok_or(ParseCidrError::Malformed)?;
        let network: IPv4 = ip_part.parse().map_err(|_| ParseCidrError::Ip)?;
        let prefix: u8 = prefix_part.parse().map_err(|_| ParseCidrError::Malformed)?;
        if prefix > 32 {
            return Err(ParseCidrError::Malformed);
        }
        Ok(Cidr::new(network, prefix))
    }
}

impl TryFrom<String> for Cidr {
    type Error = ParseCidrError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum ParseCidrError {
    #[error("invalid CIDR notation")]
    Malformed,
    #[error("invalid IPv4 address in CIDR: {0}")]
    IpInner(#[from] ParseIpError),
    #[error("invalid IPv4 address in CIDR")]
    Ip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_network_on_construction() {
        let cidr = Cidr::new(IPv4::new(10, 0, 0, 37), 24);
        assert_eq!(cidr.network(), IPv4::new(10, 0, 0, 0));
    }

    #[test]
    fn contains_respects_mask() {
        let cidr = Cidr::new(IPv4::new(10, 0, 0, 0), 24);
        assert!(cidr.contains(IPv4::new(10, 0, 0, 200)));
        assert!(!cidr.contains(IPv4::new(10, 0, 1, 1)));
    }

    #[test]
    fn derived_fields_for_24() {
        let cidr = Cidr::new(IPv4::new(192, 168, 1, 0), 24);
        assert_eq!(cidr.first_host(), IPv4::new(192, 168, 1, 1));
        assert_eq!(cidr.last_host(), IPv4::new(192, 168, 1, 254));
        assert_eq!(cidr.broadcast_address(), IPv4::new(192, 168, 1, 255));
        assert_eq!(cidr.subnet_mask(), IPv4::new(255, 255, 255, 0));
    }

    #[test]
    fn slash_32_and_31_edge_cases() {
        let slash32 = Cidr::new(IPv4::new(10, 0, 0, 5), 32);
        assert_eq!(slash32.first_host(), slash32.network());
        assert_eq!(slash32.last_host(), slash32.network());

        let slash31 = Cidr::new(IPv4::new(10, 0, 0, 4), 31);
        assert_eq!(slash31.first_host(), slash31.network());
        assert_eq!(slash31.last_host(), slash31.network());
    }

    #[test]
    fn invalid_text_returns_none() {
        assert!("not-a-cidr".parse::<Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
    }

    #[test]
    fn hosts_iterates_in_order() {
        let cidr = Cidr::new(IPv4::new(10, 100, 0, 0), 28);
        let hosts: Vec<_> = cidr.hosts().collect();
        assert_eq!(hosts.first().copied(), Some(IPv4::new(10, 100, 0, 1)));
        assert_eq!(hosts.last().copied(), Some(IPv4::new(10, 100, 0, 14)));
    }
}
