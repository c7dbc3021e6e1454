use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 4-byte IPv4 address, distinct from `std::net::Ipv4Addr` so the rest of
/// the router crates can implement ordering/arithmetic helpers spec.md
/// requires (`advanced(by:)`) without orphan-rule friction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct IPv4(pub [u8; 4]);

impl IPv4 {
    pub const UNSPECIFIED: IPv4 = IPv4([0, 0, 0, 0]);
    pub const BROADCAST: IPv4 = IPv4([255, 255, 255, 255]);

    pub fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        IPv4([a, b, c, d])
    }

    pub fn from_u32(v: u32) -> Self {
        IPv4(v.to_be_bytes())
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Returns the address `by` positions later (or earlier, if negative) in
    /// address space. Used by the DHCP pool walker and CIDR host iteration.
    pub fn advanced(self, by: i32) -> IPv4 {
        let base = self.to_u32() as i64;
        IPv4::from_u32((base + by as i64) as u32)
    }

    pub fn octets(self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for IPv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl fmt::Debug for IPv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv4({self})")
    }
}

impl FromStr for IPv4 {
    type Err = ParseIpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed: Ipv4Addr = s.parse().map_err(|_| ParseIpError)?;
        Ok(IPv4(parsed.octets()))
    }
}

impl TryFrom<String> for IPv4 {
    type Error = ParseIpError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IPv4> for String {
    fn from(value: IPv4) -> Self {
        value.to_string()
    }
}

impl From<Ipv4Addr> for IPv4 {
    fn from(value: Ipv4Addr) -> Self {
        IPv4(value.octets())
    }
}

impl From<IPv4> for Ipv4Addr {
    fn from(value: IPv4) -> Self {
        Ipv4Addr::from(value.0)
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("invalid IPv4 address")]
pub struct ParseIpError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_wraps_within_u32() {
        let ip = IPv4::new(255, 255, 255, 255);
        assert_eq!(ip.advanced(1), IPv4::new(0, 0, 0, 0));
    }

    #[test]
    fn ordering_is_numeric() {
        assert!(IPv4::new(10, 0, 0, 1) < IPv4::new(10, 0, 0, 2));
        assert!(IPv4::new(10, 0, 0, 255) < IPv4::new(10, 0, 1, 0));
    }

    #[test]
    fn parses_dotted_quad() {
        assert_eq!("192.168.1.1".parse::<IPv4>().unwrap(), IPv4::new(192, 168, 1, 1));
    }

    #[test]
    fn invalid_text_rejected() {
        assert!("not-an-ip".parse::<IPv4>().is_err());
        assert!("999.1.1.1".parse::<IPv4>().is_err());
    }
}
