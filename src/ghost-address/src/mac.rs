use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A 6-byte Ethernet hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xff; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Mac(bytes)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Generates a locally-administered, unicast MAC address (U/L bit set,
    /// multicast bit cleared), the scheme spec.md §4.2/§4.5 requires for
    /// auto-generated guest MACs.
    pub fn random_locally_administered() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] |= 0x02; // set U/L (locally administered)
        bytes[0] &= !0x01; // clear multicast bit
        Mac(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({self})")
    }
}

impl FromStr for Mac {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError);
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| ParseMacError)?;
        }
        Ok(Mac(bytes))
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("invalid MAC address")]
pub struct ParseMacError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_is_all_ones() {
        assert_eq!(Mac::BROADCAST.0, [0xff; 6]);
        assert!(Mac::BROADCAST.is_broadcast());
    }

    #[test]
    fn random_sets_ul_bit_and_clears_multicast() {
        for _ in 0..64 {
            let mac = Mac::random_locally_administered();
            assert_eq!(mac.0[0] & 0x02, 0x02);
            assert_eq!(mac.0[0] & 0x01, 0);
        }
    }

    #[test]
    fn parses_and_displays_round_trip() {
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn invalid_text_rejected() {
        assert!("not-a-mac".parse::<Mac>().is_err());
        assert!("aa:bb:cc:dd:ee".parse::<Mac>().is_err());
    }
}
