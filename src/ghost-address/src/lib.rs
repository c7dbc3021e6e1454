//! Address primitives shared by the packet codec, NAT, firewall, and DHCP
//! server: MAC addresses, IPv4 addresses, and CIDR networks.

mod cidr;
mod ipv4;
mod mac;

pub use cidr::{Cidr, ParseCidrError};
pub use ipv4::{ParseIpError, IPv4};
pub use mac::{Mac, ParseMacError};
