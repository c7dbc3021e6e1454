//! Embedded DHCP server: full DORA with static leases and a dynamic pool
//! (spec.md §4.7.4).

mod server;
mod wire;

pub use server::{DhcpConfig, DhcpServer, Lease, StaticLeaseConfig, DEFAULT_LEASE_DURATION};
pub use wire::{
    DhcpMessage, DhcpOptions, BOOTREPLY, BOOTREQUEST, DHCP_ACK, DHCP_DISCOVER, DHCP_NAK,
    DHCP_OFFER, DHCP_REQUEST,
};
