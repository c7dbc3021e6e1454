use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use ghost_address::{Mac, IPv4};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::wire::{
    DhcpMessage, DhcpOptions, BOOTREPLY, DHCP_ACK, DHCP_DISCOVER, DHCP_NAK, DHCP_OFFER,
    DHCP_REQUEST,
};

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticLeaseConfig {
    pub mac: Mac,
    pub ip: IPv4,
    pub hostname: Option<String>,
    pub gateway_override: Option<IPv4>,
    #[serde(default)]
    pub dns_override: Vec<IPv4>,
    pub pxe_server: Option<String>,
    pub pxe_filename: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpConfig {
    pub pool_start: IPv4,
    pub pool_end: IPv4,
    pub subnet_mask: IPv4,
    pub gateway: IPv4,
    pub dns_servers: Vec<IPv4>,
    pub server_identifier: IPv4,
    pub lease_duration: Duration,
    pub static_leases: Vec<StaticLeaseConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub mac: Mac,
    pub ip: IPv4,
}

struct State {
    leases: HashMap<Mac, (IPv4, Instant, Duration)>,
    offered: HashMap<Mac, IPv4>,
    allocated_ips: HashSet<IPv4>,
}

/// Stateful DORA server over BOOTP/DHCP (spec.md §4.7.4). The lease table is
/// guarded by a single lock; concurrent DORA cycles from distinct MACs still
/// serialize on it, which is fine at desktop scale (mirrors `ghost-nat`'s
/// single-lock design).
pub struct DhcpServer {
    config: DhcpConfig,
    state: Mutex<State>,
}

impl DhcpServer {
    pub fn new(config: DhcpConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                leases: HashMap::new(),
                offered: HashMap::new(),
                allocated_ips: HashSet::new(),
            }),
        }
    }

    fn static_lease_for(&self, mac: Mac) -> Option<&StaticLeaseConfig> {
        self.config.static_leases.iter().find(|s| s.mac == mac)
    }

    fn pool_addresses(&self) -> impl Iterator<Item = IPv4> {
        let start = self.config.pool_start.to_u32();
        let end = self.config.pool_end.to_u32();
        (start..=end).map(IPv4::from_u32)
    }

    /// Dispatches a DISCOVER or REQUEST message; returns the reply to send,
    /// or `None` when no reply should be sent at all.
    pub fn handle(&self, request: &DhcpMessage, now: Instant) -> Option<DhcpMessage> {
        match request.options.message_type {
            Some(DHCP_DISCOVER) => self.discover(request, now),
            Some(DHCP_REQUEST) => self.request(request, now),
            _ => None,
        }
    }

    fn reply_skeleton(&self, request: &DhcpMessage, yiaddr: IPv4) -> DhcpMessage {
        DhcpMessage {
            op: BOOTREPLY,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: IPv4::UNSPECIFIED,
            yiaddr,
            siaddr: self.config.server_identifier,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options: DhcpOptions::default(),
        }
    }

    fn populate_offer_options(&self, mac: Mac, opts: &mut DhcpOptions) {
        opts.subnet_mask = Some(self.config.subnet_mask);
        opts.server_identifier = Some(self.config.server_identifier);
        opts.lease_time = Some(self.config.lease_duration.as_secs() as u32);

        let static_lease = self.static_lease_for(mac);
        opts.routers = vec![static_lease
            .and_then(|s| s.gateway_override)
            .unwrap_or(self.config.gateway)];
        opts.dns_servers = match static_lease.map(|s| s.dns_override.clone()) {
            Some(dns) if !dns.is_empty() => dns,
            _ => self.config.dns_servers.clone(),
        };
        if let Some(s) = static_lease {
            opts.tftp_server_name = s.pxe_server.clone();
            opts.bootfile_name = s.pxe_filename.clone();
        }
    }

    /// DISCOVER -> OFFER. Static leases are offered their fixed IP even
    /// outside the pool; otherwise the lowest free pool address is offered.
    /// A pool exhausted with no static lease yields no reply (spec.md §8).
    fn discover(&self, request: &DhcpMessage, _now: Instant) -> Option<DhcpMessage> {
        let mac = request.chaddr;

        let offer_ip = if let Some(s) = self.static_lease_for(mac) {
            s.ip
        } else {
            let mut state = self.state.lock();
            let static_ips: HashSet<IPv4> =
                self.config.static_leases.iter().map(|s| s.ip).collect();
            let existing = state.leases.get(&mac).map(|(ip, ..)| *ip);
            let candidate = existing.or_else(|| {
                self.pool_addresses().find(|ip| {
                    !static_ips.contains(ip)
                        && !state.allocated_ips.contains(ip)
                        && !state.leases.values().any(|(leased_ip, ..)| leased_ip == ip)
                })
            });
            let Some(ip) = candidate else {
                return None;
            };
            state.offered.insert(mac, ip);
            ip
        };

        let mut reply = self.reply_skeleton(request, offer_ip);
        reply.options.message_type = Some(DHCP_OFFER);
        self.populate_offer_options(mac, &mut reply.options);
        Some(reply)
    }

    /// REQUEST -> ACK/NAK. Commits the lease on a match against the prior
    /// offer or an existing valid lease; NAKs otherwise.
    fn request(&self, request: &DhcpMessage, now: Instant) -> Option<DhcpMessage> {
        let mac = request.chaddr;
        let requested_ip = request.options.requested_ip.filter(|ip| *ip != IPv4::UNSPECIFIED)
            .or_else(|| Some(request.ciaddr).filter(|ip| *ip != IPv4::UNSPECIFIED));

        let expected = if let Some(s) = self.static_lease_for(mac) {
            Some(s.ip)
        } else {
            let state = self.state.lock();
            state
                .offered
                .get(&mac)
                .copied()
                .or_else(|| state.leases.get(&mac).map(|(ip, ..)| *ip))
        };

        let committed = match (requested_ip, expected) {
            (Some(req), Some(exp)) if req == exp => Some(exp),
            (None, Some(exp)) => Some(exp),
            _ => None,
        };

        let Some(ip) = committed else {
            let mut reply = self.reply_skeleton(request, IPv4::UNSPECIFIED);
            reply.options.message_type = Some(DHCP_NAK);
            return Some(reply);
        };

        {
            let mut state = self.state.lock();
            state.offered.remove(&mac);
            state.allocated_ips.insert(ip);
            state
                .leases
                .insert(mac, (ip, now, self.config.lease_duration));
        }

        let mut reply = self.reply_skeleton(request, ip);
        reply.options.message_type = Some(DHCP_ACK);
        self.populate_offer_options(mac, &mut reply.options);
        Some(reply)
    }

    pub fn lease_for(&self, mac: Mac) -> Option<Lease> {
        self.state
            .lock()
            .leases
            .get(&mac)
            .map(|(ip, ..)| Lease { mac, ip: *ip })
    }

    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::DhcpOptions;

    fn base_config() -> DhcpConfig {
        DhcpConfig {
            pool_start: IPv4::new(10, 100, 0, 10),
            pool_end: IPv4::new(10, 100, 0, 20),
            subnet_mask: IPv4::new(255, 255, 255, 0),
            gateway: IPv4::new(10, 100, 0, 1),
            dns_servers: vec![IPv4::new(10, 100, 0, 1)],
            server_identifier: IPv4::new(10, 100, 0, 1),
            lease_duration: DEFAULT_LEASE_DURATION,
            static_leases: vec![StaticLeaseConfig {
                mac: "aa:bb:cc:dd:ee:01".parse().unwrap(),
                ip: IPv4::new(10, 100, 0, 5),
                hostname: None,
                gateway_override: None,
                dns_override: vec![],
                pxe_server: None,
                pxe_filename: None,
            }],
        }
    }

    fn discover_msg(mac: Mac, xid: u32) -> DhcpMessage {
        DhcpMessage {
            op: crate::wire::BOOTREQUEST,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: IPv4::UNSPECIFIED,
            yiaddr: IPv4::UNSPECIFIED,
            siaddr: IPv4::UNSPECIFIED,
            giaddr: IPv4::UNSPECIFIED,
            chaddr: mac,
            options: DhcpOptions {
                message_type: Some(DHCP_DISCOVER),
                ..Default::default()
            },
        }
    }

    fn request_msg(mac: Mac, xid: u32, requested_ip: IPv4) -> DhcpMessage {
        DhcpMessage {
            options: DhcpOptions {
                message_type: Some(DHCP_REQUEST),
                requested_ip: Some(requested_ip),
                ..Default::default()
            },
            ..discover_msg(mac, xid)
        }
    }

    #[test]
    fn static_lease_offered_outside_pool() {
        let server = DhcpServer::new(base_config());
        let mac: Mac = "aa:bb:cc:dd:ee:01".parse().unwrap();
        let offer = server.discover(&discover_msg(mac, 1), Instant::now()).unwrap();
        assert_eq!(offer.yiaddr, IPv4::new(10, 100, 0, 5));
    }

    #[test]
    fn dynamic_pool_allocates_lowest_free_ascending() {
        let server = DhcpServer::new(base_config());
        let mac1: Mac = "00:11:22:33:44:01".parse().unwrap();
        let mac2: Mac = "00:11:22:33:44:02".parse().unwrap();
        let offer1 = server.discover(&discover_msg(mac1, 1), Instant::now()).unwrap();
        assert_eq!(offer1.yiaddr, IPv4::new(10, 100, 0, 10));
        server.request(&request_msg(mac1, 1, offer1.yiaddr), Instant::now());

        let offer2 = server.discover(&discover_msg(mac2, 2), Instant::now()).unwrap();
        assert_eq!(offer2.yiaddr, IPv4::new(10, 100, 0, 11));
    }

    #[test]
    fn request_matching_offer_yields_ack_with_matching_yiaddr() {
        let server = DhcpServer::new(base_config());
        let mac: Mac = "00:11:22:33:44:01".parse().unwrap();
        let offer = server.discover(&discover_msg(mac, 1), Instant::now()).unwrap();
        let ack = server.request(&request_msg(mac, 1, offer.yiaddr), Instant::now()).unwrap();
        assert_eq!(ack.options.message_type, Some(DHCP_ACK));
        assert_eq!(ack.yiaddr, offer.yiaddr);
        assert_eq!(server.lease_for(mac).unwrap().ip, offer.yiaddr);
    }

    #[test]
    fn request_with_mismatched_ip_is_nakked() {
        let server = DhcpServer::new(base_config());
        let mac: Mac = "00:11:22:33:44:01".parse().unwrap();
        server.discover(&discover_msg(mac, 1), Instant::now());
        let nak = server
            .request(&request_msg(mac, 1, IPv4::new(10, 100, 0, 99)), Instant::now())
            .unwrap();
        assert_eq!(nak.options.message_type, Some(DHCP_NAK));
    }

    #[test]
    fn pool_exhaustion_without_static_lease_yields_no_offer() {
        let mut config = base_config();
        config.static_leases.clear();
        let server = DhcpServer::new(config);
        let mut last_mac_byte = 1u8;
        for _ in 0..11 {
            let mac = Mac::new([0x00, 0x11, 0x22, 0x33, 0x44, last_mac_byte]);
            let offer = server.discover(&discover_msg(mac, last_mac_byte as u32), Instant::now()).unwrap();
            server.request(&request_msg(mac, last_mac_byte as u32, offer.yiaddr), Instant::now());
            last_mac_byte += 1;
        }
        assert_eq!(server.lease_count(), 11);

        let twelfth = Mac::new([0x00, 0x11, 0x22, 0x33, 0x44, last_mac_byte]);
        assert!(server.discover(&discover_msg(twelfth, 99), Instant::now()).is_none());
    }

    #[test]
    fn xid_and_chaddr_echoed_verbatim() {
        let server = DhcpServer::new(base_config());
        let mac: Mac = "00:11:22:33:44:01".parse().unwrap();
        let request = discover_msg(mac, 0xcafebabe);
        let offer = server.discover(&request, Instant::now()).unwrap();
        assert_eq!(offer.xid, request.xid);
        assert_eq!(offer.chaddr, request.chaddr);
    }
}
