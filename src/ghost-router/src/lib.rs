//! The virtual router: demultiplexes guest Ethernet frames, performs ARP
//! proxy for the gateway, serves DHCP/DNS locally, enforces the firewall,
//! and rewrites traffic through the NAT engine (spec.md §4.7.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use ghost_address::{Cidr, Mac, IPv4};
use ghost_dhcp::DhcpServer;
use ghost_dns::{self, DnsAction, DnsMode};
use ghost_firewall::{Direction, FirewallEngine, L3Meta, PacketMeta, Verdict, Zone};
use ghost_nat::{FlowKey, NatEngine, Protocol as NatProtocol, TcpEventFlags};
use ghost_packet::{
    self, ArpPacket, EthernetHeader, IcmpHeader, Ipv4Header, Parsed, TcpFlags, TcpHeader,
    UdpHeader, ARP_REQUEST, ETHERTYPE_ARP, PROTO_TCP, PROTO_UDP,
};
use serde::{Deserialize, Serialize};

const DHCP_CLIENT_PORT: u16 = 68;
const DHCP_SERVER_PORT: u16 = 67;
const DNS_PORT: u16 = 53;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WanMode {
    Nat,
    Passthrough,
    Isolated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForward {
    pub protocol: NatProtocol,
    pub external_port: u16,
    pub internal_ip: IPv4,
    pub internal_port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub lan: Cidr,
    pub gateway_ip: IPv4,
    pub gateway_mac: Mac,
    pub wan_ip: IPv4,
    pub wan_mac: Mac,
    pub wan_mode: WanMode,
    pub dns_mode: DnsMode,
    pub port_forwards: Vec<PortForward>,
}

#[derive(Default)]
pub struct RouterCounters {
    pub dropped_unknown_ether: AtomicU64,
    pub dropped_by_firewall: AtomicU64,
}

/// One emitted frame and where it should go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouterOutput {
    ToGuest(Vec<u8>),
    ToUpstream(Vec<u8>),
}

pub struct Router {
    config: RouterConfig,
    nat: NatEngine,
    firewall: FirewallEngine,
    dhcp: DhcpServer,
    port_forward_map: HashMap<(NatProtocol, u16), (IPv4, u16)>,
    counters: RouterCounters,
}

impl Router {
    pub fn new(config: RouterConfig, nat: NatEngine, firewall: FirewallEngine, dhcp: DhcpServer) -> Self {
        let port_forward_map = config
            .port_forwards
            .iter()
            .map(|pf| ((pf.protocol, pf.external_port), (pf.internal_ip, pf.internal_port)))
            .collect();
        Self {
            config,
            nat,
            firewall,
            dhcp,
            port_forward_map,
            counters: RouterCounters::default(),
        }
    }

    pub fn counters(&self) -> &RouterCounters {
        &self.counters
    }

    pub fn nat(&self) -> &NatEngine {
        &self.nat
    }

    /// Processes one Ethernet frame received from a guest VM, per the
    /// seven-step pipeline in spec.md §4.7.1.
    pub fn handle_guest_frame(&self, frame: &[u8], now: Instant) -> Vec<RouterOutput> {
        match ghost_packet::parse(frame) {
            Parsed::UnknownEther => {
                self.counters.dropped_unknown_ether.fetch_add(1, Ordering::Relaxed);
                vec![]
            }
            Parsed::Arp { eth, arp } => self.handle_guest_arp(&eth, &arp),
            Parsed::Udp { eth, ip, udp, payload } => {
                self.handle_guest_udp(&eth, &ip, &udp, &payload, now)
            }
            Parsed::Tcp { eth, ip, tcp, payload } => {
                self.handle_guest_tcp(&eth, &ip, &tcp, &payload, now)
            }
            Parsed::Icmp { eth, ip, icmp, payload } => {
                self.handle_guest_icmp(&eth, &ip, &icmp, &payload, now)
            }
            Parsed::UnknownIp { .. } => vec![],
        }
    }

    fn handle_guest_arp(&self, eth: &EthernetHeader, arp: &ArpPacket) -> Vec<RouterOutput> {
        if arp.operation != ARP_REQUEST || arp.target_ip != self.config.gateway_ip {
            return vec![];
        }
        let reply = ArpPacket::reply_for(arp, self.config.gateway_mac, self.config.gateway_ip);
        let reply_eth = EthernetHeader {
            dst: eth.src,
            src: self.config.gateway_mac,
            ether_type: ETHERTYPE_ARP,
        };
        vec![RouterOutput::ToGuest(ghost_packet::build_arp(&reply_eth, &reply))]
    }

    fn handle_guest_udp(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        udp: &UdpHeader,
        payload: &[u8],
        now: Instant,
    ) -> Vec<RouterOutput> {
        if udp.src_port == DHCP_CLIENT_PORT && udp.dst_port == DHCP_SERVER_PORT {
            return self.handle_dhcp(eth, payload);
        }

        if ip.dst == self.config.gateway_ip && udp.dst_port == DNS_PORT
            && self.config.dns_mode != DnsMode::Passthrough
        {
            return self.handle_dns(eth, ip, udp, payload);
        }

        self.forward_outbound(eth, ip, NatProtocol::Udp, udp.src_port, udp.dst_port, |new_src_ip, new_src_port, new_dst_port, out_ip, out_eth| {
            let new_udp = UdpHeader { src_port: new_src_port, dst_port: new_dst_port };
            let new_ip = Ipv4Header { src: new_src_ip, dst: out_ip.dst, ..out_ip };
            ghost_packet::build_udp(&out_eth, &new_ip, &new_udp, payload)
        }, now)
        .0
    }

    fn handle_dhcp(&self, eth: &EthernetHeader, payload: &[u8]) -> Vec<RouterOutput> {
        let Some(request) = ghost_dhcp::DhcpMessage::parse(payload) else {
            return vec![];
        };
        let Some(reply) = self.dhcp.handle(&request, Instant::now()) else {
            return vec![];
        };

        let reply_eth = EthernetHeader {
            dst: eth.src,
            src: self.config.gateway_mac,
            ether_type: ghost_packet::ETHERTYPE_IPV4,
        };
        let reply_ip = Ipv4Header {
            ihl: 5,
            total_length: 0,
            identification: 0,
            flags_fragment_offset: 0,
            ttl: 64,
            protocol: PROTO_UDP,
            src: self.config.gateway_ip,
            dst: IPv4::BROADCAST,
        };
        let reply_udp = UdpHeader {
            src_port: DHCP_SERVER_PORT,
            dst_port: DHCP_CLIENT_PORT,
        };
        let bytes = reply.write();
        vec![RouterOutput::ToGuest(ghost_packet::build_udp(
            &reply_eth, &reply_ip, &reply_udp, &bytes,
        ))]
    }

    fn handle_dns(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        udp: &UdpHeader,
        payload: &[u8],
    ) -> Vec<RouterOutput> {
        match ghost_dns::resolve(&self.config.dns_mode, payload) {
            None | Some(DnsAction::PassThrough) => vec![],
            Some(DnsAction::Reply(reply_payload)) => {
                let reply_eth = EthernetHeader {
                    dst: eth.src,
                    src: self.config.gateway_mac,
                    ether_type: ghost_packet::ETHERTYPE_IPV4,
                };
                let reply_ip = Ipv4Header {
                    src: self.config.gateway_ip,
                    dst: ip.src,
                    ..*ip
                };
                let reply_udp = UdpHeader {
                    src_port: DNS_PORT,
                    dst_port: udp.src_port,
                };
                vec![RouterOutput::ToGuest(ghost_packet::build_udp(
                    &reply_eth,
                    &reply_ip,
                    &reply_udp,
                    &reply_payload,
                ))]
            }
            Some(DnsAction::Forward(server)) => {
                // Rewritten destination continues through the normal
                // firewall+NAT outbound pipeline as an ordinary UDP flow.
                let forwarded_ip = Ipv4Header { dst: server, ..*ip };
                self.handle_guest_udp(eth, &forwarded_ip, udp, payload, Instant::now())
            }
        }
    }

    fn handle_guest_tcp(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        tcp: &TcpHeader,
        payload: &[u8],
        now: Instant,
    ) -> Vec<RouterOutput> {
        let (out, dst_ip, dst_port) = self.forward_outbound(
            eth,
            ip,
            NatProtocol::Tcp,
            tcp.src_port,
            tcp.dst_port,
            |new_src_ip, new_src_port, new_dst_port, out_ip, out_eth| {
                let new_tcp = TcpHeader { src_port: new_src_port, dst_port: new_dst_port, ..*tcp };
                let new_ip = Ipv4Header { src: new_src_ip, dst: out_ip.dst, ..out_ip };
                ghost_packet::build_tcp(&out_eth, &new_ip, &new_tcp, payload)
            },
            now,
        );
        if !out.is_empty() {
            let key = FlowKey {
                protocol: NatProtocol::Tcp,
                orig_src_ip: ip.src,
                orig_src_port: tcp.src_port,
                dst_ip,
                dst_port,
            };
            self.nat.update_tcp_state(key, to_nat_flags(tcp.flags), now);
        }
        out
    }

    fn handle_guest_icmp(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        icmp: &IcmpHeader,
        payload: &[u8],
        _now: Instant,
    ) -> Vec<RouterOutput> {
        let packet_meta = self.l3_packet_meta(eth, ip, ghost_firewall::Protocol::Icmp, None, None, Zone::Lan);
        if self.firewall.evaluate(&packet_meta, Direction::Outbound) == Verdict::Block {
            self.counters.dropped_by_firewall.fetch_add(1, Ordering::Relaxed);
            return vec![];
        }

        match self.config.wan_mode {
            WanMode::Isolated => vec![],
            WanMode::Passthrough => {
                let out_eth = EthernetHeader { dst: self.config.wan_mac, src: self.config.gateway_mac, ..*eth };
                vec![RouterOutput::ToUpstream(ghost_packet::build_icmp(&out_eth, ip, icmp, payload))]
            }
            WanMode::Nat => {
                let out_eth = EthernetHeader { dst: self.config.wan_mac, src: self.config.gateway_mac, ..*eth };
                let new_ip = Ipv4Header { src: self.config.wan_ip, ..*ip };
                vec![RouterOutput::ToUpstream(ghost_packet::build_icmp(&out_eth, &new_ip, icmp, payload))]
            }
        }
    }

    fn l3_packet_meta(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        protocol: ghost_firewall::Protocol,
        src_port: Option<u16>,
        dst_port: Option<u16>,
        zone: Zone,
    ) -> PacketMeta {
        PacketMeta {
            src_mac: eth.src,
            dst_mac: eth.dst,
            ether_type: eth.ether_type,
            is_broadcast: eth.dst.is_broadcast(),
            zone,
            l3: Some(L3Meta {
                src_ip: ip.src,
                dst_ip: ip.dst,
                protocol,
                src_port,
                dst_port,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn forward_outbound(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        protocol: NatProtocol,
        src_port: u16,
        dst_port: u16,
        build: impl FnOnce(IPv4, u16, u16, Ipv4Header, EthernetHeader) -> Vec<u8>,
        now: Instant,
    ) -> (Vec<RouterOutput>, IPv4, u16) {
        let fw_protocol = match protocol {
            NatProtocol::Tcp => ghost_firewall::Protocol::Tcp,
            NatProtocol::Udp => ghost_firewall::Protocol::Udp,
        };
        let packet_meta = self.l3_packet_meta(eth, ip, fw_protocol, Some(src_port), Some(dst_port), Zone::Lan);
        // `Redirect` rewrites the destination as a DNAT before the frame
        // continues through the same NAT/upstream path `Allow` takes
        // (spec.md §4.7.7); it never short-circuits back to the guest. The
        // effective (dst_ip, dst_port) is returned so callers key any
        // post-hoc flow-state update (e.g. TCP state tracking) the same way
        // the NAT table itself was keyed.
        let (dst_ip, dst_port) = match self.firewall.evaluate(&packet_meta, Direction::Outbound) {
            Verdict::Block => {
                self.counters.dropped_by_firewall.fetch_add(1, Ordering::Relaxed);
                return (vec![], ip.dst, dst_port);
            }
            Verdict::Redirect { target_ip, target_port } => (target_ip, target_port),
            Verdict::Allow => (ip.dst, dst_port),
        };
        let ip = &Ipv4Header { dst: dst_ip, ..*ip };

        let out = match self.config.wan_mode {
            WanMode::Isolated => vec![],
            WanMode::Passthrough => {
                let out_eth = EthernetHeader { dst: self.config.wan_mac, src: self.config.gateway_mac, ..*eth };
                vec![RouterOutput::ToUpstream(build(ip.src, src_port, dst_port, *ip, out_eth))]
            }
            WanMode::Nat => {
                let entry = self
                    .nat
                    .outbound_mapping(protocol, ip.src, src_port, ip.dst, dst_port, now);
                let out_eth = EthernetHeader { dst: self.config.wan_mac, src: self.config.gateway_mac, ..*eth };
                vec![RouterOutput::ToUpstream(build(
                    self.config.wan_ip,
                    entry.mapped_port,
                    dst_port,
                    *ip,
                    out_eth,
                ))]
            }
        };
        (out, dst_ip, dst_port)
    }

    /// Processes one Ethernet frame arriving from upstream, de-NATing it
    /// (or resolving a port forward) and delivering it to the owning guest
    /// after an inbound firewall pass (spec.md §4.7.1 step 7, §9 ordering
    /// note: firewall runs *after* NAT de-rewrite on inbound).
    pub fn handle_upstream_frame(&self, frame: &[u8], guest_mac: Mac) -> Vec<RouterOutput> {
        match ghost_packet::parse(frame) {
            Parsed::Udp { eth, ip, udp, payload } => {
                self.handle_upstream_l4(&eth, &ip, NatProtocol::Udp, udp.dst_port, guest_mac, |orig_ip, orig_port, out_ip, out_eth| {
                    let new_udp = UdpHeader { src_port: udp.src_port, dst_port: orig_port };
                    let new_ip = Ipv4Header { dst: orig_ip, ..out_ip };
                    ghost_packet::build_udp(&out_eth, &new_ip, &new_udp, &payload)
                })
            }
            Parsed::Tcp { eth, ip, tcp, payload } => {
                self.handle_upstream_l4(&eth, &ip, NatProtocol::Tcp, tcp.dst_port, guest_mac, |orig_ip, orig_port, out_ip, out_eth| {
                    let new_tcp = TcpHeader { dst_port: orig_port, ..tcp };
                    let new_ip = Ipv4Header { dst: orig_ip, ..out_ip };
                    ghost_packet::build_tcp(&out_eth, &new_ip, &new_tcp, &payload)
                })
            }
            _ => vec![],
        }
    }

    fn handle_upstream_l4(
        &self,
        eth: &EthernetHeader,
        ip: &Ipv4Header,
        protocol: NatProtocol,
        mapped_port: u16,
        guest_mac: Mac,
        build: impl FnOnce(IPv4, u16, Ipv4Header, EthernetHeader) -> Vec<u8>,
    ) -> Vec<RouterOutput> {
        let (orig_ip, orig_port) = if let Some(&(ip_, port_)) =
            self.port_forward_map.get(&(protocol, mapped_port))
        {
            (ip_, port_)
        } else if let Some(entry) = self.nat.inbound_lookup(protocol, mapped_port) {
            (entry.key.orig_src_ip, entry.key.orig_src_port)
        } else {
            return vec![];
        };

        let fw_protocol = match protocol {
            NatProtocol::Tcp => ghost_firewall::Protocol::Tcp,
            NatProtocol::Udp => ghost_firewall::Protocol::Udp,
        };
        let packet_meta = self.l3_packet_meta(eth, ip, fw_protocol, None, Some(orig_port), Zone::Wan);
        if self.firewall.evaluate(&packet_meta, Direction::Inbound) == Verdict::Block {
            self.counters.dropped_by_firewall.fetch_add(1, Ordering::Relaxed);
            return vec![];
        }

        let out_eth = EthernetHeader { dst: guest_mac, src: self.config.gateway_mac, ..*eth };
        vec![RouterOutput::ToGuest(build(orig_ip, orig_port, *ip, out_eth))]
    }

    pub fn reap_idle_nat(&self, now: Instant) -> usize {
        self.nat.reap_idle(now)
    }
}

fn to_nat_flags(flags: TcpFlags) -> TcpEventFlags {
    let mut out = TcpEventFlags::empty();
    if flags.contains(TcpFlags::SYN) {
        out |= TcpEventFlags::SYN;
    }
    if flags.contains(TcpFlags::ACK) {
        out |= TcpEventFlags::ACK;
    }
    if flags.contains(TcpFlags::FIN) {
        out |= TcpEventFlags::FIN;
    }
    if flags.contains(TcpFlags::RST) {
        out |= TcpEventFlags::RST;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghost_firewall::{Action, L3Match, Layer, NetworkMatch, PortMatch, Rule};
    use ghost_nat::ReapDeadlines;
    use ghost_packet::{build_arp, build_tcp, TcpFlags};

    fn test_router(rules: Vec<Rule>, wan_mode: WanMode) -> Router {
        let config = RouterConfig {
            lan: Cidr::new(IPv4::new(10, 0, 2, 0), 24),
            gateway_ip: IPv4::new(10, 0, 2, 1),
            gateway_mac: Mac::new([2, 0, 0, 0, 0, 254]),
            wan_ip: IPv4::new(203, 0, 113, 5),
            wan_mac: Mac::new([2, 0, 0, 0, 0, 253]),
            wan_mode,
            dns_mode: DnsMode::Passthrough,
            port_forwards: vec![],
        };
        let firewall = FirewallEngine::new(rules, vec![], Action::Allow).unwrap();
        Router::new(config, NatEngine::new(ReapDeadlines::default()), firewall, ghost_dhcp::DhcpServer::new(ghost_dhcp::DhcpConfig {
            pool_start: IPv4::new(10, 0, 2, 10),
            pool_end: IPv4::new(10, 0, 2, 100),
            subnet_mask: IPv4::new(255, 255, 255, 0),
            gateway: IPv4::new(10, 0, 2, 1),
            dns_servers: vec![IPv4::new(10, 0, 2, 1)],
            server_identifier: IPv4::new(10, 0, 2, 1),
            lease_duration: ghost_dhcp::DEFAULT_LEASE_DURATION,
            static_leases: vec![],
        }))
    }

    fn block_443() -> Rule {
        Rule {
            layer: Layer::L3,
            l2: None,
            l3: Some(L3Match {
                src: None,
                dst: Some(NetworkMatch::Cidr(Cidr::new(IPv4::new(1, 1, 1, 1), 32))),
                protocol: ghost_firewall::Protocol::Tcp,
                src_port: None,
                dst_port: Some(PortMatch::Port(443)),
            }),
            direction: Direction::Outbound,
            zone: Zone::Any,
            action: Action::Block,
            redirect_target: None,
            enabled: true,
            comment: None,
        }
    }

    fn guest_eth() -> EthernetHeader {
        EthernetHeader {
            dst: Mac::new([2, 0, 0, 0, 0, 254]),
            src: Mac::new([2, 0, 0, 0, 0, 1]),
            ether_type: ghost_packet::ETHERTYPE_IPV4,
        }
    }

    fn guest_ip(protocol: u8) -> Ipv4Header {
        Ipv4Header {
            ihl: 5,
            total_length: 0,
            identification: 1,
            flags_fragment_offset: 0,
            ttl: 64,
            protocol,
            src: IPv4::new(10, 0, 2, 2),
            dst: IPv4::new(1, 1, 1, 1),
        }
    }

    #[test]
    fn arp_for_gateway_is_answered_not_forwarded() {
        let router = test_router(vec![], WanMode::Nat);
        let req = ArpPacket {
            operation: ARP_REQUEST,
            sender_mac: Mac::new([2, 0, 0, 0, 0, 1]),
            sender_ip: IPv4::new(10, 0, 2, 2),
            target_mac: Mac::new([0; 6]),
            target_ip: IPv4::new(10, 0, 2, 1),
        };
        let frame = build_arp(&guest_eth(), &req);
        let out = router.handle_guest_frame(&frame, Instant::now());
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], RouterOutput::ToGuest(_)));
    }

    #[test]
    fn scenario_five_blocked_port_drops_and_leaves_nat_table_empty() {
        let router = test_router(vec![block_443()], WanMode::Nat);
        let tcp = TcpHeader {
            src_port: 51000,
            dst_port: 443,
            seq: 0,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 65535,
        };
        let frame = build_tcp(&guest_eth(), &guest_ip(PROTO_TCP), &tcp, &[]);
        let out = router.handle_guest_frame(&frame, Instant::now());
        assert!(out.is_empty());
        assert_eq!(router.nat().len(), 0);
    }

    #[test]
    fn scenario_five_allowed_port_nats_and_advances_state() {
        let router = test_router(vec![block_443()], WanMode::Nat);
        let now = Instant::now();
        let syn = TcpHeader {
            src_port: 51000,
            dst_port: 80,
            seq: 0,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 65535,
        };
        let frame = build_tcp(&guest_eth(), &guest_ip(PROTO_TCP), &syn, &[]);
        let out = router.handle_guest_frame(&frame, now);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], RouterOutput::ToUpstream(_)));

        let key = FlowKey {
            protocol: NatProtocol::Tcp,
            orig_src_ip: IPv4::new(10, 0, 2, 2),
            orig_src_port: 51000,
            dst_ip: IPv4::new(1, 1, 1, 1),
            dst_port: 80,
        };
        let entry = router.nat().inbound_lookup(NatProtocol::Tcp, ghost_nat::EPHEMERAL_PORT_BASE).unwrap();
        assert_eq!(entry.key, key);
        assert_eq!(entry.tcp_state, Some(ghost_nat::TcpState::SynSent));

        let ack = TcpHeader { flags: TcpFlags::ACK, ..syn };
        let ack_frame = build_tcp(&guest_eth(), &guest_ip(PROTO_TCP), &ack, &[]);
        router.handle_guest_frame(&ack_frame, now);
        let established = router.nat().inbound_lookup(NatProtocol::Tcp, ghost_nat::EPHEMERAL_PORT_BASE).unwrap();
        assert_eq!(established.tcp_state, Some(ghost_nat::TcpState::Established));
    }

    #[test]
    fn isolated_wan_mode_drops_all_egress() {
        let router = test_router(vec![], WanMode::Isolated);
        let tcp = TcpHeader {
            src_port: 51000,
            dst_port: 80,
            seq: 0,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 65535,
        };
        let frame = build_tcp(&guest_eth(), &guest_ip(PROTO_TCP), &tcp, &[]);
        assert!(router.handle_guest_frame(&frame, Instant::now()).is_empty());
    }

    #[test]
    fn unknown_ether_type_is_dropped_and_counted() {
        let router = test_router(vec![], WanMode::Nat);
        let mut frame = vec![0u8; 60];
        frame[12] = 0x88;
        frame[13] = 0xcc; // LLDP, unsupported
        let out = router.handle_guest_frame(&frame, Instant::now());
        assert!(out.is_empty());
        assert_eq!(router.counters().dropped_unknown_ether.load(Ordering::Relaxed), 1);
    }

    fn redirect_80_to_8080() -> Rule {
        Rule {
            layer: Layer::L3,
            l2: None,
            l3: Some(L3Match {
                src: None,
                dst: None,
                protocol: ghost_firewall::Protocol::Tcp,
                src_port: None,
                dst_port: Some(PortMatch::Port(80)),
            }),
            direction: Direction::Outbound,
            zone: Zone::Any,
            action: Action::Redirect,
            redirect_target: Some((IPv4::new(10, 0, 2, 50), 8080)),
            enabled: true,
            comment: None,
        }
    }

    #[test]
    fn redirect_rewrites_destination_and_continues_through_nat() {
        let router = test_router(vec![redirect_80_to_8080()], WanMode::Nat);
        let tcp = TcpHeader {
            src_port: 51000,
            dst_port: 80,
            seq: 0,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 65535,
        };
        let payload = b"hello".to_vec();
        let frame = build_tcp(&guest_eth(), &guest_ip(PROTO_TCP), &tcp, &payload);
        let out = router.handle_guest_frame(&frame, Instant::now());
        assert_eq!(out.len(), 1);
        let RouterOutput::ToUpstream(bytes) = &out[0] else {
            panic!("expected ToUpstream, got {:?}", out[0]);
        };
        match ghost_packet::parse(bytes) {
            Parsed::Tcp { ip, tcp, payload: got_payload, .. } => {
                assert_eq!(ip.dst, IPv4::new(10, 0, 2, 50));
                assert_eq!(tcp.dst_port, 8080);
                assert_eq!(got_payload, payload);
            }
            other => panic!("expected a TCP frame, got {other:?}"),
        }

        let entry = router.nat().inbound_lookup(NatProtocol::Tcp, ghost_nat::EPHEMERAL_PORT_BASE).unwrap();
        assert_eq!(entry.key.dst_ip, IPv4::new(10, 0, 2, 50));
        assert_eq!(entry.key.dst_port, 8080);
    }
}
