//! Ethernet/ARP/IPv4/UDP/TCP/ICMP parser and builder (spec.md §4.1).
//!
//! Parsing is total: malformed, truncated, or unsupported frames never
//! panic, they fall into [`Parsed::UnknownEther`] / [`Parsed::UnknownIp`].

mod arp;
mod checksum;
mod ethernet;
mod icmp;
mod ip;
mod tcp;
mod udp;

pub use arp::{ArpPacket, ARP_REPLY, ARP_REQUEST};
pub use checksum::{internet_checksum, internet_checksum_with_prefix, pseudo_header};
pub use ethernet::{EthernetHeader, ETHERTYPE_ARP, ETHERTYPE_IPV4};
pub use icmp::{IcmpHeader, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
pub use ip::{Ipv4Header, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
pub use tcp::{TcpFlags, TcpHeader};
pub use udp::UdpHeader;

/// The result of parsing one Ethernet frame, owning a copy of its payload
/// bytes so callers can hold onto it past the lifetime of the input buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed {
    Arp {
        eth: EthernetHeader,
        arp: ArpPacket,
    },
    Udp {
        eth: EthernetHeader,
        ip: Ipv4Header,
        udp: UdpHeader,
        payload: Vec<u8>,
    },
    Tcp {
        eth: EthernetHeader,
        ip: Ipv4Header,
        tcp: TcpHeader,
        payload: Vec<u8>,
    },
    Icmp {
        eth: EthernetHeader,
        ip: Ipv4Header,
        icmp: IcmpHeader,
        payload: Vec<u8>,
    },
    /// Ethernet frame whose ether-type isn't IPv4 or ARP.
    UnknownEther,
    /// IPv4 packet whose protocol isn't UDP/TCP/ICMP.
    UnknownIp { eth: EthernetHeader, ip: Ipv4Header },
}

/// Parses a single Ethernet frame. Never fails loudly: anything this codec
/// doesn't understand comes back as one of the `Unknown*` variants.
pub fn parse(frame: &[u8]) -> Parsed {
    let Some((eth, rest)) = EthernetHeader::parse(frame) else {
        return Parsed::UnknownEther;
    };

    match eth.ether_type {
        ETHERTYPE_ARP => match ArpPacket::parse(rest) {
            Some(arp) => Parsed::Arp { eth, arp },
            None => Parsed::UnknownEther,
        },
        ETHERTYPE_IPV4 => {
            let Some((ip, ip_payload)) = Ipv4Header::parse(rest) else {
                return Parsed::UnknownEther;
            };
            match ip.protocol {
                PROTO_UDP => match UdpHeader::parse(ip_payload) {
                    Some((udp, payload)) => Parsed::Udp {
                        eth,
                        ip,
                        udp,
                        payload: payload.to_vec(),
                    },
                    None => Parsed::UnknownIp { eth, ip },
                },
                PROTO_TCP => match TcpHeader::parse(ip_payload) {
                    Some((tcp, payload)) => Parsed::Tcp {
                        eth,
                        ip,
                        tcp,
                        payload: payload.to_vec(),
                    },
                    None => Parsed::UnknownIp { eth, ip },
                },
                PROTO_ICMP => match IcmpHeader::parse(ip_payload) {
                    Some((icmp, payload)) => Parsed::Icmp {
                        eth,
                        ip,
                        icmp,
                        payload: payload.to_vec(),
                    },
                    None => Parsed::UnknownIp { eth, ip },
                },
                _ => Parsed::UnknownIp { eth, ip },
            }
        }
        _ => Parsed::UnknownEther,
    }
}

pub fn build_arp(eth: &EthernetHeader, arp: &ArpPacket) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    eth.write(&mut out);
    arp.write(&mut out);
    out
}

pub fn build_udp(
    eth: &EthernetHeader,
    ip: &Ipv4Header,
    udp: &UdpHeader,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + payload.len());
    eth.write(&mut out);
    let mut ip_and_beyond = Vec::with_capacity(ip::MIN_IPV4_HEADER_LEN + udp::UDP_HEADER_LEN + payload.len());
    let total_length = (ip::MIN_IPV4_HEADER_LEN + udp::UDP_HEADER_LEN + payload.len()) as u16;
    let ip = Ipv4Header { total_length, ..*ip };
    ip.write(&mut ip_and_beyond);
    udp.write(ip.src, ip.dst, payload, &mut ip_and_beyond);
    out.extend_from_slice(&ip_and_beyond);
    out
}

pub fn build_tcp(
    eth: &EthernetHeader,
    ip: &Ipv4Header,
    tcp: &TcpHeader,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + payload.len());
    eth.write(&mut out);
    let total_length = (ip::MIN_IPV4_HEADER_LEN + tcp::MIN_TCP_HEADER_LEN + payload.len()) as u16;
    let ip = Ipv4Header { total_length, ..*ip };
    ip.write(&mut out);
    tcp.write(ip.src, ip.dst, payload, &mut out);
    out
}

pub fn build_icmp(
    eth: &EthernetHeader,
    ip: &Ipv4Header,
    icmp: &IcmpHeader,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + payload.len());
    eth.write(&mut out);
    let total_length = (ip::MIN_IPV4_HEADER_LEN + icmp::MIN_ICMP_HEADER_LEN + payload.len()) as u16;
    let ip = Ipv4Header { total_length, ..*ip };
    ip.write(&mut out);
    icmp.write(payload, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghost_address::{Mac, IPv4};

    fn eth(ether_type: u16) -> EthernetHeader {
        EthernetHeader {
            dst: Mac::new([2, 0, 0, 0, 0, 254]),
            src: Mac::new([2, 0, 0, 0, 0, 1]),
            ether_type,
        }
    }

    fn ip_header(protocol: u8) -> Ipv4Header {
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
    fn arp_round_trips_through_parse() {
        let arp = ArpPacket {
            operation: ARP_REQUEST,
            sender_mac: Mac::new([2, 0, 0, 0, 0, 1]),
            sender_ip: IPv4::new(10, 0, 2, 2),
            target_mac: Mac::new([0; 6]),
            target_ip: IPv4::new(10, 0, 2, 1),
        };
        let frame = build_arp(&eth(ETHERTYPE_ARP), &arp);
        match parse(&frame) {
            Parsed::Arp { arp: parsed, .. } => assert_eq!(parsed, arp),
            other => panic!("expected Arp, got {other:?}"),
        }
    }

    #[test]
    fn udp_round_trips_through_parse() {
        let udp = UdpHeader { src_port: 68, dst_port: 67 };
        let payload = b"hello-dhcp".to_vec();
        let frame = build_udp(&eth(ETHERTYPE_IPV4), &ip_header(PROTO_UDP), &udp, &payload);
        match parse(&frame) {
            Parsed::Udp { udp: parsed, payload: p, .. } => {
                assert_eq!(parsed, udp);
                assert_eq!(p, payload);
            }
            other => panic!("expected Udp, got {other:?}"),
        }
    }

    #[test]
    fn tcp_round_trips_through_parse() {
        let tcp = TcpHeader {
            src_port: 51234,
            dst_port: 443,
            seq: 10,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 65535,
        };
        let frame = build_tcp(&eth(ETHERTYPE_IPV4), &ip_header(PROTO_TCP), &tcp, &[]);
        match parse(&frame) {
            Parsed::Tcp { tcp: parsed, .. } => assert_eq!(parsed, tcp),
            other => panic!("expected Tcp, got {other:?}"),
        }
    }

    #[test]
    fn icmp_round_trips_through_parse() {
        let icmp = IcmpHeader {
            icmp_type: ICMP_ECHO_REQUEST,
            code: 0,
            rest_of_header: 42,
        };
        let frame = build_icmp(&eth(ETHERTYPE_IPV4), &ip_header(PROTO_ICMP), &icmp, b"ping");
        match parse(&frame) {
            Parsed::Icmp { icmp: parsed, payload, .. } => {
                assert_eq!(parsed, icmp);
                assert_eq!(payload, b"ping");
            }
            other => panic!("expected Icmp, got {other:?}"),
        }
    }

    #[test]
    fn unknown_ether_type_is_reported_not_panicked() {
        let frame = build_arp(&eth(0x1234), &ArpPacket {
            operation: ARP_REQUEST,
            sender_mac: Mac::new([0; 6]),
            sender_ip: IPv4::UNSPECIFIED,
            target_mac: Mac::new([0; 6]),
            target_ip: IPv4::UNSPECIFIED,
        });
        assert_eq!(parse(&frame), Parsed::UnknownEther);
    }

    #[test]
    fn unknown_ip_protocol_is_reported() {
        let frame = build_udp(&eth(ETHERTYPE_IPV4), &ip_header(253), &UdpHeader { src_port: 1, dst_port: 2 }, &[]);
        match parse(&frame) {
            Parsed::UnknownIp { ip, .. } => assert_eq!(ip.protocol, 253),
            other => panic!("expected UnknownIp, got {other:?}"),
        }
    }

    #[test]
    fn truncated_frame_never_panics() {
        for len in 0..20 {
            let _ = parse(&vec![0u8; len]);
        }
    }
}
