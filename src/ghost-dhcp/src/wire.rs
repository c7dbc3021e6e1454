//! Minimal BOOTP/DHCP (RFC 2131) message codec: just enough of the fixed
//! header and option space for DORA (spec.md §4.7.4).

use ghost_address::{Mac, IPv4};

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

pub const DHCP_DISCOVER: u8 = 1;
pub const DHCP_OFFER: u8 = 2;
pub const DHCP_REQUEST: u8 = 3;
pub const DHCP_ACK: u8 = 5;
pub const DHCP_NAK: u8 = 6;

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const FIXED_HEADER_LEN: usize = 236;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS_SERVERS: u8 = 6;
const OPT_HOSTNAME: u8 = 12;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_IDENTIFIER: u8 = 54;
const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
const OPT_TFTP_SERVER_NAME: u8 = 66;
const OPT_BOOTFILE_NAME: u8 = 67;
const OPT_END: u8 = 255;

#[derive(Clone, Debug, Default)]
pub struct DhcpOptions {
    pub message_type: Option<u8>,
    pub subnet_mask: Option<IPv4>,
    pub routers: Vec<IPv4>,
    pub dns_servers: Vec<IPv4>,
    pub requested_ip: Option<IPv4>,
    pub lease_time: Option<u32>,
    pub server_identifier: Option<IPv4>,
    pub hostname: Option<String>,
    pub parameter_request_list: Vec<u8>,
    pub tftp_server_name: Option<String>,
    pub bootfile_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DhcpMessage {
    pub op: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: IPv4,
    pub yiaddr: IPv4,
    pub siaddr: IPv4,
    pub giaddr: IPv4,
    pub chaddr: Mac,
    pub options: DhcpOptions,
}

impl DhcpMessage {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FIXED_HEADER_LEN + MAGIC_COOKIE.len() {
            return None;
        }
        let op = buf[0];
        let hlen = buf[2];
        if hlen != 6 {
            return None;
        }
        let xid = u32::from_be_bytes(buf[4..8].try_into().ok()?);
        let secs = u16::from_be_bytes(buf[8..10].try_into().ok()?);
        let flags = u16::from_be_bytes(buf[10..12].try_into().ok()?);
        let ciaddr = IPv4(buf[12..16].try_into().ok()?);
        let yiaddr = IPv4(buf[16..20].try_into().ok()?);
        let siaddr = IPv4(buf[20..24].try_into().ok()?);
        let giaddr = IPv4(buf[24..28].try_into().ok()?);
        let chaddr = Mac::new(buf[28..34].try_into().ok()?);

        if buf[236..240] != MAGIC_COOKIE {
            return None;
        }

        let options = Self::parse_options(&buf[240..]);

        Some(Self {
            op,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            options,
        })
    }

    fn parse_options(mut buf: &[u8]) -> DhcpOptions {
        let mut opts = DhcpOptions::default();
        while !buf.is_empty() {
            let code = buf[0];
            if code == OPT_PAD {
                buf = &buf[1..];
                continue;
            }
            if code == OPT_END {
                break;
            }
            if buf.len() < 2 {
                break;
            }
            let len = buf[1] as usize;
            if buf.len() < 2 + len {
                break;
            }
            let value = &buf[2..2 + len];
            match code {
                OPT_MESSAGE_TYPE if len == 1 => opts.message_type = Some(value[0]),
                OPT_SUBNET_MASK if len == 4 => {
                    opts.subnet_mask = Some(IPv4(value.try_into().unwrap()))
                }
                OPT_ROUTER => {
                    opts.routers = value.chunks_exact(4).map(|c| IPv4(c.try_into().unwrap())).collect()
                }
                OPT_DNS_SERVERS => {
                    opts.dns_servers =
                        value.chunks_exact(4).map(|c| IPv4(c.try_into().unwrap())).collect()
                }
                OPT_REQUESTED_IP if len == 4 => {
                    opts.requested_ip = Some(IPv4(value.try_into().unwrap()))
                }
                OPT_LEASE_TIME if len == 4 => {
                    opts.lease_time = Some(u32::from_be_bytes(value.try_into().unwrap()))
                }
                OPT_SERVER_IDENTIFIER if len == 4 => {
                    opts.server_identifier = Some(IPv4(value.try_into().unwrap()))
                }
                OPT_HOSTNAME => opts.hostname = Some(String::from_utf8_lossy(value).into_owned()),
                OPT_PARAMETER_REQUEST_LIST => opts.parameter_request_list = value.to_vec(),
                OPT_TFTP_SERVER_NAME => {
                    opts.tftp_server_name = Some(String::from_utf8_lossy(value).into_owned())
                }
                OPT_BOOTFILE_NAME => {
                    opts.bootfile_name = Some(String::from_utf8_lossy(value).into_owned())
                }
                _ => {}
            }
            buf = &buf[2 + len..];
        }
        opts
    }

    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(300);
        out.push(self.op);
        out.push(1); // htype = Ethernet
        out.push(6); // hlen
        out.push(0); // hops
        out.extend_from_slice(&self.xid.to_be_bytes());
        out.extend_from_slice(&self.secs.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.ciaddr.octets());
        out.extend_from_slice(&self.yiaddr.octets());
        out.extend_from_slice(&self.siaddr.octets());
        out.extend_from_slice(&self.giaddr.octets());
        out.extend_from_slice(self.chaddr.as_bytes());
        out.resize(236, 0); // pad chaddr[6..16], sname, file
        out.extend_from_slice(&MAGIC_COOKIE);

        let o = &self.options;
        if let Some(mt) = o.message_type {
            out.extend_from_slice(&[OPT_MESSAGE_TYPE, 1, mt]);
        }
        if let Some(mask) = o.subnet_mask {
            out.push(OPT_SUBNET_MASK);
            out.push(4);
            out.extend_from_slice(&mask.octets());
        }
        if !o.routers.is_empty() {
            out.push(OPT_ROUTER);
            out.push((o.routers.len() * 4) as u8);
            for ip in &o.routers {
                out.extend_from_slice(&ip.octets());
            }
        }
        if !o.dns_servers.is_empty() {
            out.push(OPT_DNS_SERVERS);
            out.push((o.dns_servers.len() * 4) as u8);
            for ip in &o.dns_servers {
                out.extend_from_slice(&ip.octets());
            }
        }
        if let Some(lease) = o.lease_time {
            out.push(OPT_LEASE_TIME);
            out.push(4);
            out.extend_from_slice(&lease.to_be_bytes());
        }
        if let Some(server_id) = o.server_identifier {
            out.push(OPT_SERVER_IDENTIFIER);
            out.push(4);
            out.extend_from_slice(&server_id.octets());
        }
        if let Some(name) = &o.tftp_server_name {
            out.push(OPT_TFTP_SERVER_NAME);
            out.push(name.len() as u8);
            out.extend_from_slice(name.as_bytes());
        }
        if let Some(file) = &o.bootfile_name {
            out.push(OPT_BOOTFILE_NAME);
            out.push(file.len() as u8);
            out.extend_from_slice(file.as_bytes());
        }
        out.push(OPT_END);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_discover_message() {
        let msg = DhcpMessage {
            op: BOOTREQUEST,
            xid: 0xdeadbeef,
            secs: 0,
            flags: 0,
            ciaddr: IPv4::UNSPECIFIED,
            yiaddr: IPv4::UNSPECIFIED,
            siaddr: IPv4::UNSPECIFIED,
            giaddr: IPv4::UNSPECIFIED,
            chaddr: Mac::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
            options: DhcpOptions {
                message_type: Some(DHCP_DISCOVER),
                ..Default::default()
            },
        };
        let bytes = msg.write();
        let parsed = DhcpMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.xid, msg.xid);
        assert_eq!(parsed.chaddr, msg.chaddr);
        assert_eq!(parsed.options.message_type, Some(DHCP_DISCOVER));
    }

    #[test]
    fn truncated_message_returns_none() {
        assert!(DhcpMessage::parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn missing_magic_cookie_returns_none() {
        let mut buf = vec![0u8; 240];
        buf[2] = 6;
        assert!(DhcpMessage::parse(&buf).is_none());
    }
}
