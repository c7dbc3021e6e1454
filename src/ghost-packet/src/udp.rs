use ghost_address::IPv4;

use crate::checksum::{internet_checksum_with_prefix, pseudo_header};
use crate::ip::PROTO_UDP;

pub const UDP_HEADER_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

impl UdpHeader {
    pub fn parse(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < UDP_HEADER_LEN {
            return None;
        }
        let src_port = u16::from_be_bytes([buf[0], buf[1]]);
        let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let end = length.max(UDP_HEADER_LEN).min(buf.len());
        Some((Self { src_port, dst_port }, &buf[UDP_HEADER_LEN..end]))
    }

    /// Serializes header + payload and computes the UDP checksum over the
    /// IPv4 pseudo-header + segment (spec.md §4.1).
    pub fn write(&self, src_ip: IPv4, dst_ip: IPv4, payload: &[u8], out: &mut Vec<u8>) {
        let total_len = (UDP_HEADER_LEN + payload.len()) as u16;
        let start = out.len();
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(payload);

        let pseudo = pseudo_header(src_ip, dst_ip, PROTO_UDP, total_len);
        let mut checksum = internet_checksum_with_prefix(&pseudo, &out[start..]);
        if checksum == 0 {
            checksum = 0xffff; // UDP: computed-zero checksum is transmitted as all-ones
        }
        out[start + 6..start + 8].copy_from_slice(&checksum.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hdr = UdpHeader { src_port: 68, dst_port: 67 };
        let payload = b"dhcp-payload";
        let mut buf = Vec::new();
        hdr.write(IPv4::new(0, 0, 0, 0), IPv4::new(255, 255, 255, 255), payload, &mut buf);
        let (parsed, parsed_payload) = UdpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed_payload, payload);
    }
}
