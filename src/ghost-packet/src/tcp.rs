use bitflags::bitflags;
use ghost_address::IPv4;

use crate::checksum::{internet_checksum_with_prefix, pseudo_header};
use crate::ip::PROTO_TCP;

pub const MIN_TCP_HEADER_LEN: usize = 20;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data_offset: u8, // in 32-bit words, >= 5
    pub flags: TcpFlags,
    pub window: u16,
}

impl TcpHeader {
    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }

    pub fn parse(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < MIN_TCP_HEADER_LEN {
            return None;
        }
        let src_port = u16::from_be_bytes([buf[0], buf[1]]);
        let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
        let seq = u32::from_be_bytes(buf[4..8].try_into().ok()?);
        let ack = u32::from_be_bytes(buf[8..12].try_into().ok()?);
        let data_offset = buf[12] >> 4;
        if data_offset < 5 {
            return None;
        }
        let flags = TcpFlags::from_bits_truncate(buf[13]);
        let window = u16::from_be_bytes([buf[14], buf[15]]);

        let header_len = data_offset as usize * 4;
        if buf.len() < header_len {
            return None;
        }
        let header = TcpHeader {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset,
            flags,
            window,
        };
        Some((header, &buf[header_len..]))
    }

    pub fn write(&self, src_ip: IPv4, dst_ip: IPv4, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(5 << 4); // data offset = 5, no options
        out.push(self.flags.bits());
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(&[0, 0]); // urgent pointer
        out.extend_from_slice(payload);

        let segment_len = (MIN_TCP_HEADER_LEN + payload.len()) as u16;
        let pseudo = pseudo_header(src_ip, dst_ip, PROTO_TCP, segment_len);
        let checksum = internet_checksum_with_prefix(&pseudo, &out[start..]);
        out[start + 16..start + 18].copy_from_slice(&checksum.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_flags() {
        let hdr = TcpHeader {
            src_port: 51234,
            dst_port: 443,
            seq: 1,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 65535,
        };
        let mut buf = Vec::new();
        hdr.write(IPv4::new(10, 0, 2, 2), IPv4::new(1, 1, 1, 1), &[], &mut buf);
        let (parsed, payload) = TcpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert!(payload.is_empty());
    }

    #[test]
    fn syn_ack_flags_combine() {
        let flags = TcpFlags::SYN | TcpFlags::ACK;
        assert!(flags.contains(TcpFlags::SYN));
        assert!(flags.contains(TcpFlags::ACK));
        assert!(!flags.contains(TcpFlags::FIN));
    }
}
