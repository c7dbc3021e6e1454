use ghost_address::{Mac, IPv4};

pub const ARP_PACKET_LEN: usize = 28;

pub const ARP_REQUEST: u16 = 1;
pub const ARP_REPLY: u16 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: Mac,
    pub sender_ip: IPv4,
    pub target_mac: Mac,
    pub target_ip: IPv4,
}

impl ArpPacket {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < ARP_PACKET_LEN {
            return None;
        }
        let htype = u16::from_be_bytes([buf[0], buf[1]]);
        let ptype = u16::from_be_bytes([buf[2], buf[3]]);
        let hlen = buf[4];
        let plen = buf[5];
        if htype != 1 || ptype != 0x0800 || hlen != 6 || plen != 4 {
            return None;
        }
        let operation = u16::from_be_bytes([buf[6], buf[7]]);
        let sender_mac = Mac::new(buf[8..14].try_into().ok()?);
        let sender_ip = IPv4(buf[14..18].try_into().ok()?);
        let target_mac = Mac::new(buf[18..24].try_into().ok()?);
        let target_ip = IPv4(buf[24..28].try_into().ok()?);
        Some(Self {
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&0x0800u16.to_be_bytes());
        out.push(6);
        out.push(4);
        out.extend_from_slice(&self.operation.to_be_bytes());
        out.extend_from_slice(self.sender_mac.as_bytes());
        out.extend_from_slice(&self.sender_ip.octets());
        out.extend_from_slice(self.target_mac.as_bytes());
        out.extend_from_slice(&self.target_ip.octets());
    }

    /// Builds the reply a proxy ARP responder sends on behalf of `replying_mac`/
    /// `replying_ip` to a request for that IP (spec.md §4.7.1 step 2).
    pub fn reply_for(request: &ArpPacket, replying_mac: Mac, replying_ip: IPv4) -> Self {
        Self {
            operation: ARP_REPLY,
            sender_mac: replying_mac,
            sender_ip: replying_ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
        }
    }
}
