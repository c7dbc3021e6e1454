use ghost_address::Mac;

pub const ETHERNET_HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: Mac,
    pub src: Mac,
    pub ether_type: u16,
}

impl EthernetHeader {
    pub fn parse(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < ETHERNET_HEADER_LEN {
            return None;
        }
        let dst = Mac::new(buf[0..6].try_into().ok()?);
        let src = Mac::new(buf[6..12].try_into().ok()?);
        let ether_type = u16::from_be_bytes([buf[12], buf[13]]);
        Some((Self { dst, src, ether_type }, &buf[ETHERNET_HEADER_LEN..]))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.dst.as_bytes());
        out.extend_from_slice(self.src.as_bytes());
        out.extend_from_slice(&self.ether_type.to_be_bytes());
    }
}
