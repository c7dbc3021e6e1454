use crate::checksum::internet_checksum;

pub const MIN_ICMP_HEADER_LEN: usize = 8;

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub rest_of_header: u32,
}

impl IcmpHeader {
    pub fn parse(buf: &[u8]) -> Option<(Self, &[u8])> {
        if buf.len() < MIN_ICMP_HEADER_LEN {
            return None;
        }
        let icmp_type = buf[0];
        let code = buf[1];
        let rest_of_header = u32::from_be_bytes(buf[4..8].try_into().ok()?);
        Some((
            Self { icmp_type, code, rest_of_header },
            &buf[MIN_ICMP_HEADER_LEN..],
        ))
    }

    pub fn write(&self, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.push(self.icmp_type);
        out.push(self.code);
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(&self.rest_of_header.to_be_bytes());
        out.extend_from_slice(payload);

        let checksum = internet_checksum(&out[start..]);
        out[start + 2..start + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Builds the echo reply for a received echo request, copying the
    /// identifier/sequence number and payload verbatim.
    pub fn echo_reply_for(request: &IcmpHeader) -> IcmpHeader {
        IcmpHeader {
            icmp_type: ICMP_ECHO_REPLY,
            code: 0,
            rest_of_header: request.rest_of_header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hdr = IcmpHeader {
            icmp_type: ICMP_ECHO_REQUEST,
            code: 0,
            rest_of_header: 0x0001_0002,
        };
        let payload = b"ping";
        let mut buf = Vec::new();
        hdr.write(payload, &mut buf);
        let (parsed, parsed_payload) = IcmpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed_payload, payload);
    }

    #[test]
    fn echo_reply_mirrors_identifier_and_sequence() {
        let req = IcmpHeader {
            icmp_type: ICMP_ECHO_REQUEST,
            code: 0,
            rest_of_header: 0xdead_beef,
        };
        let reply = IcmpHeader::echo_reply_for(&req);
        assert_eq!(reply.icmp_type, ICMP_ECHO_REPLY);
        assert_eq!(reply.rest_of_header, req.rest_of_header);
    }
}
