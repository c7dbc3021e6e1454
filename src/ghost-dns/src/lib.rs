//! DNS mode selector: passthrough / custom servers / block-all
//! (spec.md §4.7.5).

use ghost_address::IPv4;
use serde::{Deserialize, Serialize};

const DNS_HEADER_LEN: usize = 12;
const RCODE_NXDOMAIN: u8 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DnsMode {
    Passthrough,
    Custom(Vec<IPv4>),
    Blocked,
}

/// What the router should do with a DNS query under the configured mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DnsAction {
    /// Pass the datagram through untouched (only ever returned for
    /// `DnsMode::Passthrough`, which the router is expected to never route
    /// here in the first place — spec.md §4.7.5).
    PassThrough,
    /// Forward the query verbatim to this upstream server.
    Forward(IPv4),
    /// Send this reply datagram directly back to the querying guest.
    Reply(Vec<u8>),
}

/// Decides how to handle one DNS query per the configured mode. Returns
/// `None` for malformed input shorter than a DNS header (spec.md §4.7.5,
/// §8: "truncated input (< 12 bytes) returns None").
pub fn resolve(mode: &DnsMode, query: &[u8]) -> Option<DnsAction> {
    match mode {
        DnsMode::Passthrough => Some(DnsAction::PassThrough),
        DnsMode::Blocked => {
            if query.len() < DNS_HEADER_LEN {
                return None;
            }
            Some(DnsAction::Reply(nxdomain_reply(query)))
        }
        DnsMode::Custom(servers) => {
            if query.len() < DNS_HEADER_LEN {
                return None;
            }
            match servers.first() {
                Some(server) => Some(DnsAction::Forward(*server)),
                None => Some(DnsAction::Reply(nxdomain_reply(query))),
            }
        }
    }
}

/// Builds an NXDOMAIN reply echoing the query's transaction id and question
/// section, with QR=1 and RCODE=3. The `RD` bit is preserved from the query
/// and mirrored back as `RA`.
pub fn nxdomain_reply(query: &[u8]) -> Vec<u8> {
    let mut reply = query.to_vec();
    let recursion_desired = query[2] & 0x01;
    reply[2] = 0x80 | recursion_desired; // QR=1, Opcode=0, AA=0, TC=0, RD=echoed
    reply[3] = 0x80 | RCODE_NXDOMAIN; // RA=1, Z=0, RCODE=NXDOMAIN
    // No answer records are synthesized; ancount stays whatever the query had
    // (typically 0), matching a bare NXDOMAIN with no RRs.
    reply[6] = 0;
    reply[7] = 0;
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(id: u16) -> Vec<u8> {
        let mut q = vec![0u8; 12];
        q[0..2].copy_from_slice(&id.to_be_bytes());
        q[2] = 0x01; // RD set
        q[4..6].copy_from_slice(&1u16.to_be_bytes()); // qdcount = 1
        q.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
        q
    }

    #[test]
    fn passthrough_never_synthesizes_a_reply() {
        assert_eq!(
            resolve(&DnsMode::Passthrough, &query(1)),
            Some(DnsAction::PassThrough)
        );
    }

    #[test]
    fn blocked_always_nxdomains() {
        let q = query(0x1234);
        match resolve(&DnsMode::Blocked, &q).unwrap() {
            DnsAction::Reply(reply) => {
                assert_eq!(&reply[0..2], &q[0..2]);
                assert_eq!(reply[2] & 0x80, 0x80);
                assert_eq!(reply[3] & 0x0f, RCODE_NXDOMAIN);
            }
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn custom_forwards_to_first_server() {
        let servers = vec![IPv4::new(1, 1, 1, 1), IPv4::new(8, 8, 8, 8)];
        assert_eq!(
            resolve(&DnsMode::Custom(servers), &query(2)),
            Some(DnsAction::Forward(IPv4::new(1, 1, 1, 1)))
        );
    }

    #[test]
    fn custom_with_no_servers_nxdomains() {
        match resolve(&DnsMode::Custom(vec![]), &query(3)).unwrap() {
            DnsAction::Reply(_) => {}
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn truncated_query_returns_none() {
        assert_eq!(resolve(&DnsMode::Blocked, &[0u8; 4]), None);
        assert_eq!(resolve(&DnsMode::Custom(vec![IPv4::new(1, 1, 1, 1)]), &[0u8; 4]), None);
    }

    #[test]
    fn transaction_id_echoed() {
        let q = query(0xabcd);
        match resolve(&DnsMode::Blocked, &q).unwrap() {
            DnsAction::Reply(reply) => assert_eq!(&reply[0..2], &q[0..2]),
            other => panic!("expected Reply, got {other:?}"),
        }
    }
}
