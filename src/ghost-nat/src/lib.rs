//! Outbound/inbound NAT flow table, port allocator, and TCP state tracker
//! (spec.md §4.7.2).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ghost_address::IPv4;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub const EPHEMERAL_PORT_BASE: u16 = 10000;
pub const EPHEMERAL_PORT_MAX: u16 = 65535;

/// Idle-reap deadlines (spec.md §9 open question, resolved in SPEC_FULL.md §4.7.6).
#[derive(Clone, Copy, Debug)]
pub struct ReapDeadlines {
    pub tcp_established: Duration,
    pub tcp_half_open: Duration,
    pub udp: Duration,
}

impl Default for ReapDeadlines {
    fn default() -> Self {
        Self {
            tcp_established: Duration::from_secs(2 * 60 * 60),
            tcp_half_open: Duration::from_secs(30),
            udp: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    New,
    SynSent,
    Established,
    FinWait,
    Closed,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpEventFlags: u8 {
        const SYN = 0x01;
        const ACK = 0x02;
        const FIN = 0x04;
        const RST = 0x08;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub protocol: Protocol,
    pub orig_src_ip: IPv4,
    pub orig_src_port: u16,
    pub dst_ip: IPv4,
    pub dst_port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NatEntry {
    pub key: FlowKey,
    pub mapped_port: u16,
    pub tcp_state: Option<TcpState>,
}

struct Slot {
    entry: NatEntry,
    created: Instant,
    last_seen: Instant,
}

struct Table {
    by_key: HashMap<FlowKey, Slot>,
    by_mapped_port: HashMap<(Protocol, u16), FlowKey>,
    next_candidate: u16,
}

impl Table {
    fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_mapped_port: HashMap::new(),
            next_candidate: EPHEMERAL_PORT_BASE,
        }
    }

    fn allocate_port(&mut self, protocol: Protocol) -> u16 {
        let start = self.next_candidate;
        loop {
            let candidate = self.next_candidate;
            self.next_candidate = if self.next_candidate >= EPHEMERAL_PORT_MAX {
                EPHEMERAL_PORT_BASE
            } else {
                self.next_candidate + 1
            };
            if !self.by_mapped_port.contains_key(&(protocol, candidate)) {
                return candidate;
            }
            if self.next_candidate == start {
                // Table is saturated across the whole ephemeral range; reuse
                // anyway rather than loop forever (practically unreachable
                // at desktop scale).
                return candidate;
            }
        }
    }
}

/// Thread-safe NAT engine. A single lock guards the whole table; contention
/// is negligible at desktop scale (spec.md §4.7.2).
pub struct NatEngine {
    table: Mutex<Table>,
    deadlines: ReapDeadlines,
}

impl Default for NatEngine {
    fn default() -> Self {
        Self::new(ReapDeadlines::default())
    }
}

impl NatEngine {
    pub fn new(deadlines: ReapDeadlines) -> Self {
        Self {
            table: Mutex::new(Table::new()),
            deadlines,
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the existing mapping for this 5-tuple, or allocates a new one.
    /// Idempotent: repeated calls with the same 5-tuple return the same
    /// mapped port (spec.md §8).
    pub fn outbound_mapping(
        &self,
        protocol: Protocol,
        src_ip: IPv4,
        src_port: u16,
        dst_ip: IPv4,
        dst_port: u16,
        now: Instant,
    ) -> NatEntry {
        let key = FlowKey {
            protocol,
            orig_src_ip: src_ip,
            orig_src_port: src_port,
            dst_ip,
            dst_port,
        };

        let mut table = self.table.lock();
        if let Some(slot) = table.by_key.get_mut(&key) {
            slot.last_seen = now;
            return slot.entry;
        }

        let mapped_port = table.allocate_port(protocol);
        let tcp_state = matches!(protocol, Protocol::Tcp).then_some(TcpState::New);
        let entry = NatEntry {
            key,
            mapped_port,
            tcp_state,
        };
        table.by_key.insert(
            key,
            Slot {
                entry,
                created: now,
                last_seen: now,
            },
        );
        table.by_mapped_port.insert((protocol, mapped_port), key);
        entry
    }

    /// Reverse lookup for inbound traffic: mapped WAN port -> original 5-tuple.
    pub fn inbound_lookup(&self, protocol: Protocol, mapped_port: u16) -> Option<NatEntry> {
        let table = self.table.lock();
        let key = table.by_mapped_port.get(&(protocol, mapped_port))?;
        table.by_key.get(key).map(|slot| slot.entry)
    }

    /// Advances TCP connection state from observed flags, touching `last_seen`.
    pub fn update_tcp_state(&self, key: FlowKey, flags: TcpEventFlags, now: Instant) {
        let mut table = self.table.lock();
        let Some(slot) = table.by_key.get_mut(&key) else {
            return;
        };
        slot.last_seen = now;
        let Some(state) = slot.entry.tcp_state else {
            return;
        };

        let next = if flags.contains(TcpEventFlags::RST) {
            TcpState::Closed
        } else if flags.contains(TcpEventFlags::FIN) {
            TcpState::FinWait
        } else if flags.contains(TcpEventFlags::SYN) && !flags.contains(TcpEventFlags::ACK) {
            TcpState::SynSent
        } else if flags.contains(TcpEventFlags::ACK) && state == TcpState::SynSent {
            TcpState::Established
        } else {
            state
        };
        slot.entry.tcp_state = Some(next);
    }

    pub fn remove_entry(&self, key: FlowKey) {
        let mut table = self.table.lock();
        if let Some(slot) = table.by_key.remove(&key) {
            table.by_mapped_port.remove(&(key.protocol, slot.entry.mapped_port));
        }
    }

    /// O(n) sweep removing entries past their protocol/state-specific idle
    /// deadline (spec.md §4.7.2, §9). Returns the number of entries reaped.
    pub fn reap_idle(&self, now: Instant) -> usize {
        let mut table = self.table.lock();
        let deadlines = self.deadlines;
        let stale: Vec<FlowKey> = table
            .by_key
            .iter()
            .filter_map(|(key, slot)| {
                let idle = now.saturating_duration_since(slot.last_seen);
                let deadline = match (key.protocol, slot.entry.tcp_state) {
                    (Protocol::Tcp, Some(TcpState::Established)) => deadlines.tcp_established,
                    (Protocol::Tcp, _) => deadlines.tcp_half_open,
                    (Protocol::Udp, _) => deadlines.udp,
                };
                (idle >= deadline).then_some(*key)
            })
            .collect();

        let reaped = stale.len();
        for key in stale {
            if let Some(slot) = table.by_key.remove(&key) {
                table.by_mapped_port.remove(&(key.protocol, slot.entry.mapped_port));
            }
        }
        reaped
    }

    pub fn stop(&self) {
        let mut table = self.table.lock();
        table.by_key.clear();
        table.by_mapped_port.clear();
        table.next_candidate = EPHEMERAL_PORT_BASE;
    }
}
