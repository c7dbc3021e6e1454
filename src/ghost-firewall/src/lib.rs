//! Stateless firewall matcher: ordered-rule evaluation, L2/L3 matching, alias
//! resolution, default policy (spec.md §4.7.3).

use std::collections::HashMap;

use ghost_address::{Cidr, Mac, IPv4};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layer {
    L2,
    L3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
    Both,
}

impl Direction {
    fn matches(self, actual: Direction) -> bool {
        self == Direction::Both || self == actual
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zone {
    Wan,
    Lan,
    Any,
}

impl Zone {
    fn matches(self, actual: Zone) -> bool {
        self == Zone::Any || self == actual
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Allow,
    Block,
    Redirect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

impl Protocol {
    fn matches(self, actual: Protocol) -> bool {
        self == Protocol::Any || self == actual
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMatch {
    Cidr(Cidr),
    Alias(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortMatch {
    Port(u16),
    Alias(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Match {
    pub src_mac: Option<Mac>,
    pub dst_mac: Option<Mac>,
    pub ether_type: Option<u16>,
    /// `Some(true)` restricts the rule to broadcast frames, `Some(false)` to
    /// non-broadcast frames, `None` matches either.
    pub broadcast: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3Match {
    pub src: Option<NetworkMatch>,
    pub dst: Option<NetworkMatch>,
    pub protocol: Protocol,
    pub src_port: Option<u16>,
    pub dst_port: Option<PortMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub layer: Layer,
    pub l2: Option<L2Match>,
    pub l3: Option<L3Match>,
    pub direction: Direction,
    pub zone: Zone,
    pub action: Action,
    /// Concrete DNAT target for `Action::Redirect`. spec.md §9: a `redirect`
    /// rule with no target is rejected at load, never silently allowed.
    pub redirect_target: Option<(IPv4, u16)>,
    pub enabled: bool,
    pub comment: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasKind {
    Hosts,
    Networks,
    Ports,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub kind: AliasKind,
    #[serde(default)]
    pub hosts: Vec<IPv4>,
    #[serde(default)]
    pub networks: Vec<Cidr>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    #[error("rule {0} has action=redirect but no redirect_target")]
    UnsupportedRedirect(usize),
    #[error("rule {0} references unknown alias {1:?}")]
    UnknownAlias(usize, String),
    #[error("rule {0} references alias {1:?} of the wrong kind (expected {2:?})")]
    AliasKindMismatch(usize, String, AliasKind),
}

/// A packet's firewall-relevant metadata, assembled by the router from a
/// parsed frame plus the zone it arrived from or is destined to.
#[derive(Clone, Debug)]
pub struct PacketMeta {
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub ether_type: u16,
    pub is_broadcast: bool,
    pub zone: Zone,
    pub l3: Option<L3Meta>,
}

#[derive(Clone, Debug)]
pub struct L3Meta {
    pub src_ip: IPv4,
    pub dst_ip: IPv4,
    pub protocol: Protocol,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
    Redirect { target_ip: IPv4, target_port: u16 },
}

pub struct FirewallEngine {
    rules: Vec<Rule>,
    aliases: HashMap<String, Alias>,
    default_policy: Action,
}

impl FirewallEngine {
    /// Validates redirect targets and alias references up front so evaluation
    /// never needs to handle a malformed rule.
    pub fn new(
        rules: Vec<Rule>,
        aliases: Vec<Alias>,
        default_policy: Action,
    ) -> Result<Self, FirewallError> {
        let aliases: HashMap<String, Alias> =
            aliases.into_iter().map(|a| (a.name.clone(), a)).collect();

        for (i, rule) in rules.iter().enumerate() {
            if rule.action == Action::Redirect && rule.redirect_target.is_none() {
                return Err(FirewallError::UnsupportedRedirect(i));
            }
            if let Some(l3) = &rule.l3 {
                Self::check_network_ref(&aliases, i, &l3.src)?;
                Self::check_network_ref(&aliases, i, &l3.dst)?;
                if let Some(PortMatch::Alias(name)) = &l3.dst_port {
                    Self::check_alias_kind(&aliases, i, name, AliasKind::Ports)?;
                }
            }
        }

        Ok(Self {
            rules,
            aliases,
            default_policy,
        })
    }

    fn check_network_ref(
        aliases: &HashMap<String, Alias>,
        rule_idx: usize,
        m: &Option<NetworkMatch>,
    ) -> Result<(), FirewallError> {
        if let Some(NetworkMatch::Alias(name)) = m {
            let alias = aliases
                .get(name)
                .ok_or_else(|| FirewallError::UnknownAlias(rule_idx, name.clone()))?;
            if !matches!(alias.kind, AliasKind::Hosts | AliasKind::Networks) {
                return Err(FirewallError::AliasKindMismatch(
                    rule_idx,
                    name.clone(),
                    AliasKind::Networks,
                ));
            }
        }
        Ok(())
    }

    fn check_alias_kind(
        aliases: &HashMap<String, Alias>,
        rule_idx: usize,
        name: &str,
        expected: AliasKind,
    ) -> Result<(), FirewallError> {
        let alias = aliases
            .get(name)
            .ok_or_else(|| FirewallError::UnknownAlias(rule_idx, name.to_string()))?;
        if alias.kind != expected {
            return Err(FirewallError::AliasKindMismatch(
                rule_idx,
                name.to_string(),
                expected,
            ));
        }
        Ok(())
    }

    fn network_matches(&self, m: &NetworkMatch, ip: IPv4) -> bool {
        match m {
            NetworkMatch::Cidr(cidr) => cidr.contains(ip),
            NetworkMatch::Alias(name) => match self.aliases.get(name) {
                Some(alias) => match alias.kind {
                    AliasKind::Hosts => alias.hosts.contains(&ip),
                    AliasKind::Networks => alias.networks.iter().any(|c| c.contains(ip)),
                    AliasKind::Ports => false,
                },
                None => false,
            },
        }
    }

    fn port_matches(&self, m: &PortMatch, port: u16) -> bool {
        match m {
            PortMatch::Port(p) => *p == port,
            PortMatch::Alias(name) => self
                .aliases
                .get(name)
                .map(|a| a.kind == AliasKind::Ports && a.ports.contains(&port))
                .unwrap_or(false),
        }
    }

    fn rule_matches(&self, rule: &Rule, packet: &PacketMeta, direction: Direction) -> bool {
        if !rule.enabled {
            return false;
        }
        if !rule.direction.matches(direction) {
            return false;
        }
        if !rule.zone.matches(packet.zone) {
            return false;
        }

        match rule.layer {
            Layer::L2 => {
                let Some(m) = &rule.l2 else { return false };
                if let Some(src) = m.src_mac {
                    if src != packet.src_mac {
                        return false;
                    }
                }
                if let Some(dst) = m.dst_mac {
                    if dst != packet.dst_mac {
                        return false;
                    }
                }
                if let Some(et) = m.ether_type {
                    if et != packet.ether_type {
                        return false;
                    }
                }
                if let Some(want_broadcast) = m.broadcast {
                    if want_broadcast != packet.is_broadcast {
                        return false;
                    }
                }
                true
            }
            Layer::L3 => {
                let (Some(m), Some(l3)) = (&rule.l3, &packet.l3) else {
                    return false;
                };
                if let Some(src) = &m.src {
                    if !self.network_matches(src, l3.src_ip) {
                        return false;
                    }
                }
                if let Some(dst) = &m.dst {
                    if !self.network_matches(dst, l3.dst_ip) {
                        return false;
                    }
                }
                if !m.protocol.matches(l3.protocol) {
                    return false;
                }
                if let Some(want_src_port) = m.src_port {
                    if l3.src_port != Some(want_src_port) {
                        return false;
                    }
                }
                if let Some(want_dst_port) = &m.dst_port {
                    match l3.dst_port {
                        Some(p) if self.port_matches(want_dst_port, p) => {}
                        _ => return false,
                    }
                }
                true
            }
        }
    }

    /// Evaluates the ordered rule list against `packet`; first enabled match
    /// wins, otherwise the default policy applies (spec.md §4.7.3, §8).
    pub fn evaluate(&self, packet: &PacketMeta, direction: Direction) -> Verdict {
        for rule in &self.rules {
            if self.rule_matches(rule, packet, direction) {
                return match rule.action {
                    Action::Allow => Verdict::Allow,
                    Action::Block => Verdict::Block,
                    Action::Redirect => {
                        let (ip, port) = rule
                            .redirect_target
                            .expect("validated at FirewallEngine::new");
                        Verdict::Redirect {
                            target_ip: ip,
                            target_port: port,
                        }
                    }
                };
            }
        }

        match self.default_policy {
            Action::Block => Verdict::Block,
            _ => Verdict::Allow,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l3_packet(proto: Protocol, dst_port: u16) -> PacketMeta {
        PacketMeta {
            src_mac: Mac::new([2, 0, 0, 0, 0, 1]),
            dst_mac: Mac::new([2, 0, 0, 0, 0, 254]),
            ether_type: 0x0800,
            is_broadcast: false,
            zone: Zone::Lan,
            l3: Some(L3Meta {
                src_ip: IPv4::new(10, 0, 2, 2),
                dst_ip: IPv4::new(1, 1, 1, 1),
                protocol: proto,
                src_port: Some(51000),
                dst_port: Some(dst_port),
            }),
        }
    }

    fn block_443_rule() -> Rule {
        Rule {
            layer: Layer::L3,
            l2: None,
            l3: Some(L3Match {
                src: None,
                dst: None,
                protocol: Protocol::Tcp,
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

    #[test]
    fn default_allow_when_no_rule_matches() {
        let engine = FirewallEngine::new(vec![], vec![], Action::Allow).unwrap();
        let pkt = l3_packet(Protocol::Tcp, 80);
        assert_eq!(engine.evaluate(&pkt, Direction::Outbound), Verdict::Allow);
    }

    #[test]
    fn first_match_wins_allow_then_block() {
        let mut allow_rule = block_443_rule();
        allow_rule.action = Action::Allow;
        let rules = vec![allow_rule, block_443_rule()];
        let engine = FirewallEngine::new(rules, vec![], Action::Block).unwrap();
        let pkt = l3_packet(Protocol::Tcp, 443);
        assert_eq!(engine.evaluate(&pkt, Direction::Outbound), Verdict::Allow);
    }

    #[test]
    fn block_rule_drops_matching_dst_port() {
        let engine = FirewallEngine::new(vec![block_443_rule()], vec![], Action::Allow).unwrap();
        assert_eq!(
            engine.evaluate(&l3_packet(Protocol::Tcp, 443), Direction::Outbound),
            Verdict::Block
        );
        assert_eq!(
            engine.evaluate(&l3_packet(Protocol::Tcp, 80), Direction::Outbound),
            Verdict::Allow
        );
    }

    #[test]
    fn disabled_rules_are_equivalent_to_removed() {
        let mut disabled = block_443_rule();
        disabled.enabled = false;
        let with_disabled =
            FirewallEngine::new(vec![disabled], vec![], Action::Allow).unwrap();
        let without = FirewallEngine::new(vec![], vec![], Action::Allow).unwrap();
        let pkt = l3_packet(Protocol::Tcp, 443);
        assert_eq!(
            with_disabled.evaluate(&pkt, Direction::Outbound),
            without.evaluate(&pkt, Direction::Outbound)
        );
    }

    #[test]
    fn l2_rule_matches_broadcast_predicate() {
        let rule = Rule {
            layer: Layer::L2,
            l2: Some(L2Match {
                src_mac: None,
                dst_mac: None,
                ether_type: None,
                broadcast: Some(true),
            }),
            l3: None,
            direction: Direction::Both,
            zone: Zone::Any,
            action: Action::Block,
            redirect_target: None,
            enabled: true,
            comment: None,
        };
        let engine = FirewallEngine::new(vec![rule], vec![], Action::Allow).unwrap();
        let mut pkt = l3_packet(Protocol::Tcp, 80);
        pkt.is_broadcast = true;
        assert_eq!(engine.evaluate(&pkt, Direction::Outbound), Verdict::Block);
        pkt.is_broadcast = false;
        assert_eq!(engine.evaluate(&pkt, Direction::Outbound), Verdict::Allow);
    }

    #[test]
    fn l2_rule_never_matches_packet_missing_l3_is_still_evaluated_on_l2_fields_only() {
        // L2 rules only ever look at L2 fields, so they apply even though this
        // packet also happens to carry L3 metadata.
        let rule = Rule {
            layer: Layer::L2,
            l2: Some(L2Match {
                src_mac: Some(Mac::new([2, 0, 0, 0, 0, 1])),
                dst_mac: None,
                ether_type: None,
                broadcast: None,
            }),
            l3: None,
            direction: Direction::Both,
            zone: Zone::Any,
            action: Action::Block,
            redirect_target: None,
            enabled: true,
            comment: None,
        };
        let engine = FirewallEngine::new(vec![rule], vec![], Action::Allow).unwrap();
        assert_eq!(
            engine.evaluate(&l3_packet(Protocol::Tcp, 80), Direction::Outbound),
            Verdict::Block
        );
    }

    #[test]
    fn alias_resolves_network_membership() {
        let alias = Alias {
            name: "blocklist".into(),
            kind: AliasKind::Networks,
            hosts: vec![],
            networks: vec![Cidr::new(IPv4::new(1, 1, 1, 0), 24)],
            ports: vec![],
        };
        let rule = Rule {
            layer: Layer::L3,
            l2: None,
            l3: Some(L3Match {
                src: None,
                dst: Some(NetworkMatch::Alias("blocklist".into())),
                protocol: Protocol::Any,
                src_port: None,
                dst_port: None,
            }),
            direction: Direction::Outbound,
            zone: Zone::Any,
            action: Action::Block,
            redirect_target: None,
            enabled: true,
            comment: None,
        };
        let engine = FirewallEngine::new(vec![rule], vec![alias], Action::Allow).unwrap();
        assert_eq!(
            engine.evaluate(&l3_packet(Protocol::Tcp, 80), Direction::Outbound),
            Verdict::Block
        );
    }

    #[test]
    fn redirect_without_target_is_rejected_at_construction() {
        let mut rule = block_443_rule();
        rule.action = Action::Redirect;
        rule.redirect_target = None;
        assert!(matches!(
            FirewallEngine::new(vec![rule], vec![], Action::Allow),
            Err(FirewallError::UnsupportedRedirect(0))
        ));
    }

    #[test]
    fn redirect_with_target_yields_redirect_verdict() {
        let mut rule = block_443_rule();
        rule.action = Action::Redirect;
        rule.redirect_target = Some((IPv4::new(10, 0, 2, 50), 8443));
        let engine = FirewallEngine::new(vec![rule], vec![], Action::Allow).unwrap();
        assert_eq!(
            engine.evaluate(&l3_packet(Protocol::Tcp, 443), Direction::Outbound),
            Verdict::Redirect {
                target_ip: IPv4::new(10, 0, 2, 50),
                target_port: 8443
            }
        );
    }

    #[test]
    fn unknown_alias_reference_rejected_at_construction() {
        let rule = Rule {
            layer: Layer::L3,
            l2: None,
            l3: Some(L3Match {
                src: None,
                dst: Some(NetworkMatch::Alias("nope".into())),
                protocol: Protocol::Any,
                src_port: None,
                dst_port: None,
            }),
            direction: Direction::Outbound,
            zone: Zone::Any,
            action: Action::Allow,
            redirect_target: None,
            enabled: true,
            comment: None,
        };
        assert!(matches!(
            FirewallEngine::new(vec![rule], vec![], Action::Allow),
            Err(FirewallError::UnknownAlias(0, _))
        ));
    }

    #[test]
    fn direction_both_matches_either_actual_direction() {
        let mut rule = block_443_rule();
        rule.direction = Direction::Both;
        let engine = FirewallEngine::new(vec![rule], vec![], Action::Allow).unwrap();
        let pkt = l3_packet(Protocol::Tcp, 443);
        assert_eq!(engine.evaluate(&pkt, Direction::Outbound), Verdict::Block);
        assert_eq!(engine.evaluate(&pkt, Direction::Inbound), Verdict::Block);
    }
}
