use std::net::IpAddr;

use ipnet::IpNet;

/// The set of networks this node refuses to talk to.
///
/// Matching is prefix containment, for both address families. The list is
/// consulted on every inbound event that introduces a new or renewed peer
/// relationship, before any trust decision is made.
#[derive(Debug, Default, Clone)]
pub struct Banlist(Vec<IpNet>);

impl Banlist {
    pub fn new(rules: Vec<IpNet>) -> Self {
        Self(rules)
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.0.iter().any(|rule| rule.contains(&addr))
    }
}
