//! Stand-in for the blocklist collaborator (§1: external). A simple
//! IPv4-range set is enough to exercise the reconnect/incoming filters;
//! real deployments would swap this for a loaded block-list file.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

pub trait Blocklist: Send + Sync {
    fn is_blocked(&self, addr: Ipv4Addr) -> bool;
}

#[derive(Debug, Default)]
pub struct SetBlocklist {
    blocked: BTreeSet<Ipv4Addr>,
}

impl SetBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&mut self, addr: Ipv4Addr) {
        self.blocked.insert(addr);
    }

    pub fn unblock(&mut self, addr: Ipv4Addr) {
        self.blocked.remove(&addr);
    }
}

impl Blocklist for SetBlocklist {
    fn is_blocked(&self, addr: Ipv4Addr) -> bool {
        self.blocked.contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_only_added_addresses() {
        let mut bl = SetBlocklist::new();
        let a = Ipv4Addr::new(1, 2, 3, 4);
        let b = Ipv4Addr::new(5, 6, 7, 8);
        bl.block(a);
        assert!(bl.is_blocked(a));
        assert!(!bl.is_blocked(b));
    }
}
