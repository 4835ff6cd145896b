//! The atom pool: a durable per-torrent registry of every peer address ever
//! heard of, independent of whether we currently hold a connection to it.
//! A sorted, longer-lived pool distinct from the live peer set.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Instant;

pub const ENCRYPTION_FLAG: u8 = 0x01;
pub const SEED_FLAG: u8 = 0x02;

const MYFLAG_BANNED: u8 = 0x01;
const MYFLAG_UNREACHABLE: u8 = 0x02;

/// Where we first heard about a peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum From {
    Incoming,
    Tracker,
    Cache,
    Pex,
    Resume,
}

/// A long-lived record of a peer address, independent of any live
/// connection. Created on first sighting; destroyed only when the owning
/// torrent is removed.
#[derive(Debug, Clone)]
pub struct PeerAtom {
    pub addr: Ipv4Addr,
    pub port: u16,

    /// Protocol-visible bits (matches BitTorrent PEX `added.f` semantics).
    pub flags: u8,

    /// Manager-private bits: BANNED, UNREACHABLE.
    myflags: u8,

    pub from: From,
    pub num_fails: u16,

    /// Last connection attempt or disconnect.
    pub time: Instant,

    /// Last time this peer transferred payload to us.
    pub piece_data_time: Option<Instant>,
}

impl PeerAtom {
    pub fn new(addr: Ipv4Addr, port: u16, flags: u8, from: From, now: Instant) -> Self {
        Self {
            addr,
            port,
            flags,
            myflags: 0,
            from,
            num_fails: 0,
            time: now,
            piece_data_time: None,
        }
    }

    pub fn is_banned(&self) -> bool {
        self.myflags & MYFLAG_BANNED != 0
    }

    pub fn ban(&mut self) {
        self.myflags |= MYFLAG_BANNED;
    }

    pub fn is_unreachable(&self) -> bool {
        self.myflags & MYFLAG_UNREACHABLE != 0
    }

    pub fn mark_unreachable(&mut self) {
        self.myflags |= MYFLAG_UNREACHABLE;
    }

    pub fn is_seed(&self) -> bool {
        self.flags & SEED_FLAG != 0
    }

    pub fn set_seed(&mut self, is_seed: bool) {
        if is_seed {
            self.flags |= SEED_FLAG;
        } else {
            self.flags &= !SEED_FLAG;
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & ENCRYPTION_FLAG != 0
    }
}

/// Per-torrent sorted set of every peer address ever heard of, keyed by
/// IPv4 address. A `BTreeMap` gives sorted find/insert/remove without a
/// hand-rolled sorted pointer array.
#[derive(Debug, Default)]
pub struct AtomPool {
    atoms: BTreeMap<Ipv4Addr, PeerAtom>,
}

impl AtomPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<&PeerAtom> {
        self.atoms.get(&addr)
    }

    pub fn get_mut(&mut self, addr: Ipv4Addr) -> Option<&mut PeerAtom> {
        self.atoms.get_mut(&addr)
    }

    /// Idempotent on `addr`: a second call with a different port does not
    /// overwrite the existing atom.
    pub fn ensure_exists(
        &mut self,
        addr: Ipv4Addr,
        port: u16,
        flags: u8,
        from: From,
        now: Instant,
    ) -> &mut PeerAtom {
        self.atoms
            .entry(addr)
            .or_insert_with(|| PeerAtom::new(addr, port, flags, from, now))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerAtom> {
        self.atoms.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerAtom> {
        self.atoms.values_mut()
    }

    pub fn remove(&mut self, addr: Ipv4Addr) -> Option<PeerAtom> {
        self.atoms.remove(&addr)
    }

    pub fn clear(&mut self) {
        self.atoms.clear();
    }
}
