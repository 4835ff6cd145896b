//! Statistics surfaced to the torrent layer (§6): known/connected/sending/
//! receiving counts by discovery bucket, a piece-availability histogram,
//! and the per-peer flag-string rendering (`O D/d U/u K ? E X I`).

use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::atom::AtomPool;
use crate::atom::From as AtomFrom;
use crate::bitfield::BitfieldExt;
use crate::meta::TorrentMeta;
use crate::peer::Peer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FromCounts {
    pub incoming: usize,
    pub tracker: usize,
    pub cache: usize,
    pub pex: usize,
    pub resume: usize,
}

impl FromCounts {
    fn bump(&mut self, from: AtomFrom) {
        match from {
            AtomFrom::Incoming => self.incoming += 1,
            AtomFrom::Tracker => self.tracker += 1,
            AtomFrom::Cache => self.cache += 1,
            AtomFrom::Pex => self.pex += 1,
            AtomFrom::Resume => self.resume += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TorrentStats {
    pub known_peers: usize,
    pub connected_peers: usize,
    /// Peers we are actively pulling blocks from.
    pub sending_to_us: usize,
    /// Peers we are actively pushing blocks to.
    pub receiving_from_us: usize,
    pub from: FromCounts,
}

pub fn torrent_stats(pool: &AtomPool, peers: &BTreeMap<SocketAddr, Peer>) -> TorrentStats {
    let mut from = FromCounts::default();
    for atom in pool.iter() {
        from.bump(atom.from);
    }

    let sending_to_us = peers.values().filter(|p| p.is_downloading_from()).count();
    let receiving_from_us = peers.values().filter(|p| p.peer_interested && !p.peer_choked).count();

    TorrentStats {
        known_peers: pool.len(),
        connected_peers: peers.len(),
        sending_to_us,
        receiving_from_us,
        from,
    }
}

/// Per-piece count of connected peers reporting that piece, for the
/// torrent-wide availability histogram.
pub fn torrent_availability(meta: &TorrentMeta, peers: &BTreeMap<SocketAddr, Peer>) -> Vec<usize> {
    let mut tab = vec![0usize; meta.num_pieces as usize];
    for peer in peers.values() {
        for (idx, slot) in tab.iter_mut().enumerate() {
            if peer.have.test(idx) {
                *slot += 1;
            }
        }
    }
    tab
}

/// Builds the flag string for one peer: `O D/d U/u K ? E X I`, each
/// character present only if its condition holds, in that fixed order.
pub fn peer_stat_flags(peer: &Peer, is_optimistic: bool, from_pex: bool) -> String {
    let mut flags = String::new();

    if is_optimistic {
        flags.push('O');
    }

    let downloading_from = peer.is_downloading_from();
    if downloading_from {
        flags.push('D');
    } else if peer.client_interested {
        flags.push('d');
    }

    let uploading_to = peer.peer_interested && !peer.peer_choked;
    if uploading_to {
        flags.push('U');
    } else if peer.peer_interested {
        flags.push('u');
    }

    if !peer.client_choked && !peer.client_interested {
        flags.push('K');
    }
    if !peer.peer_choked && !peer.peer_interested {
        flags.push('?');
    }
    if peer.io.is_encrypted() {
        flags.push('E');
    }
    if from_pex {
        flags.push('X');
    }
    if peer.io.is_incoming() {
        flags.push('I');
    }

    flags
}
