//! Handshake-completion glue (§4.5). Resolves the outcome of the external
//! handshake state machine (construct/abort/done-callback, out of scope)
//! into atom and peer updates, applying the refuse/ban/cap rules for
//! turning a completed handshake into a live peer.

use std::net::SocketAddr;
use std::time::Instant;

use crate::atom::{AtomPool, From as AtomFrom};
use crate::peer::{MessageSink, Peer, PeerIo};

/// What the (out-of-scope) handshake layer reported.
pub struct HandshakeResult {
    pub io: Box<dyn PeerIo>,
    pub sink: Box<dyn MessageSink>,
    pub is_connected: bool,
    pub peer_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// A new peer record was created at this address.
    Accepted,
    /// Failure, or the torrent isn't running: atom's `numFails` was bumped.
    Failed,
    /// Atom is banned; connection refused.
    Banned,
    /// Torrent is already at its live-peer cap.
    AtCapacity,
    /// A peer record already exists for this address.
    Duplicate,
}

/// Resolves a completed handshake attempt into the torrent's atom pool and
/// peer set. `num_pieces` sizes the new peer's bitfields.
#[allow(clippy::too_many_arguments)]
pub fn resolve_handshake(
    result: HandshakeResult,
    torrent_running: bool,
    pool: &mut AtomPool,
    peers: &mut std::collections::BTreeMap<SocketAddr, Peer>,
    max_peers: usize,
    num_pieces: usize,
    now: Instant,
) -> HandshakeOutcome {
    let address = result.io.address();
    let ip = match address.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => {
            return HandshakeOutcome::Failed;
        }
    };

    if !result.is_connected || !torrent_running {
        if let Some(atom) = pool.get_mut(ip) {
            atom.num_fails = atom.num_fails.saturating_add(1);
        }
        return HandshakeOutcome::Failed;
    }

    let atom = pool.ensure_exists(ip, address.port(), 0, AtomFrom::Incoming, now);
    if atom.is_banned() {
        return HandshakeOutcome::Banned;
    }
    if peers.len() >= max_peers {
        return HandshakeOutcome::AtCapacity;
    }
    if peers.contains_key(&address) {
        return HandshakeOutcome::Duplicate;
    }

    let peer = Peer::new(address, address.port(), result.peer_id, result.io, result.sink, num_pieces);
    peers.insert(address, peer);

    let atom = pool.get_mut(ip).expect("atom just ensured to exist");
    atom.time = now;

    HandshakeOutcome::Accepted
}
