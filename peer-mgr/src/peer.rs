//! Live-connection peer record (§3 "Peer"): owned I/O and message-sink
//! handles, have/blame bitfields, choke/interest bits, and strike count.

use std::net::SocketAddr;
use std::time::Instant;

use crate::bitfield::Bitfield;
use crate::block::BlockRequest;

/// The external wire-protocol message pump (§1: out of scope). The manager
/// only ever drives it through this narrow interface.
pub trait MessageSink: Send {
    fn set_choke(&mut self, choked: bool);
    fn add_request(&mut self, request: BlockRequest) -> RequestOutcome;
    fn have(&mut self, piece_idx: usize);
    fn cancel(&mut self, request: BlockRequest);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Ok,
    Duplicate,
    /// Peer doesn't have the piece.
    Missing,
    ClientChoked,
    Full,
}

/// The external peer I/O object (§1: out of scope). Exposes just enough for
/// the reconnect/rechoke pulses to classify a connection.
pub trait PeerIo: Send {
    fn address(&self) -> SocketAddr;
    fn age(&self) -> std::time::Duration;
    fn is_encrypted(&self) -> bool;
    fn is_incoming(&self) -> bool;
}

/// A live-connection record. Exists only while we hold an I/O object for
/// the peer. Invariant (enforced by `Torrent`): for every live `Peer` there
/// is a corresponding `PeerAtom` in the owning torrent's pool.
pub struct Peer {
    pub address: SocketAddr,
    pub port: u16,
    pub client_id: String,

    pub io: Box<dyn PeerIo>,
    pub sink: Box<dyn MessageSink>,

    /// Pieces this peer claims to have.
    pub have: Bitfield,

    /// Pieces this peer contributed blocks towards, for post-hoc blame
    /// attribution when a piece fails verification.
    pub blame: Bitfield,

    pub strikes: u8,

    pub rate_to_peer: u32,
    pub rate_to_client: u32,

    pub peer_choked: bool,
    pub peer_interested: bool,
    pub client_choked: bool,
    pub client_interested: bool,

    pub progress: f32,

    pub encryption_preferred: bool,

    pub last_piece_data: Option<Instant>,

    /// Set when this peer should be torn down on the next reconnect pulse.
    pub do_purge: bool,
}

impl Peer {
    pub fn new(
        address: SocketAddr,
        port: u16,
        client_id: String,
        io: Box<dyn PeerIo>,
        sink: Box<dyn MessageSink>,
        num_pieces: usize,
    ) -> Self {
        Self {
            address,
            port,
            client_id,
            io,
            sink,
            have: Bitfield::repeat(false, num_pieces),
            blame: Bitfield::repeat(false, num_pieces),
            strikes: 0,
            rate_to_peer: 0,
            rate_to_client: 0,
            // Connections begin life neutrally choked/uninterested; the
            // next rechoke pulse decides their fate.
            peer_choked: true,
            peer_interested: false,
            client_choked: true,
            client_interested: false,
            progress: 0.0,
            encryption_preferred: false,
            last_piece_data: None,
            do_purge: false,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.progress >= 1.0
    }

    pub fn is_downloading_from(&self) -> bool {
        self.client_interested && !self.client_choked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;

    struct FakeIo(SocketAddr);
    impl PeerIo for FakeIo {
        fn address(&self) -> SocketAddr {
            self.0
        }
        fn age(&self) -> Duration {
            Duration::ZERO
        }
        fn is_encrypted(&self) -> bool {
            false
        }
        fn is_incoming(&self) -> bool {
            false
        }
    }

    struct FakeSink;
    impl MessageSink for FakeSink {
        fn set_choke(&mut self, _choked: bool) {}
        fn add_request(&mut self, _request: BlockRequest) -> RequestOutcome {
            RequestOutcome::Ok
        }
        fn have(&mut self, _piece_idx: usize) {}
        fn cancel(&mut self, _request: BlockRequest) {}
    }

    #[test]
    fn new_peer_starts_neutral() {
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let peer = Peer::new(
            addr,
            6881,
            "test".into(),
            Box::new(FakeIo(addr)),
            Box::new(FakeSink),
            4,
        );
        assert!(peer.peer_choked);
        assert!(!peer.peer_interested);
        assert!(peer.client_choked);
        assert!(!peer.client_interested);
        assert!(!peer.is_downloading_from());
    }
}
