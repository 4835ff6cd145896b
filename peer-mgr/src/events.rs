//! Message-layer event handler (§4.6). One of these runs per torrent,
//! invoked by every connected peer's message layer: dispatches each event
//! to the right atom/peer/requested-bitfield update and handles blame
//! strikes.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::atom::AtomPool;
use crate::bitfield::BitfieldExt;
use crate::block::BlockRequest;
use crate::peer::Peer;

/// Events the wire-protocol message layer reports per peer.
pub enum Event {
    NeedReq,
    Cancel(BlockRequest),
    PieceData,
    ClientHave(usize),
    PeerProgress(f32),
    ClientBlock(BlockRequest),
    ErrorIo,
    ErrorAssert,
}

/// Follow-up work the torrent orchestration layer above this crate must
/// perform; everything purely internal to the peer manager is already
/// applied by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RecheckCompleteness,
    StopTorrent,
}

/// Dispatches one event from `address`'s peer. Returns `None` when nothing
/// beyond internal bookkeeping is required.
pub fn handle_event(
    event: Event,
    address: SocketAddr,
    peers: &mut BTreeMap<SocketAddr, Peer>,
    pool: &mut AtomPool,
    requested: &mut crate::bitfield::Bitfield,
    refill_armed: &mut bool,
    meta: &crate::meta::TorrentMeta,
    max_bad_pieces_per_peer: u8,
    now: Instant,
) -> Option<Action> {
    let ip = match address.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => return None,
    };

    match event {
        Event::NeedReq => {
            if !*refill_armed {
                *refill_armed = true;
            }
            None
        }
        Event::Cancel(block) => {
            requested.remove(block.block_idx(meta));
            None
        }
        Event::PieceData => {
            if let Some(atom) = pool.get_mut(ip) {
                atom.piece_data_time = Some(now);
            }
            if let Some(peer) = peers.get_mut(&address) {
                peer.last_piece_data = Some(now);
            }
            None
        }
        Event::ClientHave(piece_idx) => {
            for peer in peers.values_mut() {
                peer.sink.have(piece_idx);
            }
            Some(Action::RecheckCompleteness)
        }
        Event::PeerProgress(progress) => {
            if let Some(peer) = peers.get_mut(&address) {
                peer.progress = progress;
            }
            if let Some(atom) = pool.get_mut(ip) {
                atom.set_seed(progress >= 1.0);
            }
            None
        }
        Event::ClientBlock(block) => {
            for peer in peers.values_mut() {
                peer.sink.cancel(block);
            }
            None
        }
        Event::ErrorIo => Some(Action::StopTorrent),
        Event::ErrorAssert => {
            strike(address, peers, pool, max_bad_pieces_per_peer);
            None
        }
    }
}

/// Adds a strike to the peer at `address`, banning its atom and marking it
/// for purge once the threshold is reached.
fn strike(address: SocketAddr, peers: &mut BTreeMap<SocketAddr, Peer>, pool: &mut AtomPool, max_bad_pieces_per_peer: u8) {
    let Some(peer) = peers.get_mut(&address) else { return };
    peer.strikes = peer.strikes.saturating_add(1);
    if peer.strikes >= max_bad_pieces_per_peer {
        peer.do_purge = true;
        if let std::net::IpAddr::V4(ip) = address.ip() {
            if let Some(atom) = pool.get_mut(ip) {
                atom.ban();
            }
        }
    }
}

/// A piece failed hash verification: every peer whose blame-bitfield
/// contains it takes a strike.
pub fn set_blame(
    piece_idx: usize,
    success: bool,
    peers: &mut BTreeMap<SocketAddr, Peer>,
    pool: &mut AtomPool,
    max_bad_pieces_per_peer: u8,
) {
    if success {
        return;
    }
    let implicated: Vec<SocketAddr> =
        peers.iter().filter(|(_, p)| p.blame.test(piece_idx)).map(|(addr, _)| *addr).collect();
    for addr in implicated {
        strike(addr, peers, pool, max_bad_pieces_per_peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::From as AtomFrom;
    use crate::meta::TorrentMeta;
    use crate::peer::{MessageSink, PeerIo, RequestOutcome};
    use std::net::Ipv4Addr;
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

    struct NullSink;
    impl MessageSink for NullSink {
        fn set_choke(&mut self, _choked: bool) {}
        fn add_request(&mut self, _request: BlockRequest) -> RequestOutcome {
            RequestOutcome::Ok
        }
        fn have(&mut self, _piece_idx: usize) {}
        fn cancel(&mut self, _request: BlockRequest) {}
    }

    fn addr() -> SocketAddr {
        SocketAddr::new(Ipv4Addr::new(9, 9, 9, 9).into(), 1)
    }

    fn setup() -> (BTreeMap<SocketAddr, Peer>, AtomPool) {
        let mut peers = BTreeMap::new();
        let a = addr();
        peers.insert(
            a,
            Peer::new(a, 1, "peer".into(), Box::new(FakeIo(a)), Box::new(NullSink), 4),
        );
        let mut pool = AtomPool::new();
        pool.ensure_exists(Ipv4Addr::new(9, 9, 9, 9), 1, 0, AtomFrom::Tracker, Instant::now());
        (peers, pool)
    }

    #[test]
    fn three_blame_strikes_bans_and_purges() {
        let (mut peers, mut pool) = setup();
        peers.get_mut(&addr()).unwrap().blame.add(2);

        for _ in 0..3 {
            set_blame(2, false, &mut peers, &mut pool, 3);
        }

        assert!(peers[&addr()].do_purge);
        assert!(pool.get(Ipv4Addr::new(9, 9, 9, 9)).unwrap().is_banned());
    }

    #[test]
    fn cancel_clears_requested_bit() {
        let (mut peers, mut pool) = setup();
        let meta = TorrentMeta::new(4, crate::block::BLOCK_SIZE, crate::block::BLOCK_SIZE);
        let mut requested = crate::bitfield::Bitfield::new_zeroed(meta.total_blocks());
        requested.add(0);
        let mut armed = false;

        let block = BlockRequest { piece_idx: 0, offset: 0, len: crate::block::BLOCK_SIZE };
        handle_event(
            Event::Cancel(block),
            addr(),
            &mut peers,
            &mut pool,
            &mut requested,
            &mut armed,
            &meta,
            3,
            Instant::now(),
        );
        assert!(!requested.test(0));
    }

    #[test]
    fn peer_progress_toggles_seed_flag() {
        let (mut peers, mut pool) = setup();
        let meta = TorrentMeta::new(1, crate::block::BLOCK_SIZE, crate::block::BLOCK_SIZE);
        let mut requested = crate::bitfield::Bitfield::new_zeroed(meta.total_blocks());
        let mut armed = false;

        handle_event(
            Event::PeerProgress(1.0),
            addr(),
            &mut peers,
            &mut pool,
            &mut requested,
            &mut armed,
            &meta,
            3,
            Instant::now(),
        );
        assert!(pool.get(Ipv4Addr::new(9, 9, 9, 9)).unwrap().is_seed());

        handle_event(
            Event::PeerProgress(0.5),
            addr(),
            &mut peers,
            &mut pool,
            &mut requested,
            &mut armed,
            &meta,
            3,
            Instant::now(),
        );
        assert!(!pool.get(Ipv4Addr::new(9, 9, 9, 9)).unwrap().is_seed());
    }
}
