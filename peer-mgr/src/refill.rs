//! Request refill pulse (§4.2): piece ranking, six-bin block sorting, and
//! rotated round-robin dispatch of block requests to connected peers.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

use rand::Rng;

use crate::bitfield::{Bitfield, BitfieldExt};
use crate::block::BlockRequest;
use crate::meta::TorrentMeta;
use crate::peer::{Peer, RequestOutcome};

/// Pieces not yet fully owned and not marked do-not-download, ordered by
/// (missing-block count asc, priority desc, rarity asc, random tie-break).
pub(crate) fn rank_pieces<R: Rng>(
    meta: &TorrentMeta,
    owned: &Bitfield,
    peers: &BTreeMap<SocketAddr, Peer>,
    rng: &mut R,
) -> Vec<usize> {
    let mut candidates: Vec<(usize, usize, i8, usize, u16)> = Vec::new();

    for idx in 0..meta.num_pieces as usize {
        if meta.is_do_not_download(idx) {
            continue;
        }
        let missing = missing_block_count(meta, owned, idx);
        if missing == 0 {
            continue;
        }
        let rarity = peers
            .values()
            .filter(|p| p.is_downloading_from() && p.have.test(idx))
            .count();
        let tie_break: u16 = rng.gen();
        candidates.push((idx, missing, -meta.priority(idx).ordinal(), rarity, tie_break));
    }

    candidates.sort_by(|a, b| (a.1, a.2, a.3, a.4).cmp(&(b.1, b.2, b.3, b.4)));
    candidates.into_iter().map(|c| c.0).collect()
}

fn missing_block_count(meta: &TorrentMeta, owned: &Bitfield, piece_idx: usize) -> usize {
    (0..meta.num_blocks_in_piece(piece_idx) as usize)
        .filter(|&b| !owned.test(meta.block_idx(piece_idx, b)))
        .count()
}

/// Buckets every still-missing block of the ranked pieces into the six bins
/// `(requested?, priority)`, in emission order: unrequested-high, -normal,
/// -low, then requested-high, -normal, -low.
fn binned_blocks(meta: &TorrentMeta, owned: &Bitfield, requested: &Bitfield, order: &[usize]) -> Vec<BlockRequest> {
    let mut bins: [Vec<BlockRequest>; 6] = Default::default();

    for &piece_idx in order {
        let priority = meta.priority(piece_idx);
        for block_idx in 0..meta.num_blocks_in_piece(piece_idx) as usize {
            let global = meta.block_idx(piece_idx, block_idx);
            if owned.test(global) {
                continue;
            }
            let is_requested = requested.test(global);
            let bin = (is_requested as usize) * 3 + (2 - priority.bin());
            bins[bin].push(BlockRequest {
                piece_idx,
                offset: block_idx * crate::block::BLOCK_SIZE,
                len: meta.block_len(piece_idx, block_idx),
            });
        }
    }

    bins.into_iter().flatten().collect()
}

/// Runs one refill pulse: ranks pieces, bins blocks, and dispatches them
/// round-robin to the peers we're actively downloading from. Returns the
/// number of blocks newly marked in `requested`.
pub fn run_refill<R: Rng>(
    meta: &TorrentMeta,
    owned: &Bitfield,
    requested: &mut Bitfield,
    peers: &mut BTreeMap<SocketAddr, Peer>,
    rng: &mut R,
) -> usize {
    let order = rank_pieces(meta, owned, peers, rng);
    let blocks = binned_blocks(meta, owned, requested, &order);

    let mut active: Vec<SocketAddr> = peers
        .iter()
        .filter(|(_, p)| p.is_downloading_from())
        .map(|(addr, _)| *addr)
        .collect();
    if active.is_empty() || blocks.is_empty() {
        return 0;
    }
    let offset = rng.gen_range(0..active.len());
    active.rotate_left(offset);
    let mut rotation: VecDeque<SocketAddr> = active.into_iter().collect();

    let mut dispatched = 0;

    for block in blocks {
        if rotation.is_empty() {
            break;
        }
        let attempts = rotation.len();
        let mut placed = false;
        for _ in 0..attempts {
            let Some(addr) = rotation.pop_front() else { break };
            let Some(peer) = peers.get_mut(&addr) else { continue };
            match peer.sink.add_request(block) {
                RequestOutcome::Ok => {
                    requested.add(block.block_idx(meta));
                    rotation.push_back(addr);
                    dispatched += 1;
                    placed = true;
                    break;
                }
                RequestOutcome::Duplicate | RequestOutcome::Missing => {
                    rotation.push_back(addr);
                }
                RequestOutcome::ClientChoked | RequestOutcome::Full => {
                    // dropped from rotation
                }
            }
        }
        if !placed && rotation.is_empty() {
            break;
        }
    }

    dispatched
}
