//! Rechoke pulse (§4.3): rate-ranked tournament picking the regular
//! unchoke set plus one weighted-random optimistic slot.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::peer::Peer;

/// Substring identifying our own client implementation in a peer-id string,
/// used to weight the optimistic pool towards peers running the same code
/// (the "same" bonus in step 5 of the tournament).
pub const CLIENT_MARKER: &str = "-PM-";

const NEW_PEER_AGE: Duration = Duration::from_secs(45);

/// Runs one rechoke pulse over `peers`, calling `set_choke` on each peer's
/// sink and returning the address chosen for the optimistic slot, if any.
/// `we_are_seeding` is true once we own every piece of the torrent: it
/// switches the ranking rate from download to upload throughput.
pub fn run_rechoke<R: Rng>(
    peers: &mut BTreeMap<SocketAddr, Peer>,
    we_are_seeding: bool,
    max_unchoked_peers: usize,
    rng: &mut R,
) -> Option<SocketAddr> {
    let mut unchoke: BTreeMap<SocketAddr, bool> = BTreeMap::new();

    let mut ranked: Vec<(SocketAddr, u64)> = Vec::new();
    for (&addr, peer) in peers.iter() {
        if peer.is_seed() {
            unchoke.insert(addr, false);
            continue;
        }
        let rate = if we_are_seeding { peer.rate_to_peer } else { peer.rate_to_client };
        ranked.push((addr, u64::from(rate) * 10));
    }
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut unchoked_interested = 0usize;
    for (addr, _) in &ranked {
        if unchoked_interested >= max_unchoked_peers {
            unchoke.insert(*addr, false);
            continue;
        }
        let interested = peers[addr].peer_interested;
        unchoke.insert(*addr, true);
        if interested {
            unchoked_interested += 1;
        }
    }

    let optimistic = pick_optimistic(peers, &unchoke, rng);
    if let Some(addr) = optimistic {
        unchoke.insert(addr, true);
    }

    for (addr, peer) in peers.iter_mut() {
        if let Some(&should_unchoke) = unchoke.get(addr) {
            peer.peer_choked = !should_unchoke;
            peer.sink.set_choke(!should_unchoke);
        }
    }

    optimistic
}

fn pick_optimistic<R: Rng>(
    peers: &BTreeMap<SocketAddr, Peer>,
    unchoke: &BTreeMap<SocketAddr, bool>,
    rng: &mut R,
) -> Option<SocketAddr> {
    let mut pool: Vec<(SocketAddr, u32)> = Vec::new();
    for (&addr, peer) in peers.iter() {
        if unchoke.get(&addr).copied().unwrap_or(false) {
            continue;
        }
        let mut weight = 1u32;
        if peer.io.age() < NEW_PEER_AGE {
            weight *= 3;
        }
        if peer.client_id.contains(CLIENT_MARKER) {
            weight *= 3;
        }
        pool.push((addr, weight));
    }

    if pool.is_empty() {
        return None;
    }

    let total: u32 = pool.iter().map(|(_, w)| w).sum();
    let mut draw = rng.gen_range(0..total);
    for (addr, weight) in pool {
        if draw < weight {
            return Some(addr);
        }
        draw -= weight;
    }
    None
}
