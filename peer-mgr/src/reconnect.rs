//! Reconnection pulse (§4.4): closure sweep of unhealthy live peers, then
//! candidate selection and promotion from the atom pool under a per-torrent
//! and global per-second budget.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::atom::{AtomPool, PeerAtom};
use crate::blocklist::Blocklist;
use crate::peer::Peer;

/// The external collaborator that opens the outgoing I/O for a promoted
/// candidate (§1: out of scope). Promotion only needs to know whether the
/// dial succeeded; the resulting connection's handshake is tracked
/// entirely by the caller's outgoing-handshake set.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> bool;
}

pub const MIN_UPLOAD_IDLE: Duration = Duration::from_secs(180);
pub const MAX_UPLOAD_IDLE: Duration = Duration::from_secs(600);
pub const MAX_RECONNECTIONS_PER_PULSE: usize = 1;
pub const MAX_CONNECTIONS_PER_SECOND: usize = 8;
const RECENT_PIECE_DATA: Duration = Duration::from_secs(30);
const MIN_COOLDOWN: Duration = Duration::from_secs(10 * 60);
const MAX_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Global, shared-across-torrents connection promotion budget. The only
/// state in this crate that needs a lock wider than one torrent's actor.
#[derive(Debug)]
pub struct RateBudget {
    capacity: usize,
    current_second: Option<Instant>,
    remaining: usize,
}

impl RateBudget {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONNECTIONS_PER_SECOND)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, current_second: None, remaining: capacity }
    }

    /// Resets the budget if the wall-clock second has rolled over, then
    /// consumes one slot if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        let rolled_over = match self.current_second {
            Some(start) => now.duration_since(start) >= Duration::from_secs(1),
            None => true,
        };
        if rolled_over {
            self.current_second = Some(now);
            self.remaining = self.capacity;
        }
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle-time limit for a peer sending us nothing, sliding linearly from
/// `min_upload_idle` at zero connections to `max_upload_idle` at or above
/// 90% of `max_peers`.
fn idle_limit(connected: usize, max_peers: usize, min_upload_idle: Duration, max_upload_idle: Duration) -> Duration {
    if max_peers == 0 {
        return min_upload_idle;
    }
    let relax_at = (max_peers * 9) / 10;
    if relax_at == 0 || connected >= relax_at {
        return max_upload_idle;
    }
    let frac = connected as f64 / relax_at as f64;
    let secs = min_upload_idle.as_secs_f64() + frac * (max_upload_idle.as_secs_f64() - min_upload_idle.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Closes every peer that should die this pulse: `doPurge`, mutual-seed
/// with stale PEX-disabled atom, or exceeding the idle limit. Updates each
/// closed peer's atom (`numFails` reset or bumped) before dropping it.
pub fn sweep_closures(
    peers: &mut std::collections::BTreeMap<SocketAddr, Peer>,
    pool: &mut AtomPool,
    we_are_seeding: bool,
    our_completion_is_superset_of_peer: impl Fn(&Peer) -> bool,
    pex_enabled: bool,
    max_peers: usize,
    min_upload_idle: Duration,
    max_upload_idle: Duration,
    now: Instant,
) {
    let connected = peers.len();
    let limit = idle_limit(connected, max_peers, min_upload_idle, max_upload_idle);

    let to_close: Vec<SocketAddr> = peers
        .iter()
        .filter(|(_, peer)| {
            if peer.do_purge {
                return true;
            }
            if we_are_seeding && our_completion_is_superset_of_peer(peer) {
                let atom_stale = pool
                    .get(match peer.address.ip() {
                        std::net::IpAddr::V4(v4) => v4,
                        _ => return false,
                    })
                    .map(|a| now.duration_since(a.time) >= Duration::from_secs(30))
                    .unwrap_or(true);
                if !pex_enabled || atom_stale {
                    return true;
                }
            }
            let idle_since = peer
                .last_piece_data
                .map(|t| now.duration_since(t))
                .unwrap_or_else(|| peer.io.age());
            idle_since > limit
        })
        .map(|(addr, _)| *addr)
        .collect();

    for addr in to_close {
        if let Some(peer) = peers.remove(&addr) {
            let ip = match addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                _ => continue,
            };
            if let Some(atom) = pool.get_mut(ip) {
                if peer.last_piece_data.is_some() {
                    atom.num_fails = 0;
                } else {
                    atom.num_fails = atom.num_fails.saturating_add(1);
                }
                atom.time = now;
            }
        }
    }
}

/// Whether an atom is eligible to be promoted to an outgoing handshake.
fn is_eligible(
    atom: &PeerAtom,
    in_use: bool,
    we_are_seeding: bool,
    blocklist: &dyn Blocklist,
    max_num_fails: u16,
    now: Instant,
) -> bool {
    if atom.is_banned() || atom.is_unreachable() || in_use {
        return false;
    }
    if we_are_seeding && atom.is_seed() {
        return false;
    }
    if atom.num_fails > max_num_fails {
        return false;
    }
    if blocklist.is_blocked(atom.addr) {
        return false;
    }
    let recent_piece_data = atom.piece_data_time.map(|t| now.duration_since(t) <= RECENT_PIECE_DATA).unwrap_or(false);
    if recent_piece_data {
        return true;
    }
    let cooldown = (MIN_COOLDOWN * atom.num_fails as u32).clamp(MIN_COOLDOWN, MAX_COOLDOWN);
    now.duration_since(atom.time) >= cooldown
}

/// Selects promotable candidates from the pool, descending by
/// `(pieceDataTime, -numFails, -time)`: peers who recently fed us bytes
/// first, then fewer failures, then least-recently tried.
pub fn select_candidates(
    pool: &AtomPool,
    in_use: impl Fn(Ipv4Addr) -> bool,
    we_are_seeding: bool,
    blocklist: &dyn Blocklist,
    max_num_fails: u16,
    now: Instant,
) -> Vec<Ipv4Addr> {
    let mut candidates: Vec<&PeerAtom> = pool
        .iter()
        .filter(|atom| is_eligible(atom, in_use(atom.addr), we_are_seeding, blocklist, max_num_fails, now))
        .collect();

    candidates.sort_by(|a, b| {
        b.piece_data_time
            .cmp(&a.piece_data_time)
            .then(a.num_fails.cmp(&b.num_fails))
            .then(b.time.cmp(&a.time))
    });

    candidates.into_iter().map(|a| a.addr).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::From as AtomFrom;
    use crate::blocklist::SetBlocklist;

    #[test]
    fn cooldown_rejects_then_accepts_after_wait() {
        let mut pool = AtomPool::new();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        let base = Instant::now();
        let atom = pool.ensure_exists(addr, 6881, 0, AtomFrom::Tracker, base);
        atom.num_fails = 2;
        atom.time = base; // will be compared against `now - 15min` / `now - 21min`

        let blocklist = SetBlocklist::new();

        let now_15min = base + Duration::from_secs(15 * 60);
        let candidates = select_candidates(&pool, |_| false, false, &blocklist, 3, now_15min);
        assert!(candidates.is_empty(), "required wait is 20min, 15min must be rejected");

        let now_21min = base + Duration::from_secs(21 * 60);
        let candidates = select_candidates(&pool, |_| false, false, &blocklist, 3, now_21min);
        assert_eq!(candidates, vec![addr]);
    }

    #[test]
    fn banned_and_in_use_atoms_are_excluded() {
        let mut pool = AtomPool::new();
        let now = Instant::now();
        let banned_addr = Ipv4Addr::new(10, 0, 0, 1);
        pool.ensure_exists(banned_addr, 1, 0, AtomFrom::Incoming, now - MAX_COOLDOWN).ban();
        let in_use_addr = Ipv4Addr::new(10, 0, 0, 2);
        pool.ensure_exists(in_use_addr, 1, 0, AtomFrom::Incoming, now - MAX_COOLDOWN);

        let blocklist = SetBlocklist::new();
        let candidates = select_candidates(&pool, |ip| ip == in_use_addr, false, &blocklist, 3, now);
        assert!(candidates.is_empty());
    }

    #[test]
    fn rate_budget_allows_eight_then_blocks_until_next_second() {
        let mut budget = RateBudget::new();
        let start = Instant::now();
        for _ in 0..8 {
            assert!(budget.try_consume(start));
        }
        assert!(!budget.try_consume(start));
        assert!(budget.try_consume(start + Duration::from_secs(1)));
    }

    #[test]
    fn idle_limit_slides_between_bounds() {
        assert_eq!(idle_limit(0, 100, MIN_UPLOAD_IDLE, MAX_UPLOAD_IDLE), MIN_UPLOAD_IDLE);
        assert_eq!(idle_limit(90, 100, MIN_UPLOAD_IDLE, MAX_UPLOAD_IDLE), MAX_UPLOAD_IDLE);
        let mid = idle_limit(45, 100, MIN_UPLOAD_IDLE, MAX_UPLOAD_IDLE);
        assert!(mid > MIN_UPLOAD_IDLE && mid < MAX_UPLOAD_IDLE);
    }
}
