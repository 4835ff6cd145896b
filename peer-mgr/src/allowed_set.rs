//! Deterministic allowed-set derivation for the BitTorrent fast extension
//! (§4.1). Grounded in the reference implementation's
//! `tr_peerMgrGenerateAllowedSet`: hash `(/24 of peer IP) || infohash`,
//! then repeatedly draw four-byte chunks of the running SHA-1 digest,
//! re-hashing the digest itself once a round is exhausted.

use sha1::{Digest, Sha1};
use std::net::Ipv4Addr;

use crate::bitfield::{Bitfield, BitfieldExt};

/// Returns a bitfield of size `sz` with (up to) `k` piece indices set,
/// deterministic in `(k, sz, infohash, ip & 0xFFFFFF00)`.
pub fn generate_allowed_set(k: u32, sz: u32, infohash: &[u8; 20], peer_ip: Ipv4Addr) -> Bitfield {
    let mut set = Bitfield::new_zeroed(sz as usize);
    if sz == 0 {
        return set;
    }
    let k = k.min(sz);

    let masked = u32::from(peer_ip) & 0xFFFF_FF00;
    let mut w = [0u8; 24];
    w[0..4].copy_from_slice(&masked.to_be_bytes());
    w[4..24].copy_from_slice(infohash);

    let mut x: [u8; 20] = Sha1::digest(w).into();
    let mut count = 0u32;

    while count < k {
        for i in 0..5 {
            if count >= k {
                break;
            }
            let chunk = &x[i * 4..i * 4 + 4];
            let y = u32::from_be_bytes(chunk.try_into().unwrap());
            let index = (y % sz) as usize;
            if !set.test(index) {
                set.add(index);
                count += 1;
            }
        }
        x = Sha1::digest(x).into();
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infohash() -> [u8; 20] {
        let mut h = [0u8; 20];
        for (i, b) in h.iter_mut().enumerate() {
            *b = i as u8;
        }
        h
    }

    #[test]
    fn cardinality_matches_min_k_sz() {
        let ip = Ipv4Addr::new(192, 168, 1, 50);
        let set = generate_allowed_set(9, 100, &infohash(), ip);
        assert_eq!(set.popcount(), 9);

        let small = generate_allowed_set(50, 10, &infohash(), ip);
        assert_eq!(small.popcount(), 10);
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let ip = Ipv4Addr::new(203, 0, 113, 7);
        let hash = infohash();
        let a = generate_allowed_set(9, 500, &hash, ip);
        let b = generate_allowed_set(9, 500, &hash, ip);
        assert_eq!(a, b);
    }

    #[test]
    fn only_depends_on_slash_24() {
        let hash = infohash();
        let a = generate_allowed_set(9, 500, &hash, Ipv4Addr::new(203, 0, 113, 1));
        let b = generate_allowed_set(9, 500, &hash, Ipv4Addr::new(203, 0, 113, 254));
        assert_eq!(a, b);
    }

    #[test]
    fn different_slash_24_usually_differs() {
        let hash = infohash();
        let a = generate_allowed_set(9, 500, &hash, Ipv4Addr::new(203, 0, 113, 1));
        let b = generate_allowed_set(9, 500, &hash, Ipv4Addr::new(198, 51, 100, 1));
        assert_ne!(a, b);
    }

    #[test]
    fn zero_size_torrent_yields_empty_set() {
        let set = generate_allowed_set(9, 0, &infohash(), Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(set.popcount(), 0);
    }
}
