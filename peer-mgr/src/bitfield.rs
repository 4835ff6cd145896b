//! Fixed-size bit array over owned/missing/requested piece and block state.
//!
//! Byte layout is MSB-first (bit `n` lives in byte `n / 8`), matching the
//! wire bitfield message, so a [`Bitfield`] can be handed straight to the
//! message layer without re-packing.

pub type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

pub trait BitfieldExt {
    fn new_zeroed(bits: usize) -> Self;
    fn add(&mut self, idx: usize);
    fn remove(&mut self, idx: usize);
    fn test(&self, idx: usize) -> bool;
    fn add_range(&mut self, range: std::ops::Range<usize>);
    fn remove_range(&mut self, range: std::ops::Range<usize>);
    fn popcount(&self) -> usize;
    fn union_into(&self, other: &mut Self);
    fn difference_into(&self, other: &mut Self);
    fn dup(&self) -> Self;
    fn clear_all(&mut self);
}

impl BitfieldExt for Bitfield {
    fn new_zeroed(bits: usize) -> Self {
        Bitfield::repeat(false, bits)
    }

    fn add(&mut self, idx: usize) {
        self.set(idx, true);
    }

    fn remove(&mut self, idx: usize) {
        self.set(idx, false);
    }

    fn test(&self, idx: usize) -> bool {
        self[idx]
    }

    fn add_range(&mut self, range: std::ops::Range<usize>) {
        for i in range {
            self.set(i, true);
        }
    }

    fn remove_range(&mut self, range: std::ops::Range<usize>) {
        for i in range {
            self.set(i, false);
        }
    }

    fn popcount(&self) -> usize {
        self.count_ones()
    }

    // `other |= self`
    fn union_into(&self, other: &mut Self) {
        debug_assert_eq!(self.len(), other.len());
        *other |= self.clone();
    }

    // `other &= !self`, i.e. clear from `other` every bit set in `self`.
    fn difference_into(&self, other: &mut Self) {
        debug_assert_eq!(self.len(), other.len());
        let mut negated = self.clone();
        negated = !negated;
        *other &= negated;
    }

    fn dup(&self) -> Self {
        self.clone()
    }

    fn clear_all(&mut self) {
        self.fill(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_length_rounds_up() {
        let bf = Bitfield::new_zeroed(13);
        assert_eq!(bf.as_raw_slice().len(), 2);
    }

    #[test]
    fn msb_first_layout() {
        let mut bf = Bitfield::new_zeroed(8);
        bf.add(0);
        assert_eq!(bf.as_raw_slice()[0], 0b1000_0000);
    }

    #[test]
    fn add_remove_test() {
        let mut bf = Bitfield::new_zeroed(4);
        bf.add(2);
        assert!(bf.test(2));
        assert!(!bf.test(1));
        bf.remove(2);
        assert!(!bf.test(2));
    }

    #[test]
    fn range_ops() {
        let mut bf = Bitfield::new_zeroed(10);
        bf.add_range(2..5);
        assert_eq!(bf.popcount(), 3);
        bf.remove_range(3..5);
        assert_eq!(bf.popcount(), 1);
        assert!(bf.test(2));
    }

    #[test]
    fn union_and_difference() {
        let mut a = Bitfield::new_zeroed(4);
        a.add(0);
        a.add(1);
        let mut b = Bitfield::new_zeroed(4);
        b.add(1);
        b.add(2);

        let mut union_target = a.clone();
        b.union_into(&mut union_target);
        assert_eq!(union_target.popcount(), 3);

        let mut diff_target = a.clone();
        b.difference_into(&mut diff_target);
        assert_eq!(diff_target.popcount(), 1);
        assert!(diff_target.test(0));
    }

    #[test]
    fn dup_and_clear() {
        let mut bf = Bitfield::new_zeroed(4);
        bf.add(1);
        let dup = bf.dup();
        assert_eq!(dup, bf);
        bf.clear_all();
        assert_eq!(bf.len(), 4);
        assert_eq!(bf.popcount(), 0);
    }
}
