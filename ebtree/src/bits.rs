//! Bit-level comparison helpers for byte-string keys.
//!
//! Bit positions are MSB-first: position 0 is the top bit of byte 0, matching
//! lexicographic order over unsigned bytes.

use bitvec::prelude::*;
use core::cmp::Ordering;

/// Value of bit `pos` of `key`.
pub(crate) fn bit_at(key: &[u8], pos: usize) -> bool {
    key.view_bits::<Msb0>()[pos]
}

/// Count of leading bits equal between `a` and `b`, assuming the first
/// `known` bits are already known equal and never counting past `max`.
///
/// Returns a value in `known..=max`.
pub(crate) fn equal_bits(a: &[u8], b: &[u8], known: usize, max: usize) -> usize {
    let a = a.view_bits::<Msb0>();
    let b = b.view_bits::<Msb0>();
    let max = max.min(a.len()).min(b.len());
    if known >= max {
        return max;
    }
    known
        + a[known..max]
            .iter()
            .zip(b[known..max].iter())
            .take_while(|(x, y)| x == y)
            .count()
}

/// Order `a` against `b` by the single bit at `pos`, given that they are
/// equal on every bit before it. A position at or past the end of the keys
/// means the keys are wholly equal.
pub(crate) fn cmp_bit(a: &[u8], b: &[u8], pos: usize) -> Ordering {
    let a = a.view_bits::<Msb0>();
    let b = b.view_bits::<Msb0>();
    if pos >= a.len() || pos >= b.len() {
        return Ordering::Equal;
    }
    a[pos].cmp(&b[pos])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_at_is_msb_first() {
        let key = [0b1000_0000u8, 0b0000_0001];
        assert!(bit_at(&key, 0));
        assert!(!bit_at(&key, 1));
        assert!(!bit_at(&key, 14));
        assert!(bit_at(&key, 15));
    }

    #[test]
    fn equal_bits_counts_shared_prefix() {
        let a = *b"apple\0";
        let b = *b"apply\0";
        // 'e' = 0x65, 'y' = 0x79: they share the first 3 bits of byte 4.
        assert_eq!(equal_bits(&a, &b, 0, 48), 35);
        // Starting from a known-equal prefix gives the same answer.
        assert_eq!(equal_bits(&a, &b, 32, 48), 35);
        // The count is capped by `max`.
        assert_eq!(equal_bits(&a, &b, 0, 16), 16);
    }

    #[test]
    fn equal_bits_of_identical_keys_is_max() {
        let a = *b"band\0\0";
        assert_eq!(equal_bits(&a, &a, 0, 48), 48);
        assert_eq!(equal_bits(&a, &a, 48, 48), 48);
    }

    #[test]
    fn cmp_bit_orders_by_single_bit() {
        let a = *b"banana";
        let b = *b"band\0\0";
        let shared = equal_bits(&a, &b, 0, 48);
        assert_eq!(shared, 29);
        assert_eq!(cmp_bit(&a, &b, shared), Ordering::Less);
        assert_eq!(cmp_bit(&b, &a, shared), Ordering::Greater);
        assert_eq!(cmp_bit(&a, &a, 48), Ordering::Equal);
    }
}
