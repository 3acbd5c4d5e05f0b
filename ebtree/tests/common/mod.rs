use rand::{Rng, SeedableRng};
use rand_pcg::Lcg64Xsh32;

/// Deterministic generator so failures reproduce.
pub fn rng(seed: u64) -> Lcg64Xsh32 {
    Lcg64Xsh32::seed_from_u64(seed)
}

/// Random scalar keys drawn from `0..span`; a small span makes duplicates
/// likely.
#[allow(dead_code)]
pub fn scalar_keys(rng: &mut impl Rng, count: usize, span: u32) -> Vec<u32> {
    (0..count).map(|_| rng.gen_range(0..span)).collect()
}

/// Random byte-string keys of `len` bytes over the first `alphabet` letters.
#[allow(dead_code)]
pub fn byte_keys(rng: &mut impl Rng, count: usize, len: usize, alphabet: u8) -> Vec<Vec<u8>> {
    (0..count)
        .map(|_| (0..len).map(|_| b'a' + rng.gen_range(0..alphabet)).collect())
        .collect()
}
