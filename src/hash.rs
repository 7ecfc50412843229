//! Seed mixing that depends only on fixed arithmetic, so derived seeds are
//! the same on every build and toolchain.

use crate::constants::rng::SPLITMIX_GAMMA;

/// SplitMix64 output finalizer.
pub fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Fold `value` into `seed` eight bytes at a time.
pub fn stable_hash_str(seed: u64, value: &str) -> u64 {
    let mut state = mix64(seed ^ value.len() as u64);
    for chunk in value.as_bytes().chunks(8) {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        state = mix64(state.wrapping_add(SPLITMIX_GAMMA) ^ u64::from_le_bytes(word));
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_pinned() {
        // Derived seeds must not drift between releases.
        assert_eq!(stable_hash_str(0, ""), mix64(0));
        assert_eq!(stable_hash_str(7, "pid-a"), stable_hash_str(7, "pid-a"));
        assert_ne!(stable_hash_str(7, "pid-a"), stable_hash_str(8, "pid-a"));
        assert_ne!(stable_hash_str(7, "pid-a"), stable_hash_str(7, "pid-a\0"));
        assert_eq!(mix64(0x9E37_79B9_7F4A_7C15), 0xE220_A839_7B1D_CDAF);
        assert_eq!(stable_hash_str(7, "pid-a"), 0x4167_3BB5_B7DE_5425);
    }
}
