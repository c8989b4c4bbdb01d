//! Identifier helpers driven by the step's injected RNG.

use rand::{Rng, RngCore};

const HEX: &[u8; 16] = b"0123456789abcdef";

/// `len` lowercase hex characters drawn from `rng`.
pub fn hex_token(rng: &mut dyn RngCore, len: usize) -> String {
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

/// `"{prefix}_{hex}"`, e.g. `txn_3fa9c01b2e4d`.
pub fn prefixed(prefix: &str, rng: &mut dyn RngCore, len: usize) -> String {
    format!("{prefix}_{}", hex_token(rng, len))
}
