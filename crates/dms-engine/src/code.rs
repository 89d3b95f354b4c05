//! Check-in code generation.
//!
//! Codes are convenience nonces against casual replay, not a security
//! boundary: a seedable PRNG is enough.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length used when the configuration does not override it.
pub const DEFAULT_CODE_LENGTH: usize = 16;

/// The 62-character alphabet every code is drawn from.
pub const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces uniformly random alphanumeric tokens.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    rng: StdRng,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl CodeGenerator {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A token of exactly `length` characters from [`ALPHABET`].
    pub fn generate(&mut self, length: usize) -> String {
        (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    /// Like [`generate`](Self::generate) but never returns `previous`.
    ///
    /// A redraw happens with probability `62^-length`. `length` must be at
    /// least 1; `SwitchConfig::validate` rejects shorter codes.
    pub fn generate_distinct(&mut self, length: usize, previous: Option<&str>) -> String {
        debug_assert!(length > 0, "zero-length codes cannot be distinct");
        loop {
            let code = self.generate(length);
            if previous != Some(code.as_str()) {
                return code;
            }
        }
    }
}
