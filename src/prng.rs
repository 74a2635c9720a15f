//! Seeded tie-break stream for decimal rounding overshoot.
//!
//! Outputs are BLAKE2b-256 expansions of a seed and an invocation counter.
//! Each tie-break builds a fresh generator from the block time, a domain tag,
//! and the item being adjusted, so the result does not depend on how many
//! draws happened earlier in the block.

use blake2::digest::{consts::U32, Digest};

type Blake2b256 = blake2::Blake2b<U32>;

const PRNG_DOMAIN: &[u8] = b"STAKEHOUSE_PRNG";

/// Domain tag for the validator score tie-break.
pub const VALIDATOR_SCORE_DOMAIN: &[u8] = b"validator-score";
/// Domain tag for the delegator weight tie-break.
pub const DELEGATOR_WEIGHT_DOMAIN: &[u8] = b"delegator-weight";

/// A deterministic stream generator derived from BLAKE2b-256.
#[derive(Debug, Clone)]
pub struct SimplePrng {
    seed: [u8; 32],
    counter: u64,
    buffer: [u8; 32],
    offset: usize,
}

impl SimplePrng {
    /// Creates a generator bound to one tie-break site.
    ///
    /// `block_time` is the chain time in unix milliseconds, `domain` names the
    /// call site and `context` identifies what is being adjusted.
    pub fn for_tie_break(block_time: u64, domain: &[u8], context: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(PRNG_DOMAIN);
        hasher.update(block_time.to_be_bytes());
        hasher.update((domain.len() as u64).to_be_bytes());
        hasher.update(domain);
        hasher.update((context.len() as u64).to_be_bytes());
        hasher.update(context);
        Self::from_seed_bytes(hasher.finalize().into())
    }

    /// Creates a PRNG from a raw 32-byte seed.
    pub fn from_seed_bytes(seed: [u8; 32]) -> Self {
        Self {
            seed,
            counter: 0,
            buffer: [0u8; 32],
            offset: 32,
        }
    }

    fn refill(&mut self) {
        let mut hasher = Blake2b256::new();
        hasher.update(PRNG_DOMAIN);
        hasher.update(self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.buffer.copy_from_slice(&hasher.finalize());
        self.counter = self.counter.wrapping_add(1);
        self.offset = 0;
    }

    /// Advances the generator and returns the next 64-bit pseudorandom number.
    pub fn next_u64(&mut self) -> u64 {
        if self.offset >= self.buffer.len() {
            self.refill();
        }
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&self.buffer[self.offset..self.offset + 8]);
        self.offset += 8;
        u64::from_be_bytes(chunk)
    }

    /// Returns an index in `0..len`, or `None` when `len` is zero.
    pub fn gen_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some((self.next_u64() % len as u64) as usize)
    }
}
