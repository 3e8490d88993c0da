//! Runtime token derivation.
//!
//! A runtime token is stored as a compact `(seed, count)` pair. Its `count`
//! representations are recovered by encrypting `ceil(count / 2)` copies of the
//! seed (a big-endian 16-byte block) with AES in CBC mode, using the column
//! salt as IV, then cutting the ciphertext into 8-byte words shifted right by
//! one bit.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256, Block};
use rayon::prelude::*;

use crate::error::CryptoError;

pub const BLOCK_SIZE: usize = 16;
pub const TOKEN_SIZE: usize = 8;
pub const SALT_SIZE: usize = 16;
const TOKENS_PER_BLOCK: usize = BLOCK_SIZE / TOKEN_SIZE;

/// Width of the derived representations, after the final shift.
pub const TOKEN_BITS: u32 = 63;

enum BlockCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    fn encrypt(&self, block: &mut Block) {
        match self {
            Self::Aes128(cipher) => cipher.encrypt_block(block),
            Self::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }
}

/// Expands one runtime token into its `count` representations.
pub fn derive(
    seed: u64,
    count: u32,
    key: &[u8],
    salt: &[u8; SALT_SIZE],
) -> Result<Vec<u64>, CryptoError> {
    let cipher = BlockCipher::new(key)?;
    let count = count as usize;
    let nof_blocks = count.div_ceil(TOKENS_PER_BLOCK);

    let mut plaintext = [0u8; BLOCK_SIZE];
    plaintext[BLOCK_SIZE - 8..].copy_from_slice(&seed.to_be_bytes());

    let mut chain = *salt;
    let mut tokens = Vec::with_capacity(nof_blocks * TOKENS_PER_BLOCK);
    for _ in 0..nof_blocks {
        let mut block = Block::default();
        for (b, (p, c)) in block.iter_mut().zip(plaintext.iter().zip(chain.iter())) {
            *b = p ^ c;
        }
        cipher.encrypt(&mut block);
        chain.copy_from_slice(&block);

        for word in block.chunks_exact(TOKEN_SIZE) {
            let mut bytes = [0u8; TOKEN_SIZE];
            bytes.copy_from_slice(word);
            tokens.push(u64::from_be_bytes(bytes) >> 1);
        }
    }
    tokens.truncate(count);
    Ok(tokens)
}

/// Expands many runtime tokens of the same column, in parallel. The output
/// keeps the order of `seeds`.
pub fn derive_batch(
    seeds: &[(u64, u32)],
    key: &[u8],
    salt: &[u8; SALT_SIZE],
) -> Result<Vec<Vec<u64>>, CryptoError> {
    seeds
        .par_iter()
        .map(|&(seed, count)| derive(seed, count, key, salt))
        .collect()
}

/// Birthday estimate of seeing at least one collision among `n` tokens drawn
/// uniformly from `bits`-bit values.
pub fn collision_probability(n: usize, bits: u32) -> f64 {
    1.0 - (-(n as f64) / 2f64.powi(bits as i32)).exp()
}
