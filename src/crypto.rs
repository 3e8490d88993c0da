//! At-rest protection of the mapping.
//!
//! - PBKDF2-HMAC-SHA256 turns a password into a 256-bit key,
//! - AES-256-GCM seals the serialized mapping (authenticated encryption),
//! - the sealed bytes `nonce(12) || ciphertext || tag(16)` are base64 armored.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Fixed salt shared by every mapping, so the same password always opens it.
pub const KDF_SALT: [u8; 16] = [
    0xd0, 0xe1, 0x03, 0xc2, 0x5a, 0x3c, 0x52, 0xaf, 0x5d, 0xfe, 0xd5, 0xbf, 0xf8, 0x75, 0x7c, 0x8f,
];
pub const KDF_ROUNDS: u32 = 100_000;

/// Derives the mapping key from a password.
pub fn derive_key(password: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &KDF_SALT, KDF_ROUNDS, &mut key);
    key
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
}

/// Encrypts `plaintext` and returns the base64 armored envelope.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

/// Decodes and decrypts an envelope produced by [`seal`]. Fails on a wrong
/// key or on any tampering with the ciphertext.
pub fn open(key: &[u8], armored: &str) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    let sealed = STANDARD
        .decode(armored.trim())
        .map_err(|e| CryptoError::Armor(e.to_string()))?;
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Armor(format!(
            "envelope of {} bytes is too short",
            sealed.len()
        )));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let key = [7u8; KEY_SIZE];
        let armored = seal(&key, b"schema and mappings").unwrap();
        assert_eq!(open(&key, &armored).unwrap(), b"schema and mappings");
    }

    #[test]
    fn wrong_key_fails() {
        let armored = seal(&[1u8; KEY_SIZE], b"secret").unwrap();
        assert_eq!(
            open(&[2u8; KEY_SIZE], &armored),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn tampered_envelope_fails() {
        let key = [3u8; KEY_SIZE];
        let mut sealed = STANDARD.decode(seal(&key, b"secret").unwrap()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert_eq!(
            open(&key, &STANDARD.encode(sealed)),
            Err(CryptoError::DecryptionFailed)
        );
        assert!(matches!(open(&key, "%%%"), Err(CryptoError::Armor(_))));
    }

    #[test]
    fn key_length_is_checked() {
        assert_eq!(
            seal(&[0u8; 16], b"x"),
            Err(CryptoError::InvalidKeyLength(16))
        );
    }

    #[test]
    fn password_derivation_is_deterministic() {
        assert_eq!(derive_key("hunter2"), derive_key("hunter2"));
        assert_ne!(derive_key("hunter2"), derive_key("hunter3"));
    }
}
