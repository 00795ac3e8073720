//! Symmetric primitives used by the local crypto service.
//!
//! XChaCha20-Poly1305 with a random 24-byte nonce prepended to the
//! ciphertext, and BLAKE3 key derivation with domain separation.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::CryptoError;

pub const NONCE_SIZE: usize = 24;

pub const KDF_CONTEXT_PAIRWISE: &str = "strata 2024-06 pairwise channel key";

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Derive the key of a pairwise channel from the concatenated
/// Diffie-Hellman outputs.
pub fn derive_pairwise_key(shared_secrets: &[&[u8]]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_PAIRWISE);
    for secret in shared_secrets {
        hasher.update(secret);
    }
    *hasher.finalize().as_bytes()
}
