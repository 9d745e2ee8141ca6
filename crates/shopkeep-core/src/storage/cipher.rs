//! Passphrase-based sealing for the encrypted session file.
//!
//! Layout: `MAGIC | salt (16) | nonce (12) | ciphertext`. The key is derived
//! from the passphrase and the per-file salt with Argon2id, so every write
//! uses a fresh salt and nonce.

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

use super::{Result, StorageError};

const MAGIC: &[u8; 4] = b"SKS1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Cipher(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

pub fn seal(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| StorageError::Cipher("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open(passphrase: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < HEADER_LEN || sealed[..MAGIC.len()] != MAGIC[..] {
        return Err(StorageError::Cipher("not a sealed session file".to_string()));
    }
    let (salt, rest) = sealed[MAGIC.len()..].split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::Cipher("wrong passphrase or tampered file".to_string()))
}
