//! Low-level cryptographic operations.
//!
//! This module and `keys` are the only places in the crate that import `ring`
//! directly. Every envelope codec performs encryption, authentication and
//! password stretching exclusively through the functions exposed here; the
//! deprecated legacy format has its own cipher in `legacy`.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM
//! - **Integrity tag**: HMAC-SHA256 over `iv || ciphertext`, verified in
//!   constant time before any decryption
//! - **IV**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **Password KDF**: PBKDF2-HMAC-SHA256 with a 128-bit random salt
//! - **Key size**: 256 bits (32 bytes)

use std::num::NonZeroU32;

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{hmac, pbkdf2};

use crate::error::{Result, StrataError};

/// The AEAD algorithm used throughout strataseal.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the IV in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a master, derived or file key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of a password salt in bytes.
pub const SALT_LEN: usize = 16;

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| StrataError::RandomnessFailure)
}

/// Generate a fresh IV. There is no nonce caching or counter-based generation.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut buf = [0u8; NONCE_LEN];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a fresh password salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut buf = [0u8; SALT_LEN];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a cryptographically secure random key.
pub fn generate_random_key() -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    fill_random(&mut key)?;
    Ok(key)
}

fn aead_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| StrataError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key_bytes` and `nonce` with AES-256-GCM.
///
/// Returns the ciphertext with the GCM tag appended. The nonce is not
/// included; envelopes carry it in their own `iv` field.
pub fn encrypt(
    key_bytes: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let key = aead_key(key_bytes)?;
    let mut in_out = Vec::with_capacity(plaintext.len() + ALGORITHM.tag_len());
    in_out.extend_from_slice(plaintext);

    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(*nonce), Aad::empty(), &mut in_out)
        .map_err(|_| StrataError::EncryptionFailure)?;

    Ok(in_out)
}

/// Decrypt a ciphertext produced by [`encrypt`].
///
/// Any structural failure (wrong length, bad GCM tag) is a
/// [`StrataError::Decryption`]. The caller receives no partial plaintext.
pub fn decrypt(
    key_bytes: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < ALGORITHM.tag_len() {
        return Err(StrataError::Decryption);
    }

    let key = aead_key(key_bytes)?;
    let mut payload = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(Nonce::assume_unique_for_key(*nonce), Aad::empty(), &mut payload)
        .map_err(|_| StrataError::Decryption)?;

    Ok(plaintext.to_vec())
}

fn mac_input(nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(nonce.len() + ciphertext.len());
    data.extend_from_slice(nonce);
    data.extend_from_slice(ciphertext);
    data
}

/// Compute the HMAC-SHA256 tag binding `nonce` to `ciphertext`.
pub fn sign(mac_key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
    hmac::sign(&key, &mac_input(nonce, ciphertext))
        .as_ref()
        .to_vec()
}

/// Recompute the tag over `nonce || ciphertext` and compare it with `tag` in
/// constant time. The nonce is fixed-length, so the split between the two
/// parts is unambiguous.
pub fn verify(
    mac_key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<()> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
    hmac::verify(&key, &mac_input(nonce, ciphertext), tag).map_err(|_| StrataError::Integrity)
}

/// Stretch a password into a key with PBKDF2-HMAC-SHA256.
pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; KEY_LEN]> {
    let iterations = NonZeroU32::new(iterations).ok_or(StrataError::KeyDerivationFailure)?;
    let mut out = [0u8; KEY_LEN];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, password, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [7u8; KEY_LEN];
        let nonce = generate_nonce().unwrap();
        let ct = encrypt(&key, &nonce, b"payload").unwrap();
        assert_eq!(ct.len(), b"payload".len() + 16);
        assert_eq!(decrypt(&key, &nonce, &ct).unwrap(), b"payload");
    }

    #[test]
    fn test_decrypt_rejects_short_and_wrong_key() {
        let key = [7u8; KEY_LEN];
        let nonce = [0u8; NONCE_LEN];
        assert!(matches!(
            decrypt(&key, &nonce, &[1, 2, 3]),
            Err(StrataError::Decryption)
        ));

        let ct = encrypt(&key, &nonce, b"payload").unwrap();
        assert!(matches!(
            decrypt(&[8u8; KEY_LEN], &nonce, &ct),
            Err(StrataError::Decryption)
        ));
    }

    #[test]
    fn test_mac_binds_nonce() {
        let mac_key = [3u8; KEY_LEN];
        let tag = sign(&mac_key, &[1u8; NONCE_LEN], b"ct");
        assert!(verify(&mac_key, &[1u8; NONCE_LEN], b"ct", &tag).is_ok());
        assert!(matches!(
            verify(&mac_key, &[2u8; NONCE_LEN], b"ct", &tag),
            Err(StrataError::Integrity)
        ));
    }

    #[test]
    fn test_pbkdf2_rejects_zero_iterations() {
        assert!(pbkdf2_sha256(b"pw", b"salt", 0).is_err());
        let a = pbkdf2_sha256(b"pw", b"salt", 10).unwrap();
        let b = pbkdf2_sha256(b"pw", b"salt", 10).unwrap();
        assert_eq!(a, b);
    }
}
