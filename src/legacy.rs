//! The deprecated pre-envelope format.
//!
//! A legacy value is the OpenSSL passphrase format, base64 encoded:
//!
//! ```text
//! "Salted__" (8) || salt (8) || AES-256-CBC ciphertext, PKCS#7 padded
//! ```
//!
//! Key and IV come from EVP_BytesToKey (one MD5 round) over the passphrase
//! read from the [`LegacyKeyStore`] and the salt. It is a single
//! unauthenticated pass: no JSON structure, no separate `iv` field and no
//! integrity tag, and the passphrase lives in a weaker store than the master
//! key. It is supported only so the migration adapter can read it.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use zeroize::Zeroize;

use crate::crypto::{self, KEY_LEN};
use crate::error::{Result, StrataError};
use crate::keystore::LegacyKeyStore;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

fn legacy_error(reason: impl Into<String>) -> StrataError {
    StrataError::LegacyDecryption(reason.into())
}

/// Key and IV of one legacy value.
struct LegacyKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Drop for LegacyKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

/// EVP_BytesToKey with MD5 and a single iteration:
/// `D_i = MD5(D_{i-1} || passphrase || salt)` until key and IV are filled.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> LegacyKey {
    let mut material = [0u8; KEY_LEN + IV_LEN];
    let mut previous: Option<[u8; 16]> = None;
    let mut filled = 0;

    while filled < material.len() {
        let mut hasher = Md5::new();
        if let Some(previous) = &previous {
            hasher.update(previous);
        }
        hasher.update(passphrase);
        hasher.update(salt);
        let block: [u8; 16] = hasher.finalize().into();

        let n = block.len().min(material.len() - filled);
        material[filled..filled + n].copy_from_slice(&block[..n]);
        filled += n;
        previous = Some(block);
    }

    let mut derived = LegacyKey {
        key: [0u8; KEY_LEN],
        iv: [0u8; IV_LEN],
    };
    derived.key.copy_from_slice(&material[..KEY_LEN]);
    derived.iv.copy_from_slice(&material[KEY_LEN..]);
    material.zeroize();
    derived
}

/// Produce a legacy value. Only fixtures and diagnostics still create these.
pub fn encrypt_legacy(passphrase: &str, plaintext: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    crypto::fill_random(&mut salt)?;

    let derived = evp_bytes_to_key(passphrase.as_bytes(), &salt);
    let ciphertext = Aes256CbcEnc::new(&derived.key.into(), &derived.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut blob = Vec::with_capacity(MAGIC.len() + SALT_LEN + ciphertext.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Decrypt a legacy value with an explicit passphrase.
///
/// Nothing authenticates the value, so a wrong passphrase is detected only
/// through invalid padding or non-UTF-8 output.
pub fn decrypt_legacy_with(passphrase: &str, raw: &str) -> Result<String> {
    let blob = STANDARD
        .decode(raw.trim())
        .map_err(|_| legacy_error("not a base64 cipher string"))?;

    let Some(rest) = blob.strip_prefix(MAGIC.as_slice()) else {
        return Err(legacy_error("missing salt header"));
    };
    if rest.len() < SALT_LEN + BLOCK_LEN || (rest.len() - SALT_LEN) % BLOCK_LEN != 0 {
        return Err(legacy_error("cipher string has an invalid length"));
    }
    let (salt, ciphertext) = rest.split_at(SALT_LEN);

    let derived = evp_bytes_to_key(passphrase.as_bytes(), salt);
    let plaintext = Aes256CbcDec::new(&derived.key.into(), &derived.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| legacy_error("wrong legacy key or corrupted value"))?;

    String::from_utf8(plaintext).map_err(|e| {
        e.into_bytes().zeroize();
        legacy_error("plaintext is not UTF-8")
    })
}

/// Decrypt a legacy value with the passphrase held by `store`.
///
/// An absent key is a [`StrataError::LegacyDecryption`]: without it the
/// value is unrecoverable.
pub fn decrypt_legacy(store: &dyn LegacyKeyStore, raw: &str) -> Result<String> {
    let mut passphrase = store
        .get()
        .map_err(|e| legacy_error(format!("legacy key store: {e}")))?
        .ok_or_else(|| legacy_error("legacy key is not available"))?;
    let plaintext = decrypt_legacy_with(&passphrase, raw);
    passphrase.zeroize();
    plaintext
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{classify, Format};
    use crate::keystore::StaticLegacyKeyStore;

    // Written by `openssl enc -aes-256-cbc -md md5 -S 0102030405060708
    // -pass pass:old-deployment-secret`.
    const OPENSSL_VALUE: &str = "U2FsdGVkX18BAgMEBQYHCJJzidKFWgxtkuaZBs1c277zySeujpfpXakQt+LpxK0D";

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_reads_openssl_output() {
        assert_eq!(classify(OPENSSL_VALUE), Format::Legacy);
        assert_eq!(
            decrypt_legacy_with("old-deployment-secret", OPENSSL_VALUE).unwrap(),
            "senha do compartilhamento"
        );
    }

    #[test]
    fn test_legacy_roundtrip() {
        let blob = encrypt_legacy("old-secret", "share password").unwrap();
        assert!(blob.starts_with("U2FsdGVkX1"));
        assert_eq!(classify(&blob), Format::Legacy);

        let store = StaticLegacyKeyStore::new("old-secret");
        assert_eq!(decrypt_legacy(&store, &blob).unwrap(), "share password");
    }

    #[test]
    fn test_fresh_salt_per_value() {
        let a = encrypt_legacy("old-secret", "same").unwrap();
        let b = encrypt_legacy("old-secret", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_derivation_matches_openssl() {
        // `openssl enc -aes-256-cbc -md md5 -S 0102030405060708 -pass pass:k -P`
        let derived = evp_bytes_to_key(b"k", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            hex(&derived.key),
            "0a679573c91ea16abde180f68f3b2d93fb55f700d1a135e2ae6b167843b2b0ac"
        );
        assert_eq!(hex(&derived.iv), "764f2c8563df18ef31023cffb9aa3f33");
    }

    #[test]
    fn test_legacy_failures() {
        let absent = StaticLegacyKeyStore::empty();
        assert!(matches!(
            decrypt_legacy(&absent, OPENSSL_VALUE),
            Err(StrataError::LegacyDecryption(_))
        ));

        assert!(matches!(
            decrypt_legacy_with("old-deployment-secret", "!!!"),
            Err(StrataError::LegacyDecryption(_))
        ));
        // Valid base64 without the salt header.
        assert!(decrypt_legacy_with("old-deployment-secret", "bm90IGEgbGVnYWN5IGJsb2I=").is_err());
        // Header and salt but a truncated ciphertext.
        let truncated = &OPENSSL_VALUE[..OPENSSL_VALUE.len() - 8];
        assert!(decrypt_legacy_with("old-deployment-secret", truncated).is_err());
    }
}
