//! Single-layer envelope codec.
//!
//! One round = AES-256-GCM under the round's `enc` sub-key with a fresh IV,
//! plus an HMAC-SHA256 tag under the `mac` sub-key over `iv || ciphertext`.
//! On the way back the tag is checked first; the cipher never sees input
//! whose tag did not verify.
//!
//! The layered codec in `stack` is built from the same round functions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::crypto::{self, KEY_LEN, NONCE_LEN};
use crate::envelope::SingleLayerEnvelope;
use crate::error::{Result, StrataError};
use crate::keys::RoundKeys;

/// The raw output of one round.
pub(crate) struct SealedRound {
    pub iv: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub hmac: Vec<u8>,
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode an envelope field. An undecodable field can only come from
/// tampering or storage corruption, so it is reported as an integrity
/// failure rather than a parse error.
pub(crate) fn decode(field: &str) -> Result<Vec<u8>> {
    STANDARD.decode(field).map_err(|_| StrataError::Integrity)
}

/// Encrypt and tag `plaintext` under `round_key`.
pub(crate) fn seal_round(round_key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<SealedRound> {
    let keys = RoundKeys::split(round_key)?;
    let iv = crypto::generate_nonce()?;
    let ciphertext = crypto::encrypt(keys.enc.as_bytes(), &iv, plaintext)?;
    let hmac = crypto::sign(keys.mac.as_bytes(), &iv, &ciphertext);
    Ok(SealedRound {
        iv,
        ciphertext,
        hmac,
    })
}

/// Verify the tag of one round, then decrypt it. An IV of the wrong length
/// is an integrity failure like any other tampering.
pub(crate) fn open_round(
    round_key: &[u8; KEY_LEN],
    iv: &[u8],
    ciphertext: &[u8],
    hmac: &[u8],
) -> Result<Vec<u8>> {
    // The tag covers `iv || ciphertext`; only a fixed-length IV keeps that
    // boundary from moving.
    let iv: [u8; NONCE_LEN] = iv.try_into().map_err(|_| StrataError::Integrity)?;

    let keys = RoundKeys::split(round_key)?;
    crypto::verify(keys.mac.as_bytes(), &iv, ciphertext, hmac)?;
    crypto::decrypt(keys.enc.as_bytes(), &iv, ciphertext)
}

/// Encrypt `plaintext` into a single-layer envelope.
pub(crate) fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<SingleLayerEnvelope> {
    let round = seal_round(key, plaintext)?;
    Ok(SingleLayerEnvelope {
        ciphertext: encode(&round.ciphertext),
        iv: encode(&round.iv),
        hmac: encode(&round.hmac),
    })
}

/// Decrypt a single-layer envelope.
///
/// Fails with [`StrataError::Integrity`] if the tag does not verify and with
/// [`StrataError::Decryption`] if the cipher rejects a correctly tagged input.
pub(crate) fn decrypt(key: &[u8; KEY_LEN], envelope: &SingleLayerEnvelope) -> Result<Vec<u8>> {
    let iv = decode(&envelope.iv)?;
    let ciphertext = decode(&envelope.ciphertext)?;
    let hmac = decode(&envelope.hmac)?;
    open_round(key, &iv, &ciphertext, &hmac)
}

pub(crate) fn encrypt_str(key: &[u8; KEY_LEN], plaintext: &str) -> Result<SingleLayerEnvelope> {
    encrypt(key, plaintext.as_bytes())
}

pub(crate) fn decrypt_str(key: &[u8; KEY_LEN], envelope: &SingleLayerEnvelope) -> Result<String> {
    String::from_utf8(decrypt(key, envelope)?).map_err(|_| StrataError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0x11; KEY_LEN];

    #[test]
    fn test_roundtrip() {
        let envelope = encrypt_str(&KEY, "minha senha secreta").unwrap();
        assert_eq!(decrypt_str(&KEY, &envelope).unwrap(), "minha senha secreta");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let a = encrypt_str(&KEY, "same").unwrap();
        let b = encrypt_str(&KEY, "same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_fields_fail_integrity() {
        let envelope = encrypt_str(&KEY, "secret").unwrap();

        let mut bad_hmac = envelope.clone();
        bad_hmac.hmac = "hmac_adulterado".into();
        assert!(matches!(decrypt(&KEY, &bad_hmac), Err(StrataError::Integrity)));

        let mut bad_iv = envelope.clone();
        bad_iv.iv = encode(&[0u8; NONCE_LEN]);
        assert!(matches!(decrypt(&KEY, &bad_iv), Err(StrataError::Integrity)));

        let mut bad_ct = envelope.clone();
        let mut raw = decode(&bad_ct.ciphertext).unwrap();
        raw[0] ^= 0x01;
        bad_ct.ciphertext = encode(&raw);
        assert!(matches!(decrypt(&KEY, &bad_ct), Err(StrataError::Integrity)));
    }

    #[test]
    fn test_shifted_iv_boundary_fails_integrity() {
        let envelope = encrypt_str(&KEY, "secret").unwrap();
        let iv = decode(&envelope.iv).unwrap();
        let ct = decode(&envelope.ciphertext).unwrap();

        // Same `iv || ciphertext` bytes, so the tag alone would still match.
        let mut longer_iv = iv.clone();
        longer_iv.push(ct[0]);
        let mut shifted = envelope.clone();
        shifted.iv = encode(&longer_iv);
        shifted.ciphertext = encode(&ct[1..]);
        assert!(matches!(decrypt(&KEY, &shifted), Err(StrataError::Integrity)));

        let mut longer_ct = vec![iv[NONCE_LEN - 1]];
        longer_ct.extend_from_slice(&ct);
        let mut shifted = envelope.clone();
        shifted.iv = encode(&iv[..NONCE_LEN - 1]);
        shifted.ciphertext = encode(&longer_ct);
        assert!(matches!(decrypt(&KEY, &shifted), Err(StrataError::Integrity)));
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let envelope = encrypt_str(&KEY, "secret").unwrap();
        assert!(matches!(
            decrypt(&[0x22; KEY_LEN], &envelope),
            Err(StrataError::Integrity)
        ));
    }

    #[test]
    fn test_binary_payload() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let envelope = encrypt(&KEY, &bytes).unwrap();
        assert_eq!(decrypt(&KEY, &envelope).unwrap(), bytes);
        // Non-UTF-8 plaintext cannot come back as a string.
        assert!(matches!(
            decrypt_str(&KEY, &envelope),
            Err(StrataError::Decryption)
        ));
    }
}
