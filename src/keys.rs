//! Key derivation and ownership.
//!
//! This module owns two responsibilities:
//! 1. Deriving purpose-scoped keys from a master key (HKDF-SHA256) and
//!    password-scoped keys from a password and salt (PBKDF2).
//! 2. Holding key material in types that are opaque and zeroised on drop.
//!
//! ## Derivation structure
//!
//! ```text
//! master ──HKDF("strataseal:data")────► single-layer data key
//!        ──HKDF("strataseal:layer-1")─► round 1 key
//!        ──HKDF("strataseal:layer-2")─► round 2 key
//! password + salt ──PBKDF2──────────────► round 3 key
//!
//! any round key ──HKDF("strataseal:enc")─► AES-GCM key
//!               ──HKDF("strataseal:mac")─► HMAC key
//! ```
//!
//! The encryption and integrity keys of a round are always separated by the
//! last step, so no key material is used for both purposes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::hkdf;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::{Result, StrataError};

/// The purposes used in the HKDF info string.
pub(crate) mod purpose {
    pub const DATA: &str = "data";
    pub const LAYER_1: &str = "layer-1";
    pub const LAYER_2: &str = "layer-2";
    pub const ENC: &str = "enc";
    pub const MAC: &str = "mac";
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The deployment master key held by the [`KeyManager`](crate::KeyManager).
///
/// - Not `Clone`. Shared by `Arc` once loaded.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Construct a `MasterKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Construct a `MasterKey` from a stored value, which must be exactly
    /// [`KEY_LEN`] bytes.
    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| StrataError::InvalidKey)?;
        Ok(Self { bytes })
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Derived key
// ---------------------------------------------------------------------------

/// A key derived for one purpose (a layer round, the data key, a sub-key).
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// File key
// ---------------------------------------------------------------------------

/// A random per-file key.
///
/// Unlike the master key it has to be persisted by the caller, so it can be
/// exported as base64. The export is meant to be fed straight into
/// [`Vault::encrypt_with_layers`](crate::Vault::encrypt_with_layers).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FileKey {
    bytes: [u8; KEY_LEN],
}

impl FileKey {
    /// Generate a fresh random file key.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            bytes: crypto::generate_random_key()?,
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| StrataError::InvalidKey)?;
        let bytes: std::result::Result<[u8; KEY_LEN], _> = decoded.as_slice().try_into();
        decoded.zeroize();
        bytes
            .map(|bytes| Self { bytes })
            .map_err(|_| StrataError::InvalidKey)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive a key for `purpose` from `ikm` with HKDF-SHA256.
///
/// The info string is `strataseal:{purpose}`; distinct purposes yield
/// statistically independent keys, and a derived key reveals nothing about
/// `ikm`.
pub(crate) fn derive_key(ikm: &[u8; KEY_LEN], purpose: &str) -> Result<DerivedKey> {
    let info = format!("strataseal:{purpose}");

    // An empty salt is treated by HKDF as a zero-filled salt of hash length.
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(ikm);

    let info_slices = [info.as_bytes()];
    let okm = prk
        .expand(&info_slices, hkdf::HKDF_SHA256)
        .map_err(|_| StrataError::KeyDerivationFailure)?;

    let mut derived = [0u8; KEY_LEN];
    okm.fill(&mut derived)
        .map_err(|_| StrataError::KeyDerivationFailure)?;

    Ok(DerivedKey { bytes: derived })
}

/// Derive the outermost round key from a password with PBKDF2.
pub(crate) fn derive_password_key(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<DerivedKey> {
    let bytes = crypto::pbkdf2_sha256(password.as_bytes(), salt, iterations)?;
    Ok(DerivedKey { bytes })
}

/// The encryption and integrity sub-keys of one round.
pub(crate) struct RoundKeys {
    pub enc: DerivedKey,
    pub mac: DerivedKey,
}

impl RoundKeys {
    pub(crate) fn split(round_key: &[u8; KEY_LEN]) -> Result<Self> {
        Ok(Self {
            enc: derive_key(round_key, purpose::ENC)?,
            mac: derive_key(round_key, purpose::MAC)?,
        })
    }
}
