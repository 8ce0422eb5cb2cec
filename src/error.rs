//! Error types for strataseal.
//!
//! Every variant is a distinct failure mode of the envelope codecs, the key
//! stores, or the migration adapter. Messages say *what* failed and never
//! carry key material or plaintext.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

/// The single error type for all strataseal operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// An HMAC check failed: tampering, a wrong password, or corrupted storage.
    #[error("Data integrity verification failed")]
    Integrity,

    /// A password-layer envelope was presented without a password.
    #[error("password required to decrypt this envelope")]
    MissingPassword,

    /// The cipher rejected the input after the integrity check passed.
    #[error("decryption failed")]
    Decryption,

    /// The deprecated key or algorithm could not recover the plaintext.
    #[error("legacy decryption failed: {0}")]
    LegacyDecryption(String),

    /// The durable key store could not be read or written.
    #[error("key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// The input parsed as an envelope but its fields are inconsistent.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope has a different shape than the requested decode path.
    #[error("unsupported envelope format")]
    UnsupportedFormat,

    /// A cryptographic key was invalid (wrong length, malformed, etc.).
    #[error("invalid key")]
    InvalidKey,

    /// The underlying `ring` seal operation returned an error.
    #[error("encryption failed")]
    EncryptionFailure,

    /// HKDF or PBKDF2 derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailure,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    #[error("config error: {0}")]
    Config(String),
}

impl StrataError {
    /// True for failures the user can act on (supply or correct a password),
    /// as opposed to system faults.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::MissingPassword | Self::Integrity)
    }
}
