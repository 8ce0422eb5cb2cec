//! # strataseal
//!
//! Layered envelope encryption for secrets and files persisted by an
//! application as opaque strings.
//!
//! A secret is sealed into a self-describing JSON envelope: a single
//! authenticated round under a key derived from the deployment master key,
//! or two master-key rounds with an optional third, password-derived round
//! on the outside. Every round carries its own IV and HMAC tag, and every tag
//! is checked before its round is decrypted. Values written by the old
//! single-pass format are detected and can be migrated in place.
//!
//! ## Public API
//!
//! - [`Vault`]: encrypt/decrypt strings and files, format-routed reads.
//! - [`KeyManager`] with a [`KeyStore`]: master key lifecycle.
//! - [`envelope::classify`]: format detection.
//! - [`Migrator`]: legacy-to-envelope migration, single or batched.

// Module declarations.
pub(crate) mod codec;
pub mod config;
pub(crate) mod crypto;
pub mod envelope;
pub mod error;
pub mod file;
pub(crate) mod keys;
pub mod keystore;
pub mod legacy;
pub mod manager;
pub mod migrate;
pub mod stack;
pub mod vault;

pub use config::{CodecConfig, StrataConfig};
pub use envelope::{classify, Envelope, Format, LayeredEnvelope, SingleLayerEnvelope};
pub use error::{Result, StrataError};
pub use file::{EncryptedFile, PlainFile};
pub use keys::{FileKey, MasterKey};
pub use keystore::{
    FileKeyStore, FileLegacyKeyStore, KeyStore, LegacyKeyStore, MemoryKeyStore,
    StaticLegacyKeyStore,
};
pub use manager::KeyManager;
pub use migrate::{MigrationOutcome, MigrationReport, MigrationTarget, Migrator, Row, RowStore};
pub use vault::Vault;

