//! The public face of the crate.
//!
//! A [`Vault`] pairs a shared [`KeyManager`] with codec settings and exposes
//! the string-in, string-out operations the application layer calls. It is
//! `Send + Sync`; share it by `Arc` or reference across tasks. The password
//! round is deliberately slow, so callers on latency-sensitive threads should
//! run layered operations as blocking work.

use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroize;

use crate::codec;
use crate::config::{CodecConfig, StrataConfig};
use crate::envelope::{Envelope, Format};
use crate::error::{Result, StrataError};
use crate::file::{self, EncryptedFile, PlainFile};
use crate::keys::{self, purpose, DerivedKey, FileKey};
use crate::keystore::{FileKeyStore, FileLegacyKeyStore, LegacyKeyStore};
use crate::legacy;
use crate::manager::KeyManager;
use crate::stack;

pub struct Vault {
    keys: Arc<KeyManager>,
    codec: CodecConfig,
    legacy: Option<Arc<dyn LegacyKeyStore>>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("keys", &self.keys)
            .field("codec", &self.codec)
            .field("legacy", &self.legacy.is_some())
            .finish()
    }
}

impl Vault {
    pub fn new(keys: Arc<KeyManager>, codec: CodecConfig) -> Self {
        Self {
            keys,
            codec,
            legacy: None,
        }
    }

    /// Allow [`Vault::open`] to read legacy values through `store`.
    pub fn with_legacy_store(mut self, store: Arc<dyn LegacyKeyStore>) -> Self {
        self.legacy = Some(store);
        self
    }

    /// Build a vault over the file key store named by `config`.
    pub fn from_config(config: &StrataConfig) -> Result<Self> {
        config.validate()?;
        let store = FileKeyStore::open(&config.keys.store_dir)?;
        let manager = KeyManager::new(Arc::new(store), config.keys.master_key_id.clone());
        let vault = Self::new(Arc::new(manager), config.codec);
        Ok(match &config.keys.legacy_key_file {
            Some(path) => vault.with_legacy_store(Arc::new(FileLegacyKeyStore::new(path))),
            None => vault,
        })
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn codec_config(&self) -> CodecConfig {
        self.codec
    }

    pub fn legacy_store(&self) -> Option<&Arc<dyn LegacyKeyStore>> {
        self.legacy.as_ref()
    }

    fn data_key(&self) -> Result<DerivedKey> {
        let master = self.keys.get_or_create_master_key()?;
        keys::derive_key(master.as_bytes(), purpose::DATA)
    }

    // -----------------------------------------------------------------------
    // Single-layer secrets
    // -----------------------------------------------------------------------

    /// Encrypt `plaintext` into a single-layer envelope string.
    pub fn encrypt_data(&self, plaintext: &str) -> Result<String> {
        let key = self.data_key()?;
        Envelope::Single(codec::encrypt_str(key.as_bytes(), plaintext)?).to_json()
    }

    /// Decrypt a single-layer envelope string.
    pub fn decrypt_data(&self, envelope: &str) -> Result<String> {
        let Envelope::Single(envelope) = Envelope::parse(envelope)? else {
            return Err(StrataError::UnsupportedFormat);
        };
        let key = self.data_key()?;
        codec::decrypt_str(key.as_bytes(), &envelope)
    }

    // -----------------------------------------------------------------------
    // Layered secrets
    // -----------------------------------------------------------------------

    /// Encrypt `plaintext` with two master-key rounds, plus a password round
    /// when `password` is given.
    pub fn encrypt_with_layers(&self, plaintext: &str, password: Option<&str>) -> Result<String> {
        let master = self.keys.get_or_create_master_key()?;
        let envelope = stack::seal_str(&master, plaintext, password, self.codec.pbkdf2_iterations)?;
        Envelope::Layered(envelope).to_json()
    }

    /// Decrypt a layered envelope string. A 3-layer envelope without a
    /// password fails with [`StrataError::MissingPassword`].
    pub fn decrypt_with_layers(&self, envelope: &str, password: Option<&str>) -> Result<String> {
        let Envelope::Layered(envelope) = Envelope::parse(envelope)? else {
            return Err(StrataError::UnsupportedFormat);
        };
        let master = self.keys.get_or_create_master_key()?;
        stack::peel_str(&master, &envelope, password, self.codec.pbkdf2_iterations)
    }

    // -----------------------------------------------------------------------
    // Format-routed read
    // -----------------------------------------------------------------------

    /// Decrypt any stored value, routing on its detected format.
    ///
    /// Legacy values are readable only when a legacy store is configured;
    /// otherwise they fail with [`StrataError::UnsupportedFormat`].
    pub fn open(&self, raw: &str, password: Option<&str>) -> Result<String> {
        let envelope = Envelope::parse(raw)?;
        debug!(format = %envelope.format(), "opening stored value");
        match envelope {
            Envelope::Single(envelope) => {
                let key = self.data_key()?;
                codec::decrypt_str(key.as_bytes(), &envelope)
            }
            Envelope::Layered(envelope) => {
                let master = self.keys.get_or_create_master_key()?;
                stack::peel_str(&master, &envelope, password, self.codec.pbkdf2_iterations)
            }
            Envelope::Legacy(raw) => match &self.legacy {
                Some(store) => legacy::decrypt_legacy(store.as_ref(), &raw),
                None => Err(StrataError::UnsupportedFormat),
            },
        }
    }

    /// The detected format of `raw`.
    pub fn classify(&self, raw: &str) -> Format {
        crate::envelope::classify(raw)
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    pub fn encrypt_file(&self, file: &PlainFile, key: &FileKey) -> Result<EncryptedFile> {
        file::encrypt_file(file, key)
    }

    pub fn decrypt_file(
        &self,
        encrypted_content: &str,
        key: &FileKey,
        mime_type: &str,
        filename: &str,
    ) -> Result<PlainFile> {
        file::decrypt_file(encrypted_content, key, mime_type, filename)
    }

    /// Wrap a file key for storage in the file's encryption metadata.
    pub fn wrap_file_key(&self, key: &FileKey, password: Option<&str>) -> Result<String> {
        let mut encoded = key.to_base64();
        let wrapped = self.encrypt_with_layers(&encoded, password);
        encoded.zeroize();
        wrapped
    }

    pub fn unwrap_file_key(&self, wrapped: &str, password: Option<&str>) -> Result<FileKey> {
        let mut encoded = self.decrypt_with_layers(wrapped, password)?;
        let key = FileKey::from_base64(&encoded);
        encoded.zeroize();
        key
    }
}
