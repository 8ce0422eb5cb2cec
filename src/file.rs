//! Binary file encryption.
//!
//! File contents are sealed with the single-layer codec under a random
//! per-file [`FileKey`]; the envelope JSON is what gets uploaded. The file key
//! itself is persisted by the caller after wrapping it with the layered codec
//! (see [`Vault::wrap_file_key`](crate::Vault::wrap_file_key)).

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::envelope::Envelope;
use crate::error::{Result, StrataError};
use crate::keys::FileKey;

/// A file in the clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PlainFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// An encrypted file ready for upload. `content` is a single-layer envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFile {
    pub name: String,
    pub mime_type: String,
    /// Plaintext size in bytes.
    pub size: u64,
    pub content: String,
}

pub fn encrypt_file(file: &PlainFile, key: &FileKey) -> Result<EncryptedFile> {
    let envelope = codec::encrypt(key.as_bytes(), &file.bytes)?;
    Ok(EncryptedFile {
        name: file.name.clone(),
        mime_type: file.mime_type.clone(),
        size: file.bytes.len() as u64,
        content: Envelope::Single(envelope).to_json()?,
    })
}

pub fn decrypt_file(
    encrypted_content: &str,
    key: &FileKey,
    mime_type: &str,
    filename: &str,
) -> Result<PlainFile> {
    let Envelope::Single(envelope) = Envelope::parse(encrypted_content)? else {
        return Err(StrataError::UnsupportedFormat);
    };
    let bytes = codec::decrypt(key.as_bytes(), &envelope)?;
    Ok(PlainFile::new(filename, mime_type, bytes))
}
