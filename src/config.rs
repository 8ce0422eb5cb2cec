//! Configuration, loaded from `strataseal.toml`.
//!
//! ```toml
//! [keys]
//! store_dir = "/var/lib/strataseal/keys"
//! master_key_id = "master-key"
//! legacy_key_file = "/var/lib/strataseal/legacy.key"
//!
//! [codec]
//! pbkdf2_iterations = 310000
//!
//! [migration]
//! concurrency = 4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::manager::DEFAULT_MASTER_KEY_ID;

/// Default PBKDF2-HMAC-SHA256 work factor for the password round.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 310_000;

/// Default width of the migration worker pool.
pub const DEFAULT_MIGRATION_CONCURRENCY: usize = 4;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub keys: KeysConfig,
    pub codec: CodecConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory of the durable master key store (one per deployment).
    pub store_dir: PathBuf,
    /// Key id of the master key inside the store.
    pub master_key_id: String,
    /// Deprecated plaintext passphrase file of the legacy format. Only needed
    /// while legacy rows remain.
    pub legacy_key_file: Option<PathBuf>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("/var/lib/strataseal/keys"),
            master_key_id: DEFAULT_MASTER_KEY_ID.to_string(),
            legacy_key_file: None,
        }
    }
}

/// Codec parameters. Deployment-wide: the iteration count is not recorded
/// in envelopes, so changing it invalidates existing password envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub pbkdf2_iterations: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Worker threads used by batch migration.
    pub concurrency: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_MIGRATION_CONCURRENCY,
        }
    }
}

impl StrataConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| StrataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StrataError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.codec.pbkdf2_iterations == 0 {
            return Err(StrataError::Config("codec.pbkdf2_iterations must be > 0".into()));
        }
        if self.migration.concurrency == 0 {
            return Err(StrataError::Config("migration.concurrency must be > 0".into()));
        }
        if self.keys.master_key_id.is_empty() {
            return Err(StrataError::Config("keys.master_key_id must not be empty".into()));
        }
        Ok(())
    }
}
