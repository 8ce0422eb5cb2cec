//! Master key lifecycle.
//!
//! The [`KeyManager`] is constructed once at start-up and passed by `Arc` to
//! every [`Vault`](crate::Vault). It loads the master key from the durable
//! store on first use, generating and persisting one if the store is empty,
//! and caches it for the life of the process.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::crypto;
use crate::error::{Result, StrataError};
use crate::keys::MasterKey;
use crate::keystore::KeyStore;

/// Default key id of the master key inside its store.
pub const DEFAULT_MASTER_KEY_ID: &str = "master-key";

/// Owns the master key and its durable store.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    key_id: String,
    cached: Mutex<Option<Arc<MasterKey>>>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_id", &self.key_id)
            .field("loaded", &self.cached.lock().is_some())
            .finish()
    }
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>, key_id: impl Into<String>) -> Self {
        Self {
            store,
            key_id: key_id.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Return the master key, loading or creating it on first call.
    ///
    /// The lock is held across the store round-trip so concurrent first
    /// callers in this process wait for one initialisation. Across processes
    /// the store's `insert_if_absent` decides the winner and every caller
    /// adopts the persisted value, never its own candidate.
    ///
    /// Any store failure is [`StrataError::KeyStoreUnavailable`]: a
    /// configuration fault, not something a retry at the call site fixes.
    pub fn get_or_create_master_key(&self) -> Result<Arc<MasterKey>> {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(Arc::clone(key));
        }

        let key = match self.store.get(&self.key_id)? {
            Some(mut stored) => {
                let key = MasterKey::from_slice(&stored);
                stored.zeroize();
                debug!(key_id = %self.key_id, "loaded master key");
                key.map_err(|_| self.wrong_length())?
            }
            None => {
                let mut candidate = crypto::generate_random_key()?;
                let persisted = self.store.insert_if_absent(&self.key_id, &candidate);
                candidate.zeroize();
                let mut persisted = persisted?;
                let key = MasterKey::from_slice(&persisted);
                persisted.zeroize();
                info!(key_id = %self.key_id, "master key initialised");
                key.map_err(|_| self.wrong_length())?
            }
        };

        let key = Arc::new(key);
        *cached = Some(Arc::clone(&key));
        Ok(key)
    }

    fn wrong_length(&self) -> StrataError {
        StrataError::KeyStoreUnavailable(format!(
            "stored key '{}' has the wrong length",
            self.key_id
        ))
    }
}
