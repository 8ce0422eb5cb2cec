//! Durable key persistence.
//!
//! Two distinct collaborators live here:
//! - [`KeyStore`]: the current, durable, origin-scoped store for the master
//!   key. Read and written by the [`KeyManager`](crate::KeyManager).
//! - [`LegacyKeyStore`]: the deprecated location the pre-envelope format read
//!   its passphrase from. Read-only, used only by the migration path, and
//!   removable once every row has been migrated.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::RwLock;

use crate::crypto;
use crate::error::{Result, StrataError};

/// A durable store for raw key material, addressed by key id.
pub trait KeyStore: Send + Sync {
    /// Return the stored bytes for `key_id`, or `None` if nothing is stored.
    fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key_id`, replacing any previous value.
    fn put(&self, key_id: &str, bytes: &[u8]) -> Result<()>;

    /// Store `bytes` only if `key_id` is vacant and return whatever value is
    /// persisted afterwards.
    ///
    /// The default is a read followed by a write. Backends that can create
    /// atomically override it so concurrent writers converge on one value.
    fn insert_if_absent(&self, key_id: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        if let Some(existing) = self.get(key_id)? {
            return Ok(existing);
        }
        self.put(key_id, bytes)?;
        Ok(bytes.to_vec())
    }
}

/// The deprecated key source of the legacy format.
pub trait LegacyKeyStore: Send + Sync {
    /// Return the legacy passphrase, or `None` if it is no longer available.
    fn get(&self) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A process-local [`KeyStore`]. Not durable; meant for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key_id).cloned())
    }

    fn put(&self, key_id: &str, bytes: &[u8]) -> Result<()> {
        self.entries.write().insert(key_id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn insert_if_absent(&self, key_id: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(self
            .entries
            .write()
            .entry(key_id.to_string())
            .or_insert_with(|| bytes.to_vec())
            .clone())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// A [`KeyStore`] keeping one base64 file per key id inside a directory.
///
/// The directory is the per-origin scope: one directory per deployment.
/// Files are written owner-only on unix. First writes are published with a
/// hard link from a private temp file, which fails if the target exists, so
/// processes racing to create the same key all end up reading one value.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Open (creating if necessary) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, &e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key_id: &str) -> Result<PathBuf> {
        let valid = !key_id.is_empty()
            && !key_id.starts_with('.')
            && key_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StrataError::Config(format!("invalid key id: {key_id:?}")));
        }
        Ok(self.dir.join(format!("{key_id}.key")))
    }

    fn write_temp(&self, key_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let mut suffix = [0u8; 8];
        crypto::fill_random(&mut suffix)?;
        let suffix: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
        let tmp = self.dir.join(format!(".{key_id}.{suffix}.tmp"));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(|e| unavailable(&tmp, &e))?;
        file.write_all(STANDARD.encode(bytes).as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                unavailable(&tmp, &e)
            })?;
        Ok(tmp)
    }
}

fn unavailable(path: &Path, err: &std::io::Error) -> StrataError {
    StrataError::KeyStoreUnavailable(format!("{}: {err}", path.display()))
}

impl KeyStore for FileKeyStore {
    fn get(&self, key_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key_id)?;
        match fs::read_to_string(&path) {
            Ok(content) => STANDARD.decode(content.trim()).map(Some).map_err(|_| {
                StrataError::KeyStoreUnavailable(format!("{}: corrupt key file", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&path, &e)),
        }
    }

    fn put(&self, key_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key_id)?;
        let tmp = self.write_temp(key_id, bytes)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            unavailable(&path, &e)
        })
    }

    fn insert_if_absent(&self, key_id: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        let path = self.path_for(key_id)?;
        let tmp = self.write_temp(key_id, bytes)?;
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(bytes.to_vec()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => self
                .get(key_id)?
                .ok_or_else(|| unavailable(&path, &e)),
            Err(e) => Err(unavailable(&path, &e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy stores
// ---------------------------------------------------------------------------

/// A [`LegacyKeyStore`] holding a fixed value (or nothing).
#[derive(Default)]
pub struct StaticLegacyKeyStore {
    passphrase: Option<String>,
}

impl StaticLegacyKeyStore {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
        }
    }

    /// A store whose key has already been removed.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for StaticLegacyKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLegacyKeyStore")
            .field("present", &self.passphrase.is_some())
            .finish()
    }
}

impl LegacyKeyStore for StaticLegacyKeyStore {
    fn get(&self) -> Result<Option<String>> {
        Ok(self.passphrase.clone())
    }
}

/// A [`LegacyKeyStore`] reading the passphrase from a plaintext file, the
/// deprecated location. A missing or blank file means no key.
#[derive(Debug, Clone)]
pub struct FileLegacyKeyStore {
    path: PathBuf,
}

impl FileLegacyKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LegacyKeyStore for FileLegacyKeyStore {
    fn get(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let trimmed = content.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&self.path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_insert_if_absent_keeps_first() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.insert_if_absent("k", b"first").unwrap(), b"first");
        assert_eq!(store.insert_if_absent("k", b"second").unwrap(), b"first");
        assert_eq!(store.get("k").unwrap().unwrap(), b"first");
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path().join("keys")).unwrap();

        assert!(store.get("master-key").unwrap().is_none());
        store.put("master-key", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("master-key").unwrap().unwrap(), vec![1, 2, 3]);

        store.put("master-key", &[4, 5]).unwrap();
        assert_eq!(store.get("master-key").unwrap().unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_file_store_insert_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();

        assert_eq!(store.insert_if_absent("k", b"a").unwrap(), b"a");
        assert_eq!(store.insert_if_absent("k", b"b").unwrap(), b"a");

        // No temp files are left behind.
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        store.put("k", b"secret").unwrap();
        let mode = fs::metadata(dir.path().join("k.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        assert!(store.get("../escape").is_err());
        assert!(store.get("").is_err());
        assert!(store.put(".hidden", b"x").is_err());
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("k.key"), "%%% not base64").unwrap();
        assert!(matches!(
            store.get("k"),
            Err(StrataError::KeyStoreUnavailable(_))
        ));
    }

    #[test]
    fn test_legacy_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.key");
        let store = FileLegacyKeyStore::new(&path);
        assert!(store.get().unwrap().is_none());

        fs::write(&path, "  \n").unwrap();
        assert!(store.get().unwrap().is_none());

        fs::write(&path, "old-passphrase\n").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("old-passphrase"));
    }

    #[test]
    fn test_static_legacy_store() {
        assert!(StaticLegacyKeyStore::empty().get().unwrap().is_none());
        assert_eq!(
            StaticLegacyKeyStore::new("p").get().unwrap().as_deref(),
            Some("p")
        );
    }
}
