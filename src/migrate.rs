//! Legacy-to-envelope migration.
//!
//! Reads legacy values through the deprecated [`LegacyKeyStore`] and
//! re-encrypts them with the current codecs:
//! 1. Classify (non-legacy values are left untouched)
//! 2. Decrypt with the legacy key
//! 3. Re-encrypt with the vault
//!
//! Batches run on a bounded worker pool. One bad row never stops the batch:
//! its failure is logged and collected in the [`MigrationReport`]. Only a
//! missing master key aborts a run, since nothing could succeed without it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::config::DEFAULT_MIGRATION_CONCURRENCY;
use crate::envelope::{classify, Format};
use crate::error::{Result, StrataError};
use crate::keystore::LegacyKeyStore;
use crate::legacy;
use crate::vault::Vault;

/// One persisted value of an external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub ciphertext: String,
}

impl Row {
    pub fn new(id: impl Into<String>, ciphertext: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ciphertext: ciphertext.into(),
        }
    }
}

/// The external store a batch migration writes back into.
pub trait RowStore: Sync {
    fn rows(&self) -> Result<Vec<Row>>;

    /// Replace the stored value of `id`. The old value is not retained.
    fn write(&self, id: &str, value: &str) -> Result<()>;
}

/// Which codec migrated values are re-encrypted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTarget {
    /// Plain secrets: single-layer envelope.
    SingleLayer,
    /// Layered secrets: 2 rounds, or 3 with [`Migrator::with_password`].
    Layered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The value was legacy; here is its replacement.
    Migrated(String),
    /// The value is already in a current format.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of a batch. Serializes to the JSON the admin tool prints.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub unchanged: usize,
    pub failed: Vec<RowFailure>,
    /// The new values of migrated rows.
    #[serde(skip)]
    pub updates: Vec<Row>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            migrated: 0,
            unchanged: 0,
            failed: Vec::new(),
            updates: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum RowResult {
    Migrated(Row),
    Unchanged,
    Failed(RowFailure),
}

/// Re-encrypts legacy values with the current codecs.
pub struct Migrator<'a> {
    vault: &'a Vault,
    legacy: Arc<dyn LegacyKeyStore>,
    target: MigrationTarget,
    password: Option<String>,
    concurrency: usize,
}

impl std::fmt::Debug for Migrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("target", &self.target)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Drop for Migrator<'_> {
    fn drop(&mut self) {
        if let Some(password) = self.password.as_mut() {
            password.zeroize();
        }
    }
}

impl<'a> Migrator<'a> {
    pub fn new(vault: &'a Vault, legacy: Arc<dyn LegacyKeyStore>, target: MigrationTarget) -> Self {
        Self {
            vault,
            legacy,
            target,
            password: None,
            concurrency: DEFAULT_MIGRATION_CONCURRENCY,
        }
    }

    /// Add a password round to layered re-encryption.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Bound the worker pool. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Migrate one value. Non-legacy input is a no-op, so running a
    /// migration twice never alters already-migrated data.
    pub fn migrate(&self, raw: &str) -> Result<MigrationOutcome> {
        if classify(raw) != Format::Legacy {
            return Ok(MigrationOutcome::Unchanged);
        }

        let mut plaintext = legacy::decrypt_legacy(self.legacy.as_ref(), raw)?;
        let envelope = match self.target {
            MigrationTarget::SingleLayer => self.vault.encrypt_data(&plaintext),
            MigrationTarget::Layered => self
                .vault
                .encrypt_with_layers(&plaintext, self.password.as_deref()),
        };
        plaintext.zeroize();

        Ok(MigrationOutcome::Migrated(envelope?))
    }

    /// Like [`Migrator::migrate`], but returns the value to store: the new
    /// envelope, or `raw` itself when nothing needed migrating.
    pub fn migrate_value(&self, raw: &str) -> Result<String> {
        Ok(match self.migrate(raw)? {
            MigrationOutcome::Migrated(envelope) => envelope,
            MigrationOutcome::Unchanged => raw.to_string(),
        })
    }

    /// Migrate a batch in memory. Nothing is written; the new values are in
    /// [`MigrationReport::updates`].
    pub fn migrate_all(&self, rows: &[Row]) -> Result<MigrationReport> {
        self.run(rows, None)
    }

    /// Migrate every row of `store`, writing back only successful rows.
    pub fn migrate_store(&self, store: &dyn RowStore) -> Result<MigrationReport> {
        let rows = store.rows()?;
        self.run(&rows, Some(store))
    }

    fn run(&self, rows: &[Row], store: Option<&dyn RowStore>) -> Result<MigrationReport> {
        // Fail the whole run up front if the master key is unusable.
        self.vault.key_manager().get_or_create_master_key()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|e| StrataError::Config(format!("migration pool: {e}")))?;

        let mut report = MigrationReport::new();
        let results: Vec<RowResult> = pool.install(|| {
            rows.par_iter()
                .map(|row| self.migrate_row(row, store))
                .collect()
        });

        for result in results {
            match result {
                RowResult::Migrated(row) => {
                    report.migrated += 1;
                    report.updates.push(row);
                }
                RowResult::Unchanged => report.unchanged += 1,
                RowResult::Failed(failure) => report.failed.push(failure),
            }
        }
        report.finished_at = Utc::now();

        info!(
            migrated = report.migrated,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "migration batch finished"
        );
        Ok(report)
    }

    fn migrate_row(&self, row: &Row, store: Option<&dyn RowStore>) -> RowResult {
        let outcome = self.migrate(&row.ciphertext).and_then(|outcome| match outcome {
            MigrationOutcome::Migrated(envelope) => {
                if let Some(store) = store {
                    store.write(&row.id, &envelope)?;
                }
                Ok(Some(envelope))
            }
            MigrationOutcome::Unchanged => Ok(None),
        });

        match outcome {
            Ok(Some(envelope)) => RowResult::Migrated(Row::new(row.id.clone(), envelope)),
            Ok(None) => RowResult::Unchanged,
            Err(e) => {
                warn!(row = %row.id, error = %e, "row migration failed");
                RowResult::Failed(RowFailure {
                    id: row.id.clone(),
                    error: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::keystore::{MemoryKeyStore, StaticLegacyKeyStore};
    use crate::manager::KeyManager;

    fn vault() -> Vault {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()), "master-key");
        Vault::new(
            Arc::new(manager),
            CodecConfig {
                pbkdf2_iterations: 1_000,
            },
        )
    }

    #[test]
    fn test_migrate_single_layer() {
        let vault = vault();
        let migrator = Migrator::new(
            &vault,
            Arc::new(StaticLegacyKeyStore::new("legacy")),
            MigrationTarget::SingleLayer,
        );

        let blob = legacy::encrypt_legacy("legacy", "hello").unwrap();
        let MigrationOutcome::Migrated(envelope) = migrator.migrate(&blob).unwrap() else {
            panic!("expected a migration");
        };
        assert_eq!(classify(&envelope), Format::SingleLayer);
        assert_eq!(vault.decrypt_data(&envelope).unwrap(), "hello");
        assert_eq!(migrator.migrate(&envelope).unwrap(), MigrationOutcome::Unchanged);
    }

    #[test]
    fn test_migrate_layered_with_password() {
        let vault = vault();
        let migrator = Migrator::new(
            &vault,
            Arc::new(StaticLegacyKeyStore::new("legacy")),
            MigrationTarget::Layered,
        )
        .with_password("pw");

        let blob = legacy::encrypt_legacy("legacy", "hello").unwrap();
        let envelope = migrator.migrate_value(&blob).unwrap();
        assert!(envelope.contains("\"layers\":3"));
        assert_eq!(vault.decrypt_with_layers(&envelope, Some("pw")).unwrap(), "hello");
    }

    #[test]
    fn test_missing_legacy_key_is_surfaced() {
        let vault = vault();
        let migrator = Migrator::new(
            &vault,
            Arc::new(StaticLegacyKeyStore::empty()),
            MigrationTarget::SingleLayer,
        );
        let blob = legacy::encrypt_legacy("legacy", "x").unwrap();
        assert!(matches!(
            migrator.migrate(&blob),
            Err(StrataError::LegacyDecryption(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let vault = vault();
        let migrator = Migrator::new(
            &vault,
            Arc::new(StaticLegacyKeyStore::empty()),
            MigrationTarget::Layered,
        )
        .with_password("super-secret");
        assert!(!format!("{migrator:?}").contains("super-secret"));
    }

    #[test]
    fn test_report_json_omits_values() {
        let vault = vault();
        let migrator = Migrator::new(
            &vault,
            Arc::new(StaticLegacyKeyStore::new("legacy")),
            MigrationTarget::SingleLayer,
        );
        let rows = [
            Row::new("ok", legacy::encrypt_legacy("legacy", "hello").unwrap()),
            Row::new("bad", "bm90IGEgbGVnYWN5IGJsb2I="),
        ];
        let report = migrator.migrate_all(&rows).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["migrated"], 1);
        assert_eq!(json["failed"][0]["id"], "bad");
        assert!(json.get("updates").is_none());
        assert!(json["started_at"].is_string());
    }
}
