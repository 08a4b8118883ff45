//! Persistence boundaries for csrledger.
//!
//! - [`Storage`]: libSQL-backed entity ledger, implementing [`Ledger`]
//! - [`TrackerFile`]: JSON completion ledger of reconciliation status records
//! - [`FsArchive`]: directory-backed report archive, implementing [`ReportArchive`]

mod archive;
mod ledger;
mod migrations;
mod tracker;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use csrledger_shared::{EntityId, EntityRecord, LedgerError, ReportYears, Result};
use libsql::{Connection, Database, params};

pub use archive::{FsArchive, ReportArchive, UploadReceipt};
pub use ledger::Ledger;
pub use tracker::TrackerFile;

const ENTITY_COLUMNS: &str = "symbol, security, website_url, report_years, updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create the ledger database at `path`.
    ///
    /// Any failure here means the ledger backend is unreachable.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::connection("ledger", format!("{}: {e}", parent.display())))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LedgerError::connection("ledger", e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| LedgerError::connection("ledger", e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LedgerError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Entity operations
    // -----------------------------------------------------------------------

    /// Insert an entity, or replace the year-map of an existing one.
    /// A missing `website_url` keeps the stored one.
    pub async fn upsert_entity(&self, record: &EntityRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let years = encode_years(&record.report_years)?;
        let updated_at = record.updated_at.map(|t| t.to_rfc3339());
        self.conn
            .execute(
                "INSERT INTO entities (symbol, security, website_url, report_years, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(symbol, security) DO UPDATE SET
                   website_url = COALESCE(excluded.website_url, entities.website_url),
                   report_years = excluded.report_years,
                   updated_at = excluded.updated_at",
                params![
                    record.id.symbol.as_str(),
                    record.id.security.as_str(),
                    record.website_url.as_deref(),
                    years.as_str(),
                    now.as_str(),
                    updated_at.as_deref(),
                ],
            )
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Import a JSON array of entity records. Returns the number imported.
    pub async fn import_seed(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| LedgerError::io(path, e))?;
        let records: Vec<EntityRecord> = serde_json::from_str(&content).map_err(|e| {
            LedgerError::parse(format!("invalid seed file {}: {e}", path.display()))
        })?;

        for record in &records {
            self.upsert_entity(record).await?;
        }
        tracing::info!(path = %path.display(), count = records.len(), "imported seed entities");
        Ok(records.len())
    }

    /// Write every entity as a JSON array, keeping the first record per
    /// display name. Returns the number written.
    pub async fn export_snapshot(&self, path: &Path) -> Result<usize> {
        let records = self.list_entities().await?;
        let mut seen: HashSet<String> = HashSet::new();
        let unique: Vec<&EntityRecord> = records
            .iter()
            .filter(|r| seen.insert(r.id.security.clone()))
            .collect();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&unique)
            .map_err(|e| LedgerError::parse(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| LedgerError::io(path, e))?;

        tracing::info!(path = %path.display(), count = unique.len(), "exported ledger snapshot");
        Ok(unique.len())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn encode_years(years: &ReportYears) -> Result<String> {
    serde_json::to_string(years).map_err(|e| LedgerError::parse(e.to_string()))
}

/// Convert a database row (selected with [`ENTITY_COLUMNS`]) to an [`EntityRecord`].
fn row_to_entity(row: &libsql::Row) -> Result<EntityRecord> {
    let symbol: String = row
        .get(0)
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    let security: String = row
        .get(1)
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    let website_url: Option<String> = row.get::<String>(2).ok();
    let years_json: String = row
        .get(3)
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    let report_years: ReportYears = serde_json::from_str(&years_json).map_err(|e| {
        LedgerError::parse(format!("report_years of {symbol}: {e}"))
    })?;
    let updated_at = match row.get::<String>(4).ok() {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| LedgerError::Storage(format!("invalid date: {e}")))?,
        ),
        None => None,
    };

    Ok(EntityRecord {
        id: EntityId { symbol, security },
        website_url,
        report_years,
        updated_at,
    })
}
