//! The [`Ledger`] boundary: durable entity records and their year-maps.

use async_trait::async_trait;
use chrono::Utc;
use csrledger_shared::{EntityId, EntityRecord, LedgerError, ReportYears, Result};
use libsql::params;

use crate::{ENTITY_COLUMNS, Storage, encode_years, row_to_entity};

/// Read/write access to entity records.
///
/// The reconciliation passes depend on this trait rather than on
/// [`Storage`] so each record stays independently keyed by [`EntityId`].
#[async_trait]
pub trait Ledger: Send + Sync {
    /// All entity records, in stored order.
    async fn list_entities(&self) -> Result<Vec<EntityRecord>>;

    /// One entity record by identity.
    async fn get_entity(&self, id: &EntityId) -> Result<Option<EntityRecord>>;

    /// Replace an entity's year-map and stamp `updated_at`.
    /// `website_url` is only written when given.
    async fn update_report_years(
        &self,
        id: &EntityId,
        years: &ReportYears,
        website_url: Option<&str>,
    ) -> Result<()>;

    /// Number of entity records.
    async fn count_entities(&self) -> Result<usize>;
}

#[async_trait]
impl Ledger for Storage {
    async fn list_entities(&self) -> Result<Vec<EntityRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities ORDER BY id"),
                params![],
            )
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?
        {
            results.push(row_to_entity(&row)?);
        }
        Ok(results)
    }

    async fn get_entity(&self, id: &EntityId) -> Result<Option<EntityRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE symbol = ?1 AND security = ?2"),
                params![id.symbol.as_str(), id.security.as_str()],
            )
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entity(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LedgerError::Storage(e.to_string())),
        }
    }

    async fn update_report_years(
        &self,
        id: &EntityId,
        years: &ReportYears,
        website_url: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let encoded = encode_years(years)?;
        let affected = self
            .conn
            .execute(
                "UPDATE entities SET
                   report_years = ?1,
                   updated_at = ?2,
                   website_url = COALESCE(?3, website_url)
                 WHERE symbol = ?4 AND security = ?5",
                params![
                    encoded.as_str(),
                    now.as_str(),
                    website_url,
                    id.symbol.as_str(),
                    id.security.as_str(),
                ],
            )
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(LedgerError::Storage(format!("no ledger record for {id}")));
        }
        Ok(())
    }

    async fn count_entities(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM entities", params![])
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
                Ok(count as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(LedgerError::Storage(e.to_string())),
        }
    }
}
