//! Batch coordination: pick the entities still lacking a completed
//! reconciliation, reconcile them one after another, persist the results.
//!
//! Entities are processed sequentially. Both strategies hit rate-limited
//! external services, and the search API has a fixed daily quota.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use csrledger_shared::{
    EntityId, EntityRecord, LedgerError, Outcome, ReconciliationStatus, Result,
};
use csrledger_storage::{Ledger, ReportArchive, TrackerFile, UploadReceipt};

use crate::pipeline::ProgressReporter;
use crate::reconcile::ReconciliationEngine;

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Counts from one population pass.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    /// Identifier stamped on every status record of the pass.
    pub run_id: Uuid,
    /// Entities reconciled with no remaining gap.
    pub processed: usize,
    /// Entities reconciled with at least one missing year.
    pub processed_with_gaps: usize,
    /// Entities whose reconciliation failed.
    pub errored: usize,
    /// Entities still without a completed reconciliation after the pass.
    pub pending: usize,
    /// Tracker entries dropped because their entity left the ledger.
    pub pruned: usize,
    /// Report documents newly archived.
    pub uploaded: usize,
    /// Documents (or whole entities) the archive could not take.
    pub upload_failures: usize,
    pub elapsed: Duration,
}

impl PassSummary {
    pub fn reconciled(&self) -> usize {
        self.processed + self.processed_with_gaps + self.errored
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Processed => self.processed += 1,
            Outcome::ProcessedWithGaps => self.processed_with_gaps += 1,
            Outcome::Error => self.errored += 1,
        }
    }

    fn record_upload(&mut self, receipt: &UploadReceipt) {
        self.uploaded += receipt.stored;
        self.upload_failures += receipt.failed.len();
    }
}

/// Counts from one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    /// Entities whose current year was looked up.
    pub checked: usize,
    /// Entities whose current year was already resolved.
    pub skipped: usize,
    /// Lookups that resolved the current year.
    pub resolved: usize,
    /// Lookups that left the current year unresolved.
    pub still_missing: usize,
    /// Entities whose update could not be written.
    pub errored: usize,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Drop tracker entries whose entity no longer exists in the ledger.
///
/// Returns the rebuilt list and the number of entries removed.
pub fn prune_tracker(
    entries: Vec<ReconciliationStatus>,
    entities: &[EntityRecord],
) -> (Vec<ReconciliationStatus>, usize) {
    let known: HashSet<&EntityId> = entities.iter().map(|e| &e.id).collect();
    let before = entries.len();

    let kept: Vec<ReconciliationStatus> = entries
        .into_iter()
        .filter(|entry| {
            let keep = known.contains(&entry.id);
            if !keep {
                warn!(entity = %entry.id, "entity left the ledger, dropping its tracker history");
            }
            keep
        })
        .collect();

    let pruned = before - kept.len();
    (kept, pruned)
}

/// Identities with a completed (`processed` / `processed_with_gaps`) entry.
fn completed_ids(entries: &[ReconciliationStatus]) -> HashSet<&EntityId> {
    entries
        .iter()
        .filter(|entry| entry.status.is_complete())
        .map(|entry| &entry.id)
        .collect()
}

/// Up to `limit` entities, in ledger order, without a completed tracker entry.
pub fn select_batch(
    entities: &[EntityRecord],
    entries: &[ReconciliationStatus],
    limit: usize,
) -> Vec<EntityRecord> {
    let done = completed_ids(entries);
    entities
        .iter()
        .filter(|entity| !done.contains(&entity.id))
        .take(limit)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Runs population and refresh passes over a ledger.
pub struct BatchCoordinator<'a> {
    ledger: &'a dyn Ledger,
    archive: &'a dyn ReportArchive,
    tracker: &'a TrackerFile,
    engine: &'a ReconciliationEngine,
    limit: usize,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(
        ledger: &'a dyn Ledger,
        archive: &'a dyn ReportArchive,
        tracker: &'a TrackerFile,
        engine: &'a ReconciliationEngine,
        limit: usize,
    ) -> Self {
        Self {
            ledger,
            archive,
            tracker,
            engine,
            limit,
        }
    }

    /// Reconcile the next batch of unprocessed entities.
    ///
    /// The tracker is saved after every entity, so a run stopped between
    /// entities keeps the work already done.
    #[instrument(skip_all, fields(current_year = current_year, limit = self.limit))]
    pub async fn run_population_pass(
        &self,
        current_year: i32,
        progress: &dyn ProgressReporter,
    ) -> Result<PassSummary> {
        let start = Instant::now();
        let run_id = Uuid::now_v7();
        let mut summary = PassSummary {
            run_id,
            ..PassSummary::default()
        };

        let entities = self.ledger.list_entities().await?;
        let (mut entries, pruned) = prune_tracker(self.tracker.load()?, &entities);
        summary.pruned = pruned;
        if pruned > 0 {
            self.tracker.save(&entries)?;
        }

        let pending_before = {
            let done = completed_ids(&entries);
            entities.iter().filter(|e| !done.contains(&e.id)).count()
        };
        info!(
            %run_id,
            entities = entities.len(),
            pending = pending_before,
            pruned,
            "population pass starting"
        );

        let batch = select_batch(&entities, &entries, self.limit);
        if batch.is_empty() {
            info!("every entity already processed, nothing to do");
            summary.elapsed = start.elapsed();
            return Ok(summary);
        }

        let total = batch.len();
        for (i, record) in batch.iter().enumerate() {
            progress.entity_started(&record.id, i + 1, total);

            let status = self.process_entity(record, current_year, run_id).await;
            summary.record(status.status);
            progress.entity_finished(&record.id, status.status);

            entries.push(status);
            self.tracker.save(&entries)?;

            match self.upload(&record.id).await {
                Ok(receipt) => summary.record_upload(&receipt),
                Err(e) => {
                    warn!(entity = %record.id, error = %e, "archive upload skipped");
                    summary.upload_failures += 1;
                }
            }
        }

        summary.pending =
            pending_before.saturating_sub(summary.processed + summary.processed_with_gaps);
        summary.elapsed = start.elapsed();

        info!(
            %run_id,
            processed = summary.processed,
            processed_with_gaps = summary.processed_with_gaps,
            errored = summary.errored,
            pending = summary.pending,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "population pass finished"
        );
        Ok(summary)
    }

    /// Look up the current year of every ledger entity still lacking it.
    /// Does not touch the tracker.
    #[instrument(skip_all, fields(current_year = current_year))]
    pub async fn run_refresh_pass(
        &self,
        current_year: i32,
        progress: &dyn ProgressReporter,
    ) -> Result<RefreshSummary> {
        let start = Instant::now();
        let mut summary = RefreshSummary::default();

        let entities = self.ledger.list_entities().await?;
        info!(entities = entities.len(), "refresh pass starting");

        let total = entities.len();
        for (i, record) in entities.iter().enumerate() {
            progress.entity_started(&record.id, i + 1, total);

            if record.report_years.is_resolved(current_year) {
                debug!(entity = %record.id, "current year already resolved");
                summary.skipped += 1;
                progress.entity_finished(&record.id, Outcome::Processed);
                continue;
            }

            summary.checked += 1;
            let result = self.engine.refresh_latest(record, current_year).await;

            if result.dirty {
                if let Err(e) = self
                    .ledger
                    .update_report_years(&record.id, &result.report_years, result.website_url.as_deref())
                    .await
                {
                    error!(entity = %record.id, error = %e, "refresh update failed");
                    summary.errored += 1;
                    progress.entity_finished(&record.id, Outcome::Error);
                    continue;
                }
            }

            if result.report_years.is_resolved(current_year) {
                summary.resolved += 1;
            } else {
                summary.still_missing += 1;
            }
            progress.entity_finished(&record.id, result.status.status);
        }

        summary.elapsed = start.elapsed();
        info!(
            checked = summary.checked,
            resolved = summary.resolved,
            still_missing = summary.still_missing,
            errored = summary.errored,
            "refresh pass finished"
        );
        Ok(summary)
    }

    /// Reconcile and persist one entity. Never fails: any error becomes an
    /// `error` status so the batch carries on.
    async fn process_entity(
        &self,
        record: &EntityRecord,
        current_year: i32,
        run_id: Uuid,
    ) -> ReconciliationStatus {
        let date_init = Utc::now();
        match self.reconcile_and_persist(record, current_year, run_id).await {
            Ok(status) => status,
            Err(e) => {
                error!(entity = %record.id, error = %e, "entity reconciliation failed");
                ReconciliationStatus::failed(record.id.clone(), run_id, date_init)
            }
        }
    }

    async fn reconcile_and_persist(
        &self,
        record: &EntityRecord,
        current_year: i32,
        run_id: Uuid,
    ) -> Result<ReconciliationStatus> {
        let result = self.engine.reconcile(record, current_year).await;

        if result.dirty {
            self.ledger
                .update_report_years(&record.id, &result.report_years, result.website_url.as_deref())
                .await?;
            debug!(entity = %record.id, "year-map written");
        } else {
            debug!(entity = %record.id, "year-map unchanged, no write");
        }

        let mut status = result.status;
        status.run_id = run_id;
        Ok(status)
    }

    /// Hand the stored record to the archive, whatever its outcome.
    async fn upload(&self, id: &EntityId) -> Result<UploadReceipt> {
        let record = self
            .ledger
            .get_entity(id)
            .await?
            .ok_or_else(|| LedgerError::validation(format!("{id} is no longer in the ledger")))?;
        self.archive.upload(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::GapAnalyzer;
    use crate::pipeline::SilentProgress;
    use crate::testing::{MemoryArchive, MemoryLedger, ScriptedStrategy, found};
    use csrledger_retrieval::StrategyChain;
    use csrledger_shared::YearEntry;
    use tempfile::TempDir;

    fn entity(symbol: &str, name: &str) -> EntityRecord {
        EntityRecord::new(EntityId::new(symbol, name))
    }

    fn status(record: &EntityRecord, outcome: Outcome) -> ReconciliationStatus {
        let mut s = ReconciliationStatus::failed(record.id.clone(), Uuid::nil(), Utc::now());
        s.status = outcome;
        s
    }

    fn tmp_tracker() -> (TempDir, TrackerFile) {
        let dir = tempfile::tempdir().expect("temp dir");
        let tracker = TrackerFile::new(dir.path().join("populated_tracking.json"));
        (dir, tracker)
    }

    /// Search resolves every year for every entity.
    fn resolving_engine() -> ReconciliationEngine {
        let mut search = ScriptedStrategy::new("search");
        for year in 2020..=2025 {
            search = search.answer(year, found(&format!("https://cdn.example/{year}.pdf")));
        }
        ReconciliationEngine::new(
            StrategyChain::new(vec![
                Box::new(ScriptedStrategy::current_year_only("crawler")),
                Box::new(search),
            ]),
            GapAnalyzer::default(),
        )
    }

    #[test]
    fn select_batch_all_tracked_is_empty() {
        let entities: Vec<EntityRecord> = (0..10)
            .map(|i| entity(&format!("S{i}"), &format!("Company {i}")))
            .collect();
        let entries: Vec<ReconciliationStatus> = entities
            .iter()
            .map(|e| status(e, Outcome::Processed))
            .collect();

        assert!(select_batch(&entities, &entries, 10).is_empty());
    }

    #[test]
    fn select_batch_respects_order_and_limit() {
        let entities: Vec<EntityRecord> = (0..6)
            .map(|i| entity(&format!("S{i}"), &format!("Company {i}")))
            .collect();
        let entries = vec![
            status(&entities[0], Outcome::Processed),
            status(&entities[2], Outcome::ProcessedWithGaps),
        ];

        let batch = select_batch(&entities, &entries, 3);
        let symbols: Vec<&str> = batch.iter().map(|e| e.id.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["S1", "S3", "S4"]);
    }

    #[test]
    fn select_batch_retries_errored_entities() {
        let entities = vec![entity("A", "Alpha"), entity("B", "Beta")];
        let entries = vec![
            status(&entities[0], Outcome::Error),
            status(&entities[1], Outcome::Processed),
        ];

        let batch = select_batch(&entities, &entries, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id.symbol, "A");
    }

    #[test]
    fn select_batch_matches_on_symbol_and_name() {
        let entities = vec![entity("A", "Alpha Inc")];
        let entries = vec![status(&entity("A", "Alpha Holdings"), Outcome::Processed)];
        assert_eq!(select_batch(&entities, &entries, 10).len(), 1);
    }

    #[test]
    fn prune_drops_vanished_entities() {
        let entities = vec![entity("A", "Alpha"), entity("B", "Beta")];
        let entries = vec![
            status(&entities[0], Outcome::Processed),
            status(&entity("GONE", "Gone Corp"), Outcome::Processed),
            status(&entities[1], Outcome::Error),
            status(&entity("GONE", "Gone Corp"), Outcome::Error),
        ];

        let (kept, pruned) = prune_tracker(entries, &entities);
        assert_eq!(pruned, 2);
        let symbols: Vec<&str> = kept.iter().map(|e| e.id.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn entity_fault_does_not_stop_the_batch() {
        let first = entity("FAIL", "Failing Corp");
        let second = entity("OK", "Working Corp");
        let ledger =
            MemoryLedger::with(vec![first.clone(), second.clone()]).failing_writes_for("FAIL");
        let archive = MemoryArchive::default();
        let (_dir, tracker) = tmp_tracker();
        let engine = resolving_engine();

        let coordinator = BatchCoordinator::new(&ledger, &archive, &tracker, &engine, 10);
        let summary = coordinator
            .run_population_pass(2025, &SilentProgress)
            .await
            .expect("pass");

        assert_eq!(summary.errored, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.pending, 1);

        let entries = tracker.load().expect("tracker");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, Outcome::Error);
        assert_eq!(entries[0].earliest_report, None);
        assert_eq!(entries[0].latest_report, None);
        assert_eq!(entries[1].id, second.id);
        assert_eq!(entries[1].status, Outcome::Processed);
        assert_eq!(entries[1].run_id, summary.run_id);
        assert_eq!(entries[1].latest_report, Some(2025));

        let stored = ledger.record(&second.id).expect("present");
        assert!(stored.report_years.is_resolved(2023));
        assert!(stored.updated_at.is_some());

        // Uploads run for both entities, whatever the outcome
        assert_eq!(archive.uploaded().len(), 2);
        assert_eq!(summary.uploaded, 3);
    }

    #[tokio::test]
    async fn pass_prunes_and_skips_completed() {
        let kept = entity("KEEP", "Keep Corp");
        let fresh = entity("NEW", "New Corp");
        let ledger = MemoryLedger::with(vec![kept.clone(), fresh.clone()]);
        let archive = MemoryArchive::default();
        let (_dir, tracker) = tmp_tracker();
        tracker
            .save(&[
                status(&kept, Outcome::Processed),
                status(&entity("GONE", "Gone Corp"), Outcome::Processed),
            ])
            .unwrap();
        let engine = resolving_engine();

        let coordinator = BatchCoordinator::new(&ledger, &archive, &tracker, &engine, 10);
        let summary = coordinator
            .run_population_pass(2025, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.pruned, 1);
        assert_eq!(summary.reconciled(), 1);
        assert_eq!(summary.pending, 0);

        let symbols: Vec<String> = tracker
            .load()
            .unwrap()
            .into_iter()
            .map(|e| e.id.symbol)
            .collect();
        assert_eq!(symbols, vec!["KEEP", "NEW"]);

        // A second pass finds nothing left to do
        let again = coordinator
            .run_population_pass(2025, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(again.reconciled(), 0);
        assert_eq!(tracker.load().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_map_is_not_written() {
        let mut record = entity("ACME", "Acme Corp");
        for year in 2023..=2025 {
            record.report_years.resolve(year, format!("https://cdn.example/{year}.pdf"));
        }
        // Writes would fail, so success proves no write was attempted
        let ledger = MemoryLedger::with(vec![record.clone()]).failing_writes_for("ACME");
        let archive = MemoryArchive::default();
        let (_dir, tracker) = tmp_tracker();
        let engine = resolving_engine();

        let coordinator = BatchCoordinator::new(&ledger, &archive, &tracker, &engine, 10);
        let summary = coordinator
            .run_population_pass(2025, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errored, 0);
    }

    #[tokio::test]
    async fn vanished_entity_upload_is_counted_as_failure() {
        let record = entity("ACME", "Acme Corp");
        let ledger = MemoryLedger::with(vec![record.clone()]);
        let archive = MemoryArchive::default();
        let (_dir, tracker) = tmp_tracker();
        let engine = resolving_engine();
        let coordinator = BatchCoordinator::new(&ledger, &archive, &tracker, &engine, 10);

        ledger.remove(&record.id);
        assert!(coordinator.upload(&record.id).await.is_err());
        assert!(archive.uploaded().is_empty());
    }

    #[tokio::test]
    async fn refresh_pass_fills_current_year_only() {
        let mut done = entity("DONE", "Done Corp");
        done.report_years.resolve(2025, "https://cdn.example/done-2025.pdf");
        let mut stale = entity("STALE", "Stale Corp");
        stale.report_years.resolve(2019, "https://cdn.example/stale-2019.pdf");

        let ledger = MemoryLedger::with(vec![done.clone(), stale.clone()]);
        let archive = MemoryArchive::default();
        let (_dir, tracker) = tmp_tracker();
        let engine = resolving_engine();

        let coordinator = BatchCoordinator::new(&ledger, &archive, &tracker, &engine, 10);
        let summary = coordinator
            .run_refresh_pass(2025, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.resolved, 1);

        let stored = ledger.record(&stale.id).unwrap();
        assert!(stored.report_years.is_resolved(2025));
        assert_eq!(stored.report_years.get(2020), YearEntry::Unknown);

        assert!(!tracker.path().exists());
        assert!(archive.uploaded().is_empty());
    }
}
