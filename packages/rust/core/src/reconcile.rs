//! Per-entity reconciliation: look up every missing year through the
//! strategy chain and merge the answers into a fresh year-map.
//!
//! The input record is never touched. All changes land in a private
//! working copy returned in [`Reconciliation`], which the caller persists
//! only when `dirty` is set.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use csrledger_retrieval::{ChainOutcome, LocateQuery, StrategyChain};
use csrledger_shared::{EntityRecord, Outcome, ReconciliationStatus, ReportYears, YearEntry};

use crate::gap::GapAnalyzer;

/// Result of reconciling one entity.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Merged year-map: input plus every year resolved or confirmed absent.
    pub report_years: ReportYears,
    /// Page that linked the current-year report, when a strategy returned one.
    pub website_url: Option<String>,
    /// Whether anything differs from the stored record.
    pub dirty: bool,
    /// Status record. `run_id` is left nil for the caller to stamp.
    pub status: ReconciliationStatus,
}

/// Drives gap analysis and the strategy chain for one entity at a time.
pub struct ReconciliationEngine {
    chain: StrategyChain,
    analyzer: GapAnalyzer,
}

impl ReconciliationEngine {
    pub fn new(chain: StrategyChain, analyzer: GapAnalyzer) -> Self {
        Self { chain, analyzer }
    }

    pub fn chain(&self) -> &StrategyChain {
        &self.chain
    }

    /// Resolve every missing year of the entity's window, oldest first.
    #[instrument(skip_all, fields(entity = %entity.id, current_year = current_year))]
    pub async fn reconcile(&self, entity: &EntityRecord, current_year: i32) -> Reconciliation {
        let date_init = Utc::now();
        let gaps = self.analyzer.analyze(&entity.report_years, current_year);
        debug!(
            window_start = gaps.window_start,
            missing = ?gaps.missing,
            "gap analysis done"
        );

        self.resolve_years(entity, gaps.window_start, &gaps.missing, current_year, date_init)
            .await
    }

    /// Look up only the current year, unless it is already resolved.
    #[instrument(skip_all, fields(entity = %entity.id, current_year = current_year))]
    pub async fn refresh_latest(&self, entity: &EntityRecord, current_year: i32) -> Reconciliation {
        let date_init = Utc::now();
        let wanted = if entity.report_years.is_resolved(current_year) {
            Vec::new()
        } else {
            vec![current_year]
        };

        self.resolve_years(entity, current_year, &wanted, current_year, date_init)
            .await
    }

    async fn resolve_years(
        &self,
        entity: &EntityRecord,
        window_start: i32,
        years: &[i32],
        current_year: i32,
        date_init: DateTime<Utc>,
    ) -> Reconciliation {
        let mut working = entity.report_years.clone();
        let mut website_url: Option<String> = None;
        let mut missing = Vec::new();
        let mut deferred = Vec::new();

        for &year in years {
            let query = LocateQuery::for_entity(entity, year);
            match self.chain.locate(&query, current_year).await {
                ChainOutcome::Resolved {
                    strategy,
                    document_url,
                    page_url,
                } => {
                    debug!(year, %strategy, "year resolved");
                    working.resolve(year, document_url);
                    if page_url.is_some() {
                        website_url = page_url;
                    }
                }
                // The live site may still publish this year's report
                ChainOutcome::NotFound | ChainOutcome::Faulted(_) if year == current_year => {
                    info!(year, "current-year report not found yet");
                    missing.push(year);
                }
                ChainOutcome::NotFound => {
                    info!(year, "no report exists, marking year absent");
                    working.set(year, YearEntry::ConfirmedAbsent);
                    missing.push(year);
                }
                ChainOutcome::Faulted(faults) => {
                    info!(
                        year,
                        faults = faults.len(),
                        "lookup faulted, year left for a later run"
                    );
                    deferred.push(year);
                }
            }
        }

        let website_changed = website_url
            .as_deref()
            .is_some_and(|url| entity.website_url.as_deref() != Some(url));
        let dirty = working != entity.report_years || website_changed;

        let outcome = if missing.is_empty() {
            Outcome::Processed
        } else {
            Outcome::ProcessedWithGaps
        };

        let status = ReconciliationStatus {
            id: entity.id.clone(),
            run_id: Uuid::nil(),
            date_init,
            earliest_report: Some(window_start),
            latest_report: working.latest_resolved(),
            missing_reports: missing,
            deferred_reports: deferred,
            status: outcome,
        };

        info!(
            status = %status.status,
            missing = status.missing_reports.len(),
            deferred = status.deferred_reports.len(),
            dirty,
            "entity reconciled"
        );

        Reconciliation {
            report_years: working,
            website_url,
            dirty,
            status,
        }
    }
}
