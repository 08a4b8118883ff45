//! End-to-end run: bootstrap → population pass → snapshot → refresh pass.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument, warn};

use csrledger_shared::{AppConfig, EntityId, Outcome, Result};
use csrledger_storage::{FsArchive, Ledger, Storage, TrackerFile};

use crate::batch::{BatchCoordinator, PassSummary, RefreshSummary};
use crate::gap::GapAnalyzer;
use crate::reconcile::ReconciliationEngine;

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before an entity is reconciled.
    fn entity_started(&self, id: &EntityId, current: usize, total: usize);
    /// Called after an entity is reconciled.
    fn entity_finished(&self, id: &EntityId, outcome: Outcome);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn entity_started(&self, _id: &EntityId, _current: usize, _total: usize) {}
    fn entity_finished(&self, _id: &EntityId, _outcome: Outcome) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub population: PassSummary,
    pub refresh: RefreshSummary,
    /// Snapshot file written, with the number of records in it.
    pub snapshot: Option<(PathBuf, usize)>,
    pub elapsed: std::time::Duration,
}

/// Everything a run needs, produced by [`bootstrap`].
pub struct Runtime {
    pub config: AppConfig,
    pub storage: Storage,
    pub archive: FsArchive,
    pub tracker: TrackerFile,
    pub engine: ReconciliationEngine,
}

/// Connect to the ledger and the archive, seed an empty ledger, and build
/// the strategy chain.
///
/// Fails with a connection error when either backend is unreachable.
#[instrument(skip_all)]
pub async fn bootstrap(config: AppConfig) -> Result<Runtime> {
    let db_path = PathBuf::from(&config.ledger.database_path);
    let storage = Storage::open(&db_path).await?;
    info!(path = %db_path.display(), "connected to ledger");

    let archive = FsArchive::connect(&config.archive)?;
    info!(root = %archive.root().display(), "connected to report archive");

    if storage.count_entities().await? == 0 {
        match config.ledger.seed_file.as_deref() {
            Some(seed) => {
                storage.import_seed(Path::new(seed)).await?;
            }
            None => warn!("ledger is empty and no seed file is configured"),
        }
    }

    let chain = csrledger_retrieval::default_chain(&config)?;
    info!(strategies = ?chain.names(), "strategy chain ready");

    let engine = ReconciliationEngine::new(chain, GapAnalyzer::new(config.batch.lookback_years));
    let tracker = TrackerFile::new(&config.tracker.path);

    Ok(Runtime {
        config,
        storage,
        archive,
        tracker,
        engine,
    })
}

impl Runtime {
    pub fn coordinator(&self) -> BatchCoordinator<'_> {
        BatchCoordinator::new(
            &self.storage,
            &self.archive,
            &self.tracker,
            &self.engine,
            self.config.batch.limit,
        )
    }

    /// One population pass, the optional snapshot export, then one refresh pass.
    #[instrument(skip_all, fields(current_year = current_year))]
    pub async fn run(
        &self,
        current_year: i32,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let coordinator = self.coordinator();

        progress.phase("Population pass");
        let population = coordinator.run_population_pass(current_year, progress).await?;

        let snapshot = match self.config.ledger.snapshot_file.as_deref() {
            Some(path) => {
                progress.phase("Exporting snapshot");
                let path = PathBuf::from(path);
                match self.storage.export_snapshot(&path).await {
                    Ok(count) => Some((path, count)),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "snapshot export failed");
                        None
                    }
                }
            }
            None => None,
        };

        progress.phase("Refresh pass");
        let refresh = coordinator.run_refresh_pass(current_year, progress).await?;

        let summary = RunSummary {
            population,
            refresh,
            snapshot,
            elapsed: start.elapsed(),
        };
        progress.done(&summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csrledger_shared::LedgerError;
    use tempfile::TempDir;

    fn tmp_config(dir: &TempDir) -> AppConfig {
        let dir = dir.path();
        let mut config = AppConfig::default();
        config.ledger.database_path = dir.join("ledger.db").to_string_lossy().to_string();
        config.archive.root = dir.join("reports").to_string_lossy().to_string();
        config.tracker.path = dir
            .join("populated_tracking.json")
            .to_string_lossy()
            .to_string();
        config
    }

    #[tokio::test]
    async fn bootstrap_imports_seed_into_empty_ledger() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = tmp_config(&tmp);
        let seed = tmp.path().join("seed_data.json");
        std::fs::write(
            &seed,
            r#"[{"symbol": "ACME", "security": "Acme Corp"}, {"symbol": "GLBX", "security": "Globex"}]"#,
        )
        .unwrap();
        config.ledger.seed_file = Some(seed.to_string_lossy().to_string());

        let runtime = bootstrap(config.clone()).await.expect("bootstrap");
        assert_eq!(runtime.storage.count_entities().await.unwrap(), 2);
        assert_eq!(runtime.engine.chain().names(), vec!["site-crawler", "search-api"]);
        drop(runtime);

        // A second bootstrap leaves the populated ledger alone
        std::fs::write(&seed, "not json").unwrap();
        let runtime = bootstrap(config).await.expect("second bootstrap");
        assert_eq!(runtime.storage.count_entities().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bootstrap_fails_on_unusable_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = tmp_config(&tmp);
        // A regular file where the archive root directory should be
        let blocker = tmp.path().join("reports");
        std::fs::write(&blocker, b"").unwrap();
        config.archive.root = blocker.to_string_lossy().to_string();

        match bootstrap(config).await {
            Err(LedgerError::Connection { backend, .. }) => assert_eq!(backend, "archive"),
            Err(other) => panic!("expected connection error, got {other}"),
            Ok(_) => panic!("expected connection error"),
        }
    }
}
