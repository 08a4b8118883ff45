//! Shared types, error model, and configuration for csrledger.
//!
//! This crate is the foundation depended on by all other csrledger crates.
//! It provides:
//! - [`LedgerError`] and [`RetrievalFault`]: the error taxonomy
//! - Domain types ([`EntityId`], [`EntityRecord`], [`ReportYears`], [`ReconciliationStatus`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArchiveConfig, BatchConfig, CrawlerConfig, LedgerConfig, SearchApiConfig,
    TrackerConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{LedgerError, Result, RetrievalFault};
pub use types::{
    EntityId, EntityRecord, Outcome, ReconciliationStatus, ReportYears, YearEntry,
};
