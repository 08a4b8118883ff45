//! Core domain types: entities, their per-year report map, and the
//! status record produced by each reconciliation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Identity of a tracked business: ticker symbol plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// Short ticker-like code.
    pub symbol: String,
    /// Display name of the security.
    pub security: String,
}

impl EntityId {
    pub fn new(symbol: impl Into<String>, security: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            security: security.into(),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.symbol, self.security)
    }
}

// ---------------------------------------------------------------------------
// YearEntry / ReportYears
// ---------------------------------------------------------------------------

/// What the ledger knows about one fiscal year of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearEntry {
    /// Never checked, or checked and the lookup faulted.
    Unknown,
    /// Checked, and no report exists.
    ConfirmedAbsent,
    /// Report located at this URL. Never re-fetched.
    Resolved(String),
}

impl YearEntry {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Per-entity map from fiscal year to [`YearEntry`].
///
/// `Unknown` is represented by absence; the persisted form maps year strings
/// to a URL, or to `""` for a confirmed absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct ReportYears {
    entries: BTreeMap<i32, YearEntry>,
}

impl ReportYears {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a year. Years never recorded are `Unknown`.
    pub fn get(&self, year: i32) -> YearEntry {
        self.entries.get(&year).cloned().unwrap_or(YearEntry::Unknown)
    }

    /// Record a year. Setting `Unknown` forgets the year.
    pub fn set(&mut self, year: i32, entry: YearEntry) {
        match entry {
            YearEntry::Unknown => {
                self.entries.remove(&year);
            }
            other => {
                self.entries.insert(year, other);
            }
        }
    }

    /// Shorthand for `set(year, YearEntry::Resolved(url))`.
    pub fn resolve(&mut self, year: i32, url: impl Into<String>) {
        self.set(year, YearEntry::Resolved(url.into()));
    }

    pub fn is_resolved(&self, year: i32) -> bool {
        self.entries.get(&year).is_some_and(YearEntry::is_resolved)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Smallest recorded year, resolved or not.
    pub fn earliest_year(&self) -> Option<i32> {
        self.entries.keys().next().copied()
    }

    /// Largest recorded year, resolved or not.
    pub fn latest_year(&self) -> Option<i32> {
        self.entries.keys().next_back().copied()
    }

    /// Largest year holding a resolved reference.
    pub fn latest_resolved(&self) -> Option<i32> {
        self.entries
            .iter()
            .rev()
            .find(|(_, entry)| entry.is_resolved())
            .map(|(year, _)| *year)
    }

    /// Iterate resolved `(year, url)` pairs in ascending year order.
    pub fn resolved(&self) -> impl Iterator<Item = (i32, &str)> {
        self.entries.iter().filter_map(|(year, entry)| match entry {
            YearEntry::Resolved(url) => Some((*year, url.as_str())),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &YearEntry)> {
        self.entries.iter().map(|(year, entry)| (*year, entry))
    }
}

impl TryFrom<BTreeMap<String, String>> for ReportYears {
    type Error = LedgerError;

    fn try_from(raw: BTreeMap<String, String>) -> std::result::Result<Self, Self::Error> {
        let mut years = ReportYears::new();
        for (key, value) in raw {
            let year: i32 = key
                .trim()
                .parse()
                .map_err(|_| LedgerError::validation(format!("invalid report year key '{key}'")))?;
            let entry = if value.is_empty() {
                YearEntry::ConfirmedAbsent
            } else {
                YearEntry::Resolved(value)
            };
            years.set(year, entry);
        }
        Ok(years)
    }
}

impl From<ReportYears> for BTreeMap<String, String> {
    fn from(years: ReportYears) -> Self {
        years
            .entries
            .into_iter()
            .filter_map(|(year, entry)| match entry {
                YearEntry::Unknown => None,
                YearEntry::ConfirmedAbsent => Some((year.to_string(), String::new())),
                YearEntry::Resolved(url) => Some((year.to_string(), url)),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// One ledger record: an entity and its per-year report map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub id: EntityId,
    /// Corporate website, used as the crawl starting point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default)]
    pub report_years: ReportYears,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            website_url: None,
            report_years: ReportYears::new(),
            updated_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconciliationStatus
// ---------------------------------------------------------------------------

/// Terminal outcome of one entity's reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Processed,
    ProcessedWithGaps,
    Error,
}

impl Outcome {
    /// Whether the entity counts as done for batch selection.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Processed | Self::ProcessedWithGaps)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Processed => "processed",
            Self::ProcessedWithGaps => "processed_with_gaps",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Audit record produced once per entity per population pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationStatus {
    #[serde(flatten)]
    pub id: EntityId,
    /// Identifier of the pass that produced this record.
    #[serde(default = "Uuid::nil")]
    pub run_id: Uuid,
    /// When reconciliation of this entity started.
    pub date_init: DateTime<Utc>,
    /// First year of the window considered.
    pub earliest_report: Option<i32>,
    /// Largest year with a resolved reference after the run.
    pub latest_report: Option<i32>,
    /// Years still unresolved after every strategy was tried, ascending.
    #[serde(default)]
    pub missing_reports: Vec<i32>,
    /// Past years whose lookup faulted; left unknown for a later run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred_reports: Vec<i32>,
    pub status: Outcome,
}

impl ReconciliationStatus {
    /// Status for an entity whose processing failed outright.
    pub fn failed(id: EntityId, run_id: Uuid, date_init: DateTime<Utc>) -> Self {
        Self {
            id,
            run_id,
            date_init,
            earliest_report: None,
            latest_report: None,
            missing_reports: Vec::new(),
            deferred_reports: Vec::new(),
            status: Outcome::Error,
        }
    }
}
