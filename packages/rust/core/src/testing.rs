//! In-memory fakes for the ledger, archive and strategies.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use csrledger_retrieval::{LocateQuery, Located, RetrievalStrategy};
use csrledger_shared::{EntityId, EntityRecord, LedgerError, ReportYears, Result, RetrievalFault};
use csrledger_storage::{Ledger, ReportArchive, UploadReceipt};

pub(crate) fn found(url: &str) -> std::result::Result<Located, RetrievalFault> {
    Ok(Located::Found {
        document_url: url.into(),
        page_url: None,
    })
}

pub(crate) fn found_on_page(url: &str, page: &str) -> std::result::Result<Located, RetrievalFault> {
    Ok(Located::Found {
        document_url: url.into(),
        page_url: Some(page.into()),
    })
}

/// Strategy answering from a per-year script; unscripted years are `NotFound`.
pub(crate) struct ScriptedStrategy {
    name: &'static str,
    current_only: bool,
    answers: HashMap<i32, std::result::Result<Located, RetrievalFault>>,
    log: Arc<Mutex<Vec<i32>>>,
}

impl ScriptedStrategy {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            current_only: false,
            answers: HashMap::new(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn current_year_only(name: &'static str) -> Self {
        Self {
            current_only: true,
            ..Self::new(name)
        }
    }

    pub(crate) fn answer(
        mut self,
        year: i32,
        answer: std::result::Result<Located, RetrievalFault>,
    ) -> Self {
        self.answers.insert(year, answer);
        self
    }

    /// Years this strategy was asked for, in call order.
    pub(crate) fn log(&self) -> Arc<Mutex<Vec<i32>>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl RetrievalStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn applies_to(&self, year: i32, current_year: i32) -> bool {
        !self.current_only || year == current_year
    }

    async fn locate(&self, query: &LocateQuery) -> std::result::Result<Located, RetrievalFault> {
        self.log.lock().unwrap().push(query.year);
        self.answers
            .get(&query.year)
            .cloned()
            .unwrap_or(Ok(Located::NotFound))
    }
}

/// Ledger kept in a `Vec`, optionally failing writes for some symbols.
#[derive(Default)]
pub(crate) struct MemoryLedger {
    records: Mutex<Vec<EntityRecord>>,
    failing_symbols: HashSet<String>,
}

impl MemoryLedger {
    pub(crate) fn with(records: Vec<EntityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            failing_symbols: HashSet::new(),
        }
    }

    pub(crate) fn failing_writes_for(mut self, symbol: &str) -> Self {
        self.failing_symbols.insert(symbol.to_string());
        self
    }

    pub(crate) fn record(&self, id: &EntityId) -> Option<EntityRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    pub(crate) fn remove(&self, id: &EntityId) {
        self.records.lock().unwrap().retain(|r| &r.id != id);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn list_entities(&self) -> Result<Vec<EntityRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn get_entity(&self, id: &EntityId) -> Result<Option<EntityRecord>> {
        Ok(self.record(id))
    }

    async fn update_report_years(
        &self,
        id: &EntityId,
        years: &ReportYears,
        website_url: Option<&str>,
    ) -> Result<()> {
        if self.failing_symbols.contains(&id.symbol) {
            return Err(LedgerError::Storage(format!("write rejected for {id}")));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| LedgerError::Storage(format!("no entity {id}")))?;
        record.report_years = years.clone();
        if let Some(url) = website_url {
            record.website_url = Some(url.to_string());
        }
        record.updated_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn count_entities(&self) -> Result<usize> {
        Ok(self.records.lock().unwrap().len())
    }
}

/// Archive that remembers what it was given.
#[derive(Default)]
pub(crate) struct MemoryArchive {
    uploads: Mutex<Vec<EntityRecord>>,
}

impl MemoryArchive {
    pub(crate) fn uploaded(&self) -> Vec<EntityRecord> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportArchive for MemoryArchive {
    async fn upload(&self, record: &EntityRecord) -> Result<UploadReceipt> {
        self.uploads.lock().unwrap().push(record.clone());
        Ok(UploadReceipt {
            stored: record.report_years.resolved().count(),
            ..UploadReceipt::default()
        })
    }
}
