//! Strategy trait and the ordered fallback chain.
//!
//! A strategy answers one question: where is this entity's report for this
//! year? It either finds a document, reports that none exists, or faults.
//! The chain tries applicable strategies in order and never retries.

use async_trait::async_trait;
use csrledger_shared::{EntityRecord, RetrievalFault};
use tracing::{debug, info, warn};

/// Input to a strategy lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateQuery {
    /// Display name used in searches.
    pub entity_name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Fiscal year wanted.
    pub year: i32,
    /// Known corporate or sustainability page to start crawling from.
    pub website_url: Option<String>,
}

impl LocateQuery {
    pub fn for_entity(record: &EntityRecord, year: i32) -> Self {
        Self {
            entity_name: record.id.security.clone(),
            symbol: record.id.symbol.clone(),
            year,
            website_url: record.website_url.clone(),
        }
    }
}

/// A strategy's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// Report document found, optionally with the page that linked it.
    Found {
        document_url: String,
        page_url: Option<String>,
    },
    /// The strategy looked and there is no report.
    NotFound,
}

/// One way of locating report documents.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether this strategy can answer for `year` during a run in `current_year`.
    fn applies_to(&self, _year: i32, _current_year: i32) -> bool {
        true
    }

    /// Look for the report described by `query`.
    async fn locate(&self, query: &LocateQuery) -> Result<Located, RetrievalFault>;
}

/// Combined answer of a [`StrategyChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// A strategy found the document.
    Resolved {
        strategy: String,
        document_url: String,
        page_url: Option<String>,
    },
    /// Every applicable strategy answered `NotFound`.
    NotFound,
    /// Nothing was found and at least one strategy faulted. Empty when no
    /// strategy applied to the year.
    Faulted(Vec<(String, RetrievalFault)>),
}

/// Ordered list of strategies tried until one finds a document.
pub struct StrategyChain {
    strategies: Vec<Box<dyn RetrievalStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn RetrievalStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try every strategy applicable to `query.year`, in order.
    pub async fn locate(&self, query: &LocateQuery, current_year: i32) -> ChainOutcome {
        let mut faults: Vec<(String, RetrievalFault)> = Vec::new();
        let mut attempted = 0usize;

        for strategy in &self.strategies {
            if !strategy.applies_to(query.year, current_year) {
                continue;
            }
            attempted += 1;

            match strategy.locate(query).await {
                Ok(Located::Found {
                    document_url,
                    page_url,
                }) => {
                    info!(
                        entity = %query.entity_name,
                        year = query.year,
                        strategy = strategy.name(),
                        %document_url,
                        "report located"
                    );
                    return ChainOutcome::Resolved {
                        strategy: strategy.name().to_string(),
                        document_url,
                        page_url,
                    };
                }
                Ok(Located::NotFound) => {
                    debug!(
                        entity = %query.entity_name,
                        year = query.year,
                        strategy = strategy.name(),
                        "no report found"
                    );
                }
                Err(fault) if fault.is_expected() => {
                    warn!(
                        entity = %query.entity_name,
                        year = query.year,
                        strategy = strategy.name(),
                        reason = %fault,
                        "strategy unavailable"
                    );
                    faults.push((strategy.name().to_string(), fault));
                }
                Err(fault) => {
                    warn!(
                        entity = %query.entity_name,
                        year = query.year,
                        strategy = strategy.name(),
                        error = %fault,
                        "strategy faulted"
                    );
                    faults.push((strategy.name().to_string(), fault));
                }
            }
        }

        if attempted == 0 {
            warn!(year = query.year, "no strategy applies to this year");
            return ChainOutcome::Faulted(faults);
        }

        if faults.is_empty() {
            ChainOutcome::NotFound
        } else {
            ChainOutcome::Faulted(faults)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        current_only: bool,
        answer: Result<Located, RetrievalFault>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, answer: Result<Located, RetrievalFault>) -> Self {
            Self {
                name,
                current_only: false,
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RetrievalStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to(&self, year: i32, current_year: i32) -> bool {
            !self.current_only || year == current_year
        }

        async fn locate(&self, _query: &LocateQuery) -> Result<Located, RetrievalFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn found(url: &str) -> Result<Located, RetrievalFault> {
        Ok(Located::Found {
            document_url: url.into(),
            page_url: None,
        })
    }

    fn query(year: i32) -> LocateQuery {
        LocateQuery {
            entity_name: "Acme Corp".into(),
            symbol: "ACME".into(),
            year,
            website_url: None,
        }
    }

    #[tokio::test]
    async fn first_hit_wins() {
        let chain = StrategyChain::new(vec![
            Box::new(Fixed::new("a", found("https://a/r.pdf"))),
            Box::new(Fixed::new("b", found("https://b/r.pdf"))),
        ]);

        let outcome = chain.locate(&query(2025), 2025).await;
        assert_eq!(
            outcome,
            ChainOutcome::Resolved {
                strategy: "a".into(),
                document_url: "https://a/r.pdf".into(),
                page_url: None,
            }
        );
    }

    #[tokio::test]
    async fn fault_falls_back_to_next() {
        let chain = StrategyChain::new(vec![
            Box::new(Fixed::new("a", Err(RetrievalFault::Network("reset".into())))),
            Box::new(Fixed::new("b", found("https://b/r.pdf"))),
        ]);

        match chain.locate(&query(2025), 2025).await {
            ChainOutcome::Resolved { strategy, .. } => assert_eq!(strategy, "b"),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_not_found_is_not_found() {
        let chain = StrategyChain::new(vec![
            Box::new(Fixed::new("a", Ok(Located::NotFound))),
            Box::new(Fixed::new("b", Ok(Located::NotFound))),
        ]);
        assert_eq!(chain.locate(&query(2024), 2025).await, ChainOutcome::NotFound);
    }

    #[tokio::test]
    async fn any_fault_without_hit_is_faulted() {
        let chain = StrategyChain::new(vec![
            Box::new(Fixed::new("a", Ok(Located::NotFound))),
            Box::new(Fixed::new(
                "b",
                Err(RetrievalFault::QuotaExhausted {
                    strategy: "b".into(),
                }),
            )),
        ]);

        match chain.locate(&query(2024), 2025).await {
            ChainOutcome::Faulted(faults) => {
                assert_eq!(faults.len(), 1);
                assert_eq!(faults[0].0, "b");
            }
            other => panic!("expected Faulted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn current_year_only_strategy_is_skipped_for_past_years() {
        let mut crawler = Fixed::new("crawler", found("https://site/r.pdf"));
        crawler.current_only = true;
        let chain = StrategyChain::new(vec![
            Box::new(crawler),
            Box::new(Fixed::new("search", Ok(Located::NotFound))),
        ]);

        assert_eq!(chain.locate(&query(2023), 2025).await, ChainOutcome::NotFound);
        assert!(matches!(
            chain.locate(&query(2025), 2025).await,
            ChainOutcome::Resolved { .. }
        ));
    }

    #[tokio::test]
    async fn empty_chain_faults() {
        let chain = StrategyChain::new(vec![]);
        assert!(chain.is_empty());
        assert_eq!(chain.locate(&query(2025), 2025).await, ChainOutcome::Faulted(vec![]));
    }
}
