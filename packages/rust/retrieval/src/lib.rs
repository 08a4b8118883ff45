//! Report retrieval strategies and their fallback chain.
//!
//! This crate provides:
//! - [`RetrievalStrategy`]: the single `locate` capability every strategy offers
//! - [`StrategyChain`]: ordered strategies tried until one finds a document
//! - [`SiteCrawler`]: crawls the entity's own website (current year only)
//! - [`SearchApiStrategy`]: queries a custom-search JSON API (any year)

pub mod search;
pub mod site;
pub mod strategy;

use csrledger_shared::{AppConfig, Result};

pub use search::SearchApiStrategy;
pub use site::SiteCrawler;
pub use strategy::{ChainOutcome, LocateQuery, Located, RetrievalStrategy, StrategyChain};

/// The production chain: site crawl first, search API as fallback.
pub fn default_chain(config: &AppConfig) -> Result<StrategyChain> {
    let crawler = SiteCrawler::new(config.crawler.clone())?;
    let search = SearchApiStrategy::from_env(config.search_api.clone())?;
    Ok(StrategyChain::new(vec![Box::new(crawler), Box::new(search)]))
}
