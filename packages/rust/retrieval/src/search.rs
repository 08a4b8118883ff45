//! Search-API strategy.
//!
//! Queries a custom-search JSON endpoint for
//! `"<name> <year> sustainability report filetype:pdf"` and returns the
//! first PDF result. The API has a fixed daily quota, so calls are counted
//! locally, spaced by a `governor` limiter with one call per
//! `min_interval_ms`, and a 429/403 answer is reported as quota exhaustion.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use csrledger_shared::{LedgerError, Result, RetrievalFault, SearchApiConfig};

use crate::strategy::{LocateQuery, Located, RetrievalStrategy};

const STRATEGY_NAME: &str = "search-api";

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Response body of the search endpoint. Only the fields we read.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
}

/// API credentials, read from the environment.
#[derive(Clone)]
struct Credentials {
    api_key: String,
    engine_id: String,
}

/// Search-API lookup usable for any year.
pub struct SearchApiStrategy {
    config: SearchApiConfig,
    client: Client,
    credentials: Option<Credentials>,
    calls: AtomicU32,
    /// `None` when `min_interval_ms` is zero.
    limiter: Option<DirectRateLimiter>,
}

impl SearchApiStrategy {
    /// Build the strategy, reading credentials from the env vars named in
    /// `config`. Missing credentials are not an error here; every lookup
    /// will fault as misconfigured instead.
    pub fn from_env(config: SearchApiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|v| !v.is_empty());
        let engine_id = std::env::var(&config.engine_id_env).ok().filter(|v| !v.is_empty());

        let credentials = match (api_key, engine_id) {
            (Some(api_key), Some(engine_id)) => Some(Credentials { api_key, engine_id }),
            _ => {
                warn!(
                    api_key_env = %config.api_key_env,
                    engine_id_env = %config.engine_id_env,
                    "search API credentials not set, search lookups will be skipped"
                );
                None
            }
        };

        Self::build(config, credentials)
    }

    /// Build the strategy with explicit credentials.
    pub fn with_credentials(
        config: SearchApiConfig,
        api_key: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Credentials {
            api_key: api_key.into(),
            engine_id: engine_id.into(),
        };
        Self::build(config, Some(credentials))
    }

    fn build(config: SearchApiConfig, credentials: Option<Credentials>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("csrledger/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Network(format!("failed to build HTTP client: {e}")))?;

        let limiter = Quota::with_period(Duration::from_millis(config.min_interval_ms))
            .map(RateLimiter::direct);

        Ok(Self {
            config,
            client,
            credentials,
            calls: AtomicU32::new(0),
            limiter,
        })
    }

    /// Calls spent so far in this process.
    pub fn calls_used(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Reserve one call from the quota.
    fn reserve_call(&self) -> std::result::Result<(), RetrievalFault> {
        let quota = self.config.daily_quota;
        self.calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < quota).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| RetrievalFault::QuotaExhausted {
                strategy: STRATEGY_NAME.to_string(),
            })
    }

    /// Wait for the call-spacing permit.
    async fn wait_for_permit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

#[async_trait]
impl RetrievalStrategy for SearchApiStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    #[instrument(skip_all, fields(entity = %query.entity_name, year = query.year))]
    async fn locate(&self, query: &LocateQuery) -> std::result::Result<Located, RetrievalFault> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(RetrievalFault::Misconfigured(format!(
                "{} / {} not set",
                self.config.api_key_env, self.config.engine_id_env
            )));
        };

        self.reserve_call()?;
        self.wait_for_permit().await;

        let q = search_query(&query.entity_name, query.year);
        debug!(%q, "querying search API");

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("key", credentials.api_key.as_str()),
                ("cx", credentials.engine_id.as_str()),
                ("q", q.as_str()),
                ("num", "10"),
            ])
            .send()
            .await
            .map_err(|e| RetrievalFault::Network(format!("{}: {e}", self.config.endpoint)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Err(RetrievalFault::QuotaExhausted {
                strategy: STRATEGY_NAME.to_string(),
            });
        }
        if !status.is_success() {
            return Err(RetrievalFault::Http {
                status: status.as_u16(),
                url: self.config.endpoint.clone(),
            });
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalFault::Parse(e.to_string()))?;

        match body.items.into_iter().find(|item| is_pdf_link(&item.link)) {
            Some(item) => Ok(Located::Found {
                document_url: item.link,
                page_url: None,
            }),
            None => Ok(Located::NotFound),
        }
    }
}

/// The query sent for one entity-year.
fn search_query(entity_name: &str, year: i32) -> String {
    format!("{entity_name} {year} sustainability report filetype:pdf")
}

/// Whether a result link points at a PDF (ignoring query string).
fn is_pdf_link(link: &str) -> bool {
    let path = link.split(['?', '#']).next().unwrap_or(link);
    path.to_ascii_lowercase().ends_with(".pdf")
}
