//! Site crawler strategy.
//!
//! Starts from the entity's website, follows links whose text or URL
//! mentions a sustainability keyword, and returns the first matching PDF
//! link. Only the live site is crawled, so the strategy answers for the
//! current year only.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use csrledger_shared::{CrawlerConfig, LedgerError, Result, RetrievalFault};

use crate::strategy::{LocateQuery, Located, RetrievalStrategy};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("csrledger/", env!("CARGO_PKG_VERSION"));

/// An anchor found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PageLink {
    url: Url,
    text: String,
}

/// Keyword-guided crawler over an entity's own website.
pub struct SiteCrawler {
    config: CrawlerConfig,
    client: Client,
    keywords: Regex,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl SiteCrawler {
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Network(format!("failed to build HTTP client: {e}")))?;

        let keywords = keyword_regex(&config.keywords)?;

        Ok(Self {
            config,
            client,
            keywords,
            allow_localhost: false,
        })
    }

    /// Allow crawling localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    async fn fetch_html(&self, url: &Url) -> std::result::Result<String, RetrievalFault> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| RetrievalFault::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalFault::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| RetrievalFault::Network(format!("{url}: body read failed: {e}")))
    }

    fn mentions_keyword(&self, link: &PageLink) -> bool {
        self.keywords.is_match(&link.text) || self.keywords.is_match(link.url.path())
    }

    /// Best keyword-matching PDF link. The first one mentioning `year`
    /// wins, otherwise the first one in document order.
    fn best_pdf(&self, links: &[PageLink], year: i32) -> Option<Url> {
        let year = year.to_string();
        let mut candidates = links
            .iter()
            .filter(|l| is_pdf(&l.url) && self.mentions_keyword(l));
        let first = candidates.clone().next()?;
        let dated = candidates.find(|l| l.text.contains(&year) || l.url.as_str().contains(&year));
        Some(dated.unwrap_or(first).url.clone())
    }
}

#[async_trait]
impl RetrievalStrategy for SiteCrawler {
    fn name(&self) -> &str {
        "site-crawler"
    }

    fn applies_to(&self, year: i32, current_year: i32) -> bool {
        year == current_year
    }

    #[instrument(skip_all, fields(entity = %query.entity_name, year = query.year))]
    async fn locate(&self, query: &LocateQuery) -> std::result::Result<Located, RetrievalFault> {
        let Some(start) = query.website_url.as_deref() else {
            debug!("no website known, nothing to crawl");
            return Ok(Located::NotFound);
        };
        let start = Url::parse(start)
            .map_err(|e| RetrievalFault::Parse(format!("invalid website url '{start}': {e}")))?;
        let host = start.host_str().unwrap_or("").to_string();

        let mut queue: VecDeque<Url> = VecDeque::from([start.clone()]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        while let Some(url) = queue.pop_front() {
            if pages >= self.config.max_pages {
                break;
            }
            if !visited.insert(normalize_url(&url)) {
                continue;
            }
            if !self.allow_localhost && is_ssrf_target(&url) {
                warn!(%url, "SSRF protection: blocked");
                continue;
            }

            if pages > 0 && self.config.rate_limit_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            }

            let body = match self.fetch_html(&url).await {
                Ok(body) => body,
                // The start page failing means the site is unreachable
                Err(fault) if pages == 0 => return Err(fault),
                Err(fault) => {
                    debug!(%url, error = %fault, "skipping unreachable page");
                    continue;
                }
            };
            pages += 1;

            let links = extract_links(&body, &url);

            if let Some(pdf) = self.best_pdf(&links, query.year) {
                return Ok(Located::Found {
                    document_url: pdf.to_string(),
                    page_url: Some(url.to_string()),
                });
            }

            for link in links {
                if link.url.host_str() == Some(host.as_str())
                    && !is_pdf(&link.url)
                    && self.mentions_keyword(&link)
                    && !visited.contains(&normalize_url(&link.url))
                {
                    queue.push_back(link.url);
                }
            }
        }

        debug!(pages, "crawl exhausted without a report link");
        Ok(Located::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Link handling
// ---------------------------------------------------------------------------

/// Build a case-insensitive alternation over the configured keywords.
fn keyword_regex(keywords: &[String]) -> Result<Regex> {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k.trim()))
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    if alternation.is_empty() {
        return Err(LedgerError::config("crawler keywords are empty"));
    }
    Regex::new(&format!("(?i)({alternation})"))
        .map_err(|e| LedgerError::config(format!("invalid crawler keyword: {e}")))
}

/// Extract all anchors from a document, resolved against the base URL.
fn extract_links(html: &str, base_url: &Url) -> Vec<PageLink> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").expect("static selector");
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }

            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                let text = el.text().collect::<Vec<_>>().join(" ");
                links.push(PageLink {
                    url: resolved,
                    text: text.split_whitespace().collect::<Vec<_>>().join(" "),
                });
            }
        }
    }

    links
}

fn is_pdf(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".pdf")
}

/// Normalize a URL for deduplication (strip fragment and trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
