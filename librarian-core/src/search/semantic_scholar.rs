//! Semantic Scholar Graph API adapter.
//!
//! Rate-limited with a minimum request spacing and backed by an in-memory
//! TTL + LRU response cache that is shared by every run in the process.

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{RawCitationRecord, SearchProvider, SearchQuery};
use crate::config::SearchConfig;
use crate::error::SearchError;

const SEMANTIC_SCHOLAR_API: &str = "https://api.semanticscholar.org/graph/v1";
const PAPER_FIELDS: &str = "paperId,title,authors,year,venue,externalIds,abstract,url,publicationTypes";
const PROVIDER_NAME: &str = "semantic_scholar";

struct CacheEntry {
    records: Vec<RawCitationRecord>,
    cached_at: Instant,
}

/// In-memory response cache with TTL and LRU eviction.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<RawCitationRecord>> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.records.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, records: Vec<RawCitationRecord>) {
        if self.ttl.is_zero() {
            return;
        }
        lock(&self.entries).put(
            key,
            CacheEntry {
                records,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rate-limited Semantic Scholar search provider.
pub struct SemanticScholarProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    results_per_query: usize,
    timeout_secs: u64,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    cache: ResponseCache,
}

impl SemanticScholarProvider {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("librarian/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Connection {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| SEMANTIC_SCHOLAR_API.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            results_per_query: config.results_per_query.clamp(1, 100),
            timeout_secs: config.timeout_secs,
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_request: Mutex::new(None),
            cache: ResponseCache::new(config.cache_ttl_secs, config.cache_max_entries),
        })
    }

    /// Enforce the minimum delay between requests.
    async fn rate_limit(&self) {
        let wait_duration = {
            let last = lock(&self.last_request);
            last.and_then(|instant| self.min_interval.checked_sub(instant.elapsed()))
        };
        if let Some(wait) = wait_duration {
            tokio::time::sleep(wait).await;
        }
        *lock(&self.last_request) = Some(Instant::now());
    }

    fn request_url(&self, query: &SearchQuery) -> String {
        if let Some(doi) = query.as_doi() {
            return format!(
                "{}/paper/DOI:{}?fields={}",
                self.base_url,
                urlencoding::encode(doi),
                PAPER_FIELDS
            );
        }
        let mut url = format!(
            "{}/paper/search?query={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(&query.query),
            self.results_per_query,
            PAPER_FIELDS
        );
        if let Some(range) = query.filters.date_range
            && (range.from_year.is_some() || range.to_year.is_some())
        {
            let from = range.from_year.map(|y| y.to_string()).unwrap_or_default();
            let to = range.to_year.map(|y| y.to_string()).unwrap_or_default();
            url.push_str(&format!("&year={from}-{to}"));
        }
        if let Some(kind) = &query.filters.publication_type {
            url.push_str(&format!("&publicationTypes={}", urlencoding::encode(kind)));
        }
        if let Some(lang) = &query.filters.language {
            debug!(language = %lang, "Semantic Scholar has no language filter; ignoring");
        }
        url
    }

    fn map_transport_error(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() {
            SearchError::Connection {
                message: e.to_string(),
            }
        } else {
            SearchError::Request {
                message: format!("Semantic Scholar request failed: {}", e),
            }
        }
    }
}

#[async_trait]
impl SearchProvider for SemanticScholarProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawCitationRecord>, SearchError> {
        let url = self.request_url(query);
        if let Some(cached) = self.cache.get(&url) {
            debug!(query = %query.query, hits = cached.len(), "Search cache hit");
            return Ok(cached);
        }

        self.rate_limit().await;
        debug!(url = %url, "Sending Semantic Scholar request");

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if unknown_doi(status, query) {
            debug!(doi = ?query.as_doi(), status = %status, "DOI not known to Semantic Scholar");
            self.cache.insert(url, Vec::new());
            return Ok(Vec::new());
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(5);
            return Err(SearchError::QuotaExhausted {
                provider: PROVIDER_NAME.to_string(),
                retry_after_secs,
            });
        }
        if !status.is_success() {
            return Err(SearchError::Status {
                status: status.as_u16(),
                message: "Semantic Scholar".to_string(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_transport_error(e)
            } else {
                SearchError::ResponseParse {
                    message: format!("Failed to parse Semantic Scholar response: {}", e),
                }
            }
        })?;

        let records = if query.as_doi().is_some() {
            parse_paper(&body).into_iter().collect()
        } else {
            parse_search_response(&body)?
        };
        self.cache.insert(url, records.clone());
        Ok(records)
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

/// A DOI lookup answered with 400 or 404 means the index has no such paper.
fn unknown_doi(status: reqwest::StatusCode, query: &SearchQuery) -> bool {
    query.as_doi().is_some()
        && matches!(
            status,
            reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::NOT_FOUND
        )
}

fn parse_search_response(body: &Value) -> Result<Vec<RawCitationRecord>, SearchError> {
    // A query with no hits may omit "data" entirely.
    match body.get("data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(papers)) => Ok(papers.iter().filter_map(parse_paper).collect()),
        Some(_) => Err(SearchError::ResponseParse {
            message: "\"data\" is not an array".to_string(),
        }),
    }
}

/// Records without a title cannot be matched against a citation and are skipped.
fn parse_paper(paper: &Value) -> Option<RawCitationRecord> {
    let str_field = |key: &str| {
        paper
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };

    let Some(title) = str_field("title") else {
        warn!(paper_id = ?str_field("paperId"), "Skipping Semantic Scholar record without title");
        return None;
    };

    let authors = paper
        .get("authors")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a.get("name").and_then(|n| n.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let publication_types = paper
        .get("publicationTypes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Some(RawCitationRecord {
        source: PROVIDER_NAME.to_string(),
        external_id: str_field("paperId"),
        title,
        authors,
        year: paper
            .get("year")
            .and_then(|v| v.as_i64())
            .map(|y| y as i32),
        venue: str_field("venue"),
        doi: paper
            .get("externalIds")
            .and_then(|ids| ids.get("DOI"))
            .and_then(|v| v.as_str())
            .map(String::from),
        abstract_text: str_field("abstract"),
        url: str_field("url"),
        publication_types,
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
