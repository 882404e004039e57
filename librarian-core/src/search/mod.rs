//! Search Provider Adapter: a stateless wrapper around academic search APIs.
//!
//! Every adapter takes a [`SearchQuery`] and returns raw citation records.
//! An empty result set is a valid answer, never an error.

pub mod semantic_scholar;

pub use semantic_scholar::SemanticScholarProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::pipeline::similarity::{extract_keywords, keyword_containment, normalize_doi};

/// Inclusive publication-year range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_year: Option<i32>,
}

impl DateRange {
    pub fn contains(&self, year: i32) -> bool {
        self.from_year.is_none_or(|from| year >= from) && self.to_year.is_none_or(|to| year <= to)
    }
}

/// Filters narrowing a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// E.g. "JournalArticle", "Review", "MetaAnalysis".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_type: Option<String>,
    /// ISO 639-1 code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A single query sent to a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
}

const DOI_PREFIX: &str = "doi:";

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: SearchFilters::default(),
        }
    }

    /// An exact lookup by DOI.
    pub fn doi(doi: &str) -> Self {
        Self::new(format!("{DOI_PREFIX}{}", normalize_doi(doi)))
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// The DOI this query looks up, if it is a DOI lookup.
    pub fn as_doi(&self) -> Option<&str> {
        self.query
            .strip_prefix(DOI_PREFIX)
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// A bibliographic record exactly as a search provider returned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCitationRecord {
    /// Provider that produced the record.
    pub source: String,
    /// Provider-specific identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub publication_types: Vec<String>,
}

impl RawCitationRecord {
    /// A one-line reference: "Authors (year). Title. Venue."
    pub fn display_citation(&self) -> String {
        let authors = match self.authors.len() {
            0 => "Unknown".to_string(),
            1 => self.authors[0].clone(),
            2 => format!("{} & {}", self.authors[0], self.authors[1]),
            _ => format!("{} et al.", self.authors[0]),
        };
        let year = self
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "n.d.".to_string());
        let mut out = format!("{authors} ({year}). {}.", self.title.trim_end_matches('.'));
        if let Some(venue) = &self.venue
            && !venue.is_empty()
        {
            out.push(' ');
            out.push_str(venue);
            out.push('.');
        }
        if let Some(doi) = &self.doi {
            out.push_str(" doi:");
            out.push_str(doi);
        }
        out
    }

    /// Title and abstract joined, for keyword matching.
    pub fn searchable_text(&self) -> String {
        match &self.abstract_text {
            Some(abs) => format!("{} {}", self.title, abs),
            None => self.title.clone(),
        }
    }

    fn passes(&self, filters: &SearchFilters) -> bool {
        if let (Some(range), Some(year)) = (filters.date_range, self.year)
            && !range.contains(year)
        {
            return false;
        }
        if let Some(kind) = &filters.publication_type
            && !self.publication_types.is_empty()
            && !self
                .publication_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind))
        {
            return false;
        }
        true
    }
}

/// Trait for academic search providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query. An empty `Vec` means nothing matched.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawCitationRecord>, SearchError>;

    /// Short provider name recorded on every returned record.
    fn name(&self) -> &str;
}

/// Create a search provider based on the configuration.
pub fn create_search_provider(
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, SearchError> {
    match config.provider.to_ascii_lowercase().as_str() {
        "semantic_scholar" | "semanticscholar" | "s2" => {
            Ok(Arc::new(SemanticScholarProvider::new(config)?))
        }
        other => Err(SearchError::Request {
            message: format!("Unsupported search provider '{other}'"),
        }),
    }
}

/// An in-memory search provider for testing.
///
/// Answers DOI lookups by exact DOI match and free-text queries by keyword
/// containment against each record's title and abstract. Queued failures are
/// returned first, one per call.
pub struct MockSearchProvider {
    corpus: Vec<RawCitationRecord>,
    min_containment: f64,
    failures: Mutex<VecDeque<SearchError>>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl MockSearchProvider {
    pub fn new(corpus: Vec<RawCitationRecord>) -> Self {
        Self {
            corpus,
            min_containment: 0.6,
            failures: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose index is empty.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Fraction of query keywords a record must contain to match.
    pub fn with_min_containment(mut self, min: f64) -> Self {
        self.min_containment = min;
        self
    }

    pub fn queue_failure(&self, error: SearchError) {
        lock(&self.failures).push_back(error);
    }

    /// Every query received so far.
    pub fn queries(&self) -> Vec<SearchQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RawCitationRecord>, SearchError> {
        lock(&self.queries).push(query.clone());
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }

        if let Some(doi) = query.as_doi() {
            return Ok(self
                .corpus
                .iter()
                .filter(|r| r.doi.as_deref().map(normalize_doi).as_deref() == Some(doi))
                .cloned()
                .collect());
        }

        if extract_keywords(&query.query).is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .corpus
            .iter()
            .filter(|r| r.passes(&query.filters))
            .filter(|r| keyword_containment(&query.query, &r.searchable_text()) >= self.min_containment)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, doi: &str, year: i32) -> RawCitationRecord {
        RawCitationRecord {
            source: "mock".into(),
            title: title.into(),
            authors: vec!["Smith, J.".into(), "Lee, K.".into(), "Park, S.".into()],
            year: Some(year),
            venue: Some("Journal of Politics".into()),
            doi: Some(doi.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_doi_query_roundtrip() {
        let q = SearchQuery::doi("https://doi.org/10.1000/ABC");
        assert_eq!(q.query, "doi:10.1000/abc");
        assert_eq!(q.as_doi(), Some("10.1000/abc"));
        assert_eq!(SearchQuery::new("anger protest").as_doi(), None);
    }

    #[test]
    fn test_display_citation() {
        let r = record("Anger and Collective Action.", "10.1/x", 2019);
        assert_eq!(
            r.display_citation(),
            "Smith, J. et al. (2019). Anger and Collective Action. Journal of Politics. doi:10.1/x"
        );
    }

    #[test]
    fn test_date_range_contains() {
        let range = DateRange {
            from_year: Some(2010),
            to_year: None,
        };
        assert!(range.contains(2010));
        assert!(!range.contains(2009));
        assert!(DateRange::default().contains(1950));
    }

    #[tokio::test]
    async fn test_mock_search_by_doi_and_keywords() {
        let provider = MockSearchProvider::new(vec![
            record("Anger and protest turnout", "10.1/a", 2019),
            record("Inflation expectations", "10.1/b", 2015),
        ]);

        let hits = provider.search(&SearchQuery::doi("10.1/A")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Anger and protest turnout");

        let hits = provider
            .search(&SearchQuery::new("protest turnout"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let none = provider
            .search(&SearchQuery::new("quantum chromodynamics"))
            .await
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(provider.queries().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_search_applies_filters() {
        let provider = MockSearchProvider::new(vec![record("Anger and protest turnout", "10.1/a", 2005)]);
        let query = SearchQuery::new("protest turnout").with_filters(SearchFilters {
            date_range: Some(DateRange {
                from_year: Some(2010),
                to_year: None,
            }),
            ..Default::default()
        });
        assert!(provider.search(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_search_queued_failure() {
        let provider = MockSearchProvider::empty();
        provider.queue_failure(SearchError::Timeout { timeout_secs: 30 });
        assert!(provider.search(&SearchQuery::new("x")).await.is_err());
        assert!(provider.search(&SearchQuery::new("x")).await.unwrap().is_empty());
    }
}
