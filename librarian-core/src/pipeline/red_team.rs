//! Red-Team Validator: independently re-derives every citation from the
//! search index and downgrades claims whose evidence does not hold up.
//!
//! Findings are content, not failures. Only infrastructure errors from the
//! search provider (after retries) propagate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use super::claim::{Citation, Claim, ClaimMap, EffectSize, VerificationStatus};
use super::scoring::{ConfidenceScorer, ValidationFindings};
use super::similarity::{
    extract_keywords, has_negation, keyword_containment, normalize_doi, reports_null_result,
    title_similarity,
};
use crate::config::{PipelineConfig, RetryConfig};
use crate::error::{SearchError, VerificationIssue};
use crate::retry::with_retry;
use crate::search::{RawCitationRecord, SearchFilters, SearchProvider, SearchQuery};

static EFFECT_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^\p{L}])(cohen'?s\s+d|hedges'?\s+g|d|g|r|or|rr|beta|β)\s*=\s*(-?\d*\.\d+|-?\d+)")
        .expect("effect size pattern is valid")
});

/// A finding recorded against one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedTeamFinding {
    pub claim_id: String,
    pub issue: VerificationIssue,
}

/// What a red-team pass produced.
#[derive(Debug, Clone)]
pub struct RedTeamOutcome {
    pub claims: ClaimMap,
    pub findings: Vec<RedTeamFinding>,
    /// Every query sent to the search provider, in order.
    pub queries: Vec<String>,
}

/// Re-checks citations against the search index.
pub struct RedTeamValidator {
    search: Arc<dyn SearchProvider>,
    scorer: ConfidenceScorer,
    retry: RetryConfig,
    filters: SearchFilters,
    title_threshold: f64,
    omission_min_overlap: f64,
    omission_search: bool,
}

impl RedTeamValidator {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scorer: ConfidenceScorer,
        retry: RetryConfig,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            search,
            scorer,
            retry,
            filters: SearchFilters::default(),
            title_threshold: config.title_match_threshold,
            omission_min_overlap: config.contradiction_min_overlap,
            omission_search: config.omission_search,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Validate every claim and return the downgraded copy.
    pub async fn validate(&self, claims: &ClaimMap) -> Result<RedTeamOutcome, SearchError> {
        let mut next = claims.clone();
        let mut findings = Vec::new();
        let mut queries = Vec::new();

        for id in next.ids() {
            let Some(claim) = next.get_mut(&id) else {
                continue;
            };
            let issues = self.validate_claim(claim, &mut queries).await?;
            for issue in issues {
                findings.push(RedTeamFinding {
                    claim_id: id.clone(),
                    issue,
                });
            }
        }

        info!(
            claims = next.len(),
            findings = findings.len(),
            queries = queries.len(),
            "Red-team validation complete"
        );
        Ok(RedTeamOutcome {
            claims: next,
            findings,
            queries,
        })
    }

    async fn validate_claim(
        &self,
        claim: &mut Claim,
        queries: &mut Vec<String>,
    ) -> Result<Vec<VerificationIssue>, SearchError> {
        let mut findings = ValidationFindings::default();
        let mut issues = Vec::new();

        for supporting in [true, false] {
            let count = if supporting {
                claim.supporting_citations.len()
            } else {
                claim.contradicting_citations.len()
            };
            for i in 0..count {
                let citation = if supporting {
                    &claim.supporting_citations[i]
                } else {
                    &claim.contradicting_citations[i]
                };
                let located = self.locate(citation, queries).await?;
                let citation = if supporting {
                    &mut claim.supporting_citations[i]
                } else {
                    &mut claim.contradicting_citations[i]
                };
                self.check_citation(citation, located.as_ref(), &mut findings, &mut issues);
            }
        }

        if self.omission_search {
            for citation in self.omission_check(claim, queries).await? {
                let label = citation.label().to_string();
                if claim.add_contradicting(citation.clone()) {
                    debug!(claim = %claim.id, study = %label, "Omission search added counter-evidence");
                    findings.added_contradicting.push(citation);
                }
            }
        }

        for issue in &issues {
            claim.verification_notes.push(issue.to_string());
        }
        for added in &findings.added_contradicting {
            claim.verification_notes.push(format!(
                "Omitted null-result study added as counter-evidence: {}",
                added.full_citation
            ));
        }

        let before = claim.confidence_score;
        let after = self.scorer.revise(claim, &findings);
        if before != Some(after) {
            warn!(claim = %claim.id, before = ?before, after, "Red team downgraded claim");
        }
        Ok(issues)
    }

    fn check_citation(
        &self,
        citation: &mut Citation,
        located: Option<&RawCitationRecord>,
        findings: &mut ValidationFindings,
        issues: &mut Vec<VerificationIssue>,
    ) {
        let label = citation.label().to_string();
        let Some(record) = located else {
            citation.verification_status = VerificationStatus::Disputed;
            findings.disputed.push(label.clone());
            issues.push(VerificationIssue::CitationNotLocatable { citation: label });
            return;
        };

        let mut corrections = Vec::new();
        let mut mismatch = |field: &str, recorded: String, observed: String| {
            corrections.push(format!("{field}: recorded {recorded}, source reports {observed}"));
            issues.push(VerificationIssue::VerificationMismatch {
                citation: label.clone(),
                field: field.to_string(),
                recorded,
                observed,
            });
        };

        if let (Some(recorded), Some(observed)) = (&citation.venue, &record.venue)
            && !venues_match(recorded, observed)
        {
            mismatch("venue", recorded.clone(), observed.clone());
            citation.venue = Some(observed.clone());
        }
        if let (Some(recorded), Some(observed)) = (citation.year, record.year)
            && recorded != observed
        {
            mismatch("year", recorded.to_string(), observed.to_string());
            citation.year = Some(observed);
        }
        match (citation.doi_key(), record.doi.as_deref().map(normalize_doi)) {
            (Some(recorded), Some(observed)) if recorded != observed => {
                mismatch("DOI", recorded, observed.clone());
                citation.doi = Some(observed);
            }
            (None, Some(observed)) => citation.doi = Some(observed),
            _ => {}
        }
        if citation.title.is_none() {
            citation.title = Some(record.title.clone());
        }

        let mut effect_mismatch = None;
        if let Some(recorded) = &citation.effect_size
            && let Some(observed) = reported_effect_size(record, &recorded.metric)
            && self
                .scorer
                .rubric()
                .effect_sizes_differ(recorded.value, observed.value)
        {
            effect_mismatch = Some((recorded.clone(), observed));
        }
        if let Some((recorded, observed)) = effect_mismatch {
            let note = format!("recorded {recorded}, source reports {observed}");
            mismatch("effect size", recorded.to_string(), observed.to_string());
            findings
                .effect_size_mismatches
                .push(format!("{note} (\"{label}\")"));
            citation.effect_size = Some(observed);
        }

        if corrections.is_empty() {
            citation.verification_status = VerificationStatus::Verified;
        } else {
            citation.verification_status = VerificationStatus::Corrected;
            let note = corrections.join("; ");
            findings.corrections.push(format!("\"{label}\" ({note})"));
            citation.correction = Some(note);
        }
    }

    /// Find the indexed record for a citation: DOI lookup first, then title.
    async fn locate(
        &self,
        citation: &Citation,
        queries: &mut Vec<String>,
    ) -> Result<Option<RawCitationRecord>, SearchError> {
        if let Some(doi) = citation.doi_key() {
            let query = SearchQuery::doi(&doi);
            let hits = self.run(&query, queries).await?;
            if let Some(hit) = hits
                .into_iter()
                .find(|r| r.doi.as_deref().map(normalize_doi).as_deref() == Some(doi.as_str()))
            {
                return Ok(Some(hit));
            }
        }

        let title = citation.label().trim();
        if title.is_empty() {
            return Ok(None);
        }
        let query = SearchQuery::new(title).with_filters(SearchFilters {
            date_range: None,
            ..self.filters.clone()
        });
        let hits = self.run(&query, queries).await?;
        Ok(hits
            .into_iter()
            .map(|r| (self.title_match(citation, &r), r))
            .filter(|(score, _)| *score >= self.title_threshold)
            .fold(None::<(f64, RawCitationRecord)>, |best, (score, r)| match best {
                Some((best_score, _)) if best_score >= score => best,
                _ => Some((score, r)),
            })
            .map(|(_, r)| r))
    }

    fn title_match(&self, citation: &Citation, record: &RawCitationRecord) -> f64 {
        match &citation.title {
            Some(title) => title_similarity(title, &record.title),
            // Only the free-text reference is known: the record's title must appear in it.
            None => keyword_containment(&record.title, &citation.full_citation),
        }
    }

    /// Search for null-result and failed-replication studies not yet cited.
    async fn omission_check(
        &self,
        claim: &Claim,
        queries: &mut Vec<String>,
    ) -> Result<Vec<Citation>, SearchError> {
        let keywords: Vec<String> = extract_keywords(&claim.text).into_iter().take(6).collect();
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let topic = keywords.join(" ");
        let mut found: Vec<Citation> = Vec::new();
        for suffix in ["null result", "failed replication"] {
            let query =
                SearchQuery::new(format!("{topic} {suffix}")).with_filters(self.filters.clone());
            for record in self.run(&query, queries).await? {
                let text = record.searchable_text();
                let relevant = keyword_containment(&claim.text, &text) >= self.omission_min_overlap;
                let null = reports_null_result(&text) || has_negation(&text);
                if relevant && null && !already_cited(claim, &record) && !already_cited_in(&found, &record)
                {
                    found.push(citation_from_record(&record));
                }
            }
        }
        Ok(found)
    }

    async fn run(
        &self,
        query: &SearchQuery,
        queries: &mut Vec<String>,
    ) -> Result<Vec<RawCitationRecord>, SearchError> {
        queries.push(query.query.clone());
        let outcome = with_retry(&self.retry, |_| self.search.search(query)).await?;
        Ok(outcome.value)
    }
}

fn venues_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    a == b || a.contains(&b) || b.contains(&a) || title_similarity(&a, &b) >= 0.8
}

fn normalize_metric(metric: &str) -> String {
    let m = metric.trim().to_lowercase();
    match m.as_str() {
        _ if m.contains("cohen") || m == "d" => "d".to_string(),
        _ if m.contains("hedges") || m == "g" => "g".to_string(),
        _ if m.contains("odds") || m == "or" => "or".to_string(),
        _ if m.contains("pearson") || m == "r" => "r".to_string(),
        "β" | "beta" => "beta".to_string(),
        _ => m,
    }
}

/// The first statistic of the given metric reported in a record's abstract.
pub fn reported_effect_size(record: &RawCitationRecord, metric: &str) -> Option<EffectSize> {
    let wanted = normalize_metric(metric);
    let text = record.abstract_text.as_deref()?;
    EFFECT_SIZE.captures_iter(text).find_map(|caps| {
        let found = normalize_metric(caps.get(1)?.as_str());
        if found != wanted {
            return None;
        }
        let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
        Some(EffectSize {
            metric: metric.to_string(),
            value,
        })
    })
}

fn already_cited(claim: &Claim, record: &RawCitationRecord) -> bool {
    claim
        .all_citations()
        .any(|c| same_work(c, record))
}

fn already_cited_in(list: &[Citation], record: &RawCitationRecord) -> bool {
    list.iter().any(|c| same_work(c, record))
}

fn same_work(citation: &Citation, record: &RawCitationRecord) -> bool {
    if let (Some(a), Some(b)) = (citation.doi_key(), record.doi.as_deref().map(normalize_doi)) {
        return a == b;
    }
    title_similarity(citation.label(), &record.title) >= 0.8
}

fn citation_from_record(record: &RawCitationRecord) -> Citation {
    let key_finding = record
        .abstract_text
        .as_deref()
        .and_then(|a| a.split_inclusive(". ").find(|s| reports_null_result(s) || has_negation(s)))
        .unwrap_or("")
        .trim()
        .to_string();
    Citation {
        full_citation: record.display_citation(),
        methodology_summary: String::new(),
        sample_description: String::new(),
        key_finding,
        effect_size: None,
        verification_status: VerificationStatus::Verified,
        doi: record.doi.clone(),
        title: Some(record.title.clone()),
        venue: record.venue.clone(),
        year: record.year,
        sample_size: None,
        replicated: false,
        lab_only: false,
        narrow_sample: false,
        correction: None,
    }
}
