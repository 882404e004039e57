//! Claims, citations and the per-run claim map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::similarity::normalize_doi;

/// Outcome of red-team verification for one citation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verified,
    Corrected,
    Disputed,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStatus::Unverified => write!(f, "unverified"),
            VerificationStatus::Verified => write!(f, "verified"),
            VerificationStatus::Corrected => write!(f, "corrected"),
            VerificationStatus::Disputed => write!(f, "disputed"),
        }
    }
}

/// A reported statistic, e.g. Cohen's d = 0.67.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSize {
    pub metric: String,
    pub value: f64,
}

impl std::fmt::Display for EffectSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {:.2}", self.metric, self.value)
    }
}

/// One bibliographic source backing or contradicting a claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Citation {
    pub full_citation: String,
    pub methodology_summary: String,
    pub sample_description: String,
    pub key_finding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_size: Option<EffectSize>,
    pub verification_status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
    /// Independently replicated.
    pub replicated: bool,
    /// Evidence comes only from laboratory settings.
    pub lab_only: bool,
    /// Sample drawn from a narrow population (e.g. WEIRD undergraduates).
    pub narrow_sample: bool,
    /// Red-team correction note, original vs corrected values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

impl Citation {
    /// Short label for notes and rationale text.
    pub fn label(&self) -> &str {
        match &self.title {
            Some(title) if !title.is_empty() => title,
            _ => &self.full_citation,
        }
    }

    /// Normalized DOI, used as the dedup key.
    pub fn doi_key(&self) -> Option<String> {
        self.doi
            .as_deref()
            .map(normalize_doi)
            .filter(|d| !d.is_empty())
    }

    pub fn is_disputed(&self) -> bool {
        self.verification_status == VerificationStatus::Disputed
    }
}

/// Where a claim came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOrigin {
    #[default]
    Discovery,
    AlternativeExplanation,
}

/// Dimension along which the evidence base is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDimension {
    Geographic,
    Demographic,
    Methodological,
    Temporal,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for GapDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapDimension::Geographic => write!(f, "geographic"),
            GapDimension::Demographic => write!(f, "demographic"),
            GapDimension::Methodological => write!(f, "methodological"),
            GapDimension::Temporal => write!(f, "temporal"),
            GapDimension::Other => write!(f, "other"),
        }
    }
}

/// A completeness gap. Prospective, never counted as evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub dimension: GapDimension,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_study: Option<String>,
}

/// Advisory band derived from a 0–10 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            7.. => ConfidenceBand::High,
            4..=6 => ConfidenceBand::Medium,
            _ => ConfidenceBand::Low,
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceBand::High => write!(f, "HIGH"),
            ConfidenceBand::Medium => write!(f, "MEDIUM"),
            ConfidenceBand::Low => write!(f, "LOW"),
        }
    }
}

/// Upper bound of every confidence score.
pub const MAX_SCORE: u8 = 10;

/// A single factual assertion with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub origin: ClaimOrigin,
    /// Ordered by strength, strongest first.
    #[serde(default)]
    pub supporting_citations: Vec<Citation>,
    #[serde(default)]
    pub contradicting_citations: Vec<Citation>,
    #[serde(default)]
    pub confidence_score: Option<u8>,
    #[serde(default)]
    pub confidence_rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<ConfidenceBand>,
    #[serde(default)]
    pub annotations: Vec<Gap>,
    /// Visible discrepancy notes from red-teaming.
    #[serde(default)]
    pub verification_notes: Vec<String>,
    /// Score the synthesis stage's model assigned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_assessed_score: Option<u8>,
    /// Synthesis stage's overall assessment text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<String>,
    #[serde(default)]
    pub red_teamed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_validation_score: Option<u8>,
    #[serde(default)]
    pub finalized: bool,
}

impl Claim {
    pub fn new(id: impl Into<String>, text: impl Into<String>, origin: ClaimOrigin) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            origin,
            supporting_citations: Vec::new(),
            contradicting_citations: Vec::new(),
            confidence_score: None,
            confidence_rationale: String::new(),
            band: None,
            annotations: Vec::new(),
            verification_notes: Vec::new(),
            model_assessed_score: None,
            assessment: None,
            red_teamed: false,
            pre_validation_score: None,
            finalized: false,
        }
    }

    /// Append a supporting citation unless one with the same DOI is present.
    pub fn add_supporting(&mut self, citation: Citation) -> bool {
        push_unique(&mut self.supporting_citations, citation)
    }

    /// Append a contradicting citation unless one with the same DOI is present.
    pub fn add_contradicting(&mut self, citation: Citation) -> bool {
        push_unique(&mut self.contradicting_citations, citation)
    }

    /// Assign a score before red-teaming.
    pub fn set_score(&mut self, score: u8, rationale: impl Into<String>) {
        let score = score.min(MAX_SCORE);
        self.confidence_score = Some(score);
        self.band = Some(ConfidenceBand::from_score(score));
        self.confidence_rationale = rationale.into();
    }

    /// Record the post-validation score, which never exceeds the pre-validation one.
    pub fn apply_validated_score(&mut self, score: u8, rationale: impl Into<String>) {
        let ceiling = self
            .pre_validation_score
            .or(self.confidence_score)
            .unwrap_or(MAX_SCORE);
        if self.pre_validation_score.is_none() {
            self.pre_validation_score = self.confidence_score;
        }
        let score = score.min(ceiling).min(MAX_SCORE);
        self.confidence_score = Some(score);
        self.band = Some(ConfidenceBand::from_score(score));
        self.confidence_rationale = rationale.into();
        self.red_teamed = true;
    }

    pub fn all_citations(&self) -> impl Iterator<Item = &Citation> {
        self.supporting_citations
            .iter()
            .chain(self.contradicting_citations.iter())
    }

    pub fn disputed_citations(&self) -> impl Iterator<Item = &Citation> {
        self.all_citations().filter(|c| c.is_disputed())
    }

    /// Largest known supporting sample size.
    pub fn largest_supporting_sample(&self) -> Option<u64> {
        self.supporting_citations
            .iter()
            .filter_map(|c| c.sample_size)
            .max()
    }
}

fn push_unique(list: &mut Vec<Citation>, citation: Citation) -> bool {
    if let Some(key) = citation.doi_key()
        && list.iter().any(|c| c.doi_key().as_deref() == Some(key.as_str()))
    {
        return false;
    }
    list.push(citation);
    true
}

/// Claims of one run, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimMap {
    claims: BTreeMap<String, Claim>,
}

impl ClaimMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused `claim-NNN` id.
    pub fn next_id(&self) -> String {
        let next = self
            .claims
            .keys()
            .filter_map(|k| k.strip_prefix("claim-")?.parse::<u32>().ok())
            .max()
            .map_or(1, |n| n + 1);
        format!("claim-{next:03}")
    }

    /// Create and insert a claim with a fresh id, returning the id.
    pub fn create(&mut self, text: impl Into<String>, origin: ClaimOrigin) -> String {
        let id = self.next_id();
        self.claims
            .insert(id.clone(), Claim::new(id.clone(), text, origin));
        id
    }

    pub fn insert(&mut self, claim: Claim) {
        self.claims.insert(claim.id.clone(), claim);
    }

    pub fn get(&self, id: &str) -> Option<&Claim> {
        self.claims.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Claim> {
        self.claims.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Claim> {
        self.claims.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.claims.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Claims in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Claim> {
        self.claims.values_mut()
    }

    pub fn ids(&self) -> Vec<String> {
        self.claims.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(doi: Option<&str>, title: &str) -> Citation {
        Citation {
            full_citation: format!("Author (2020). {title}."),
            title: Some(title.to_string()),
            doi: doi.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(ConfidenceBand::from_score(10), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(7), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(6), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(4), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(3), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0), ConfidenceBand::Low);
    }

    #[test]
    fn test_citation_dedup_by_normalized_doi() {
        let mut claim = Claim::new("claim-001", "x", ClaimOrigin::Discovery);
        assert!(claim.add_supporting(cite(Some("10.1/ABC"), "First")));
        assert!(!claim.add_supporting(cite(Some("https://doi.org/10.1/abc"), "Dup")));
        assert!(claim.add_supporting(cite(None, "No DOI")));
        assert!(claim.add_supporting(cite(None, "No DOI either")));
        assert_eq!(claim.supporting_citations.len(), 3);
        // Same DOI may appear once per list.
        assert!(claim.add_contradicting(cite(Some("10.1/abc"), "Other list")));
    }

    #[test]
    fn test_validated_score_never_increases() {
        let mut claim = Claim::new("claim-001", "x", ClaimOrigin::Discovery);
        claim.set_score(6, "rubric");
        claim.apply_validated_score(9, "after red team");
        assert_eq!(claim.confidence_score, Some(6));
        assert_eq!(claim.pre_validation_score, Some(6));
        assert!(claim.red_teamed);

        claim.apply_validated_score(2, "disputed");
        assert_eq!(claim.confidence_score, Some(2));
        assert_eq!(claim.band, Some(ConfidenceBand::Low));
        assert_eq!(claim.pre_validation_score, Some(6));
    }

    #[test]
    fn test_claim_map_ids() {
        let mut map = ClaimMap::new();
        assert_eq!(map.create("a", ClaimOrigin::Discovery), "claim-001");
        assert_eq!(map.create("b", ClaimOrigin::Discovery), "claim-002");
        map.remove("claim-001");
        assert_eq!(map.next_id(), "claim-003");
        assert_eq!(map.ids(), vec!["claim-002"]);
    }

    #[test]
    fn test_gap_dimension_unknown_maps_to_other() {
        let gap: Gap =
            serde_json::from_str(r#"{"dimension": "linguistic", "description": "English only"}"#)
                .unwrap();
        assert_eq!(gap.dimension, GapDimension::Other);
    }

    #[test]
    fn test_effect_size_display() {
        let es = EffectSize {
            metric: "d".into(),
            value: 0.67,
        };
        assert_eq!(es.to_string(), "d = 0.67");
    }
}
