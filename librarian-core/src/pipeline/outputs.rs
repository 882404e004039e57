//! Structured model outputs for the JSON stages.
//!
//! Parsing is lenient about surrounding prose and code fences but strict
//! about shape: a response that does not decode is a malformed output and
//! the stage is retried.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::claim::{Citation, GapDimension};
use super::stage::Stage;
use crate::error::LlmError;

/// Output of `search_plan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPlan {
    pub keywords: Vec<String>,
    pub boolean_groups: Vec<String>,
    pub databases: Vec<String>,
    pub seminal_authors: Vec<String>,
    /// Ready-to-run queries, most important first.
    pub queries: Vec<String>,
}

impl SearchPlan {
    /// Base queries for evidence retrieval, in priority order, without duplicates.
    pub fn base_queries(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = if !self.queries.is_empty() {
            self.queries.clone()
        } else if !self.boolean_groups.is_empty() {
            self.boolean_groups.clone()
        } else if !self.keywords.is_empty() {
            vec![self.keywords.join(" ")]
        } else {
            Vec::new()
        };
        for q in candidates {
            let q = q.trim().to_string();
            if !q.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(&q)) {
                out.push(q);
            }
        }
        out
    }
}

/// A finding proposed by the model, with its evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposedClaim {
    pub text: String,
    pub supporting_citations: Vec<Citation>,
}

/// Output of `initial_discovery`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOutput {
    pub claims: Vec<ProposedClaim>,
}

/// One contradicting citation aimed at a claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contradiction {
    /// Explicit target, e.g. `claim-002`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    /// Claim text, used to locate the target when the id is missing or unknown.
    pub claim_text: String,
    pub citation: Citation,
}

/// Output of `counter_evidence`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterEvidenceOutput {
    pub contradictions: Vec<Contradiction>,
    pub alternative_explanations: Vec<ProposedClaim>,
}

/// One completeness gap, optionally targeted at a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedGap {
    pub dimension: GapDimension,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_study: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
}

/// Output of `completeness_check`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessOutput {
    pub gaps: Vec<ReportedGap>,
}

/// The model's rubric application for one claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimAssessment {
    pub claim_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    pub rubric_application: String,
    pub assessment: String,
}

/// Output of `synthesis`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOutput {
    pub claim_assessments: Vec<ClaimAssessment>,
    pub methodological_strengths: Vec<String>,
    pub methodological_weaknesses: Vec<String>,
    pub future_research_priorities: Vec<String>,
}

/// Slice the outermost JSON object out of a model response.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Decode a stage's JSON output.
pub fn parse_output<T: DeserializeOwned>(stage: Stage, raw: &str) -> Result<T, LlmError> {
    let json = extract_json(raw).ok_or_else(|| LlmError::MalformedOutput {
        stage: stage.to_string(),
        message: "response contains no JSON object".to_string(),
    })?;
    serde_json::from_str(json).map_err(|e| LlmError::MalformedOutput {
        stage: stage.to_string(),
        message: e.to_string(),
    })
}

/// Check that a raw response satisfies its stage's output contract.
pub fn validate_output(stage: Stage, raw: &str) -> Result<(), LlmError> {
    match stage {
        Stage::StrategicIntelligence => {
            if raw.trim().is_empty() {
                Err(LlmError::MalformedOutput {
                    stage: stage.to_string(),
                    message: "empty response".to_string(),
                })
            } else {
                Ok(())
            }
        }
        Stage::SearchPlan => parse_output::<SearchPlan>(stage, raw).map(|_| ()),
        Stage::InitialDiscovery => parse_output::<DiscoveryOutput>(stage, raw).map(|_| ()),
        Stage::CounterEvidence => parse_output::<CounterEvidenceOutput>(stage, raw).map(|_| ()),
        Stage::CompletenessCheck => parse_output::<CompletenessOutput>(stage, raw).map(|_| ()),
        Stage::Synthesis => parse_output::<SynthesisOutput>(stage, raw).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_response() {
        let raw = "Here is the plan:\n```json\n{\"keywords\": [\"anger\"]}\n```\nDone.";
        assert_eq!(extract_json(raw), Some("{\"keywords\": [\"anger\"]}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_search_plan_defaults_missing_fields() {
        let plan: SearchPlan =
            parse_output(Stage::SearchPlan, r#"{"keywords": ["anger", "protest"]}"#).unwrap();
        assert_eq!(plan.keywords.len(), 2);
        assert!(plan.databases.is_empty());
        assert_eq!(plan.base_queries(), vec!["anger protest"]);
    }

    #[test]
    fn test_base_queries_prefers_explicit_and_dedups() {
        let plan = SearchPlan {
            queries: vec!["anger turnout".into(), "Anger Turnout".into(), " ".into()],
            boolean_groups: vec!["(anger OR fear) AND protest".into()],
            ..Default::default()
        };
        assert_eq!(plan.base_queries(), vec!["anger turnout"]);
    }

    #[test]
    fn test_parse_discovery_with_citation_fields() {
        let raw = r#"{"claims": [{"text": "Anger raises turnout",
            "supporting_citations": [{"full_citation": "Smith (2019)", "sample_size": 1200,
            "replicated": true, "effect_size": {"metric": "d", "value": 0.67}}]}]}"#;
        let out: DiscoveryOutput = parse_output(Stage::InitialDiscovery, raw).unwrap();
        let c = &out.claims[0].supporting_citations[0];
        assert_eq!(c.sample_size, Some(1200));
        assert!(c.replicated);
        assert_eq!(c.effect_size.as_ref().map(|e| e.value), Some(0.67));
    }

    #[test]
    fn test_malformed_output_is_transient() {
        let err = validate_output(Stage::InitialDiscovery, "I cannot help with that.").unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput { .. }));
        assert!(err.is_transient());

        let err = validate_output(Stage::CompletenessCheck, r#"{"gaps": "none"}"#).unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput { .. }));
    }

    #[test]
    fn test_strategic_intelligence_accepts_prose() {
        assert!(validate_output(Stage::StrategicIntelligence, "Consider social psychology.").is_ok());
        assert!(validate_output(Stage::StrategicIntelligence, "   ").is_err());
    }
}
