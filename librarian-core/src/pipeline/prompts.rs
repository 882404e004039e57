//! Compiled-in stage prompts and the context fold over prior stage records.

use std::fmt::Write as _;

use super::claim::ClaimMap;
use super::stage::{Stage, StageLog};
use crate::search::RawCitationRecord;

const BASE_SYSTEM: &str = "You are a rigorous research librarian conducting a systematic literature review. \
Cite only sources you can identify precisely (authors, title, venue, year, DOI when available). \
Never invent studies, statistics or DOIs. When unsure, say so.";

const CITATION_SHAPE: &str = r#"Each citation is an object:
{"full_citation": str, "title": str, "venue": str, "year": int, "doi": str,
 "methodology_summary": str, "sample_description": str, "sample_size": int,
 "key_finding": str, "effect_size": {"metric": str, "value": number},
 "replicated": bool, "lab_only": bool, "narrow_sample": bool}
Omit fields you cannot state with confidence."#;

/// Stage-specific system instruction.
pub fn system_instruction(stage: Stage) -> String {
    let role = match stage {
        Stage::StrategicIntelligence => {
            "Provide strategic research direction only: terminology, relevant disciplines, \
             methodological angles and debates. Do not state findings or cite evidence."
        }
        Stage::SearchPlan => "Design a systematic, reproducible search strategy.",
        Stage::InitialDiscovery => {
            "Report what the peer-reviewed literature finds, claim by claim, with supporting citations \
             ordered strongest first."
        }
        Stage::CounterEvidence => {
            "Act as an adversarial reviewer. Challenge every claim with contradicting, null-result \
             and failed-replication studies, and propose alternative explanations."
        }
        Stage::CompletenessCheck => {
            "Audit the evidence base for geographic, demographic, methodological and temporal gaps \
             and recommend specific missing studies."
        }
        Stage::Synthesis => {
            "Apply the confidence rubric exactly as written to each claim and assess the \
             methodological quality of the evidence base."
        }
    };
    format!("{BASE_SYSTEM}\n\n{role}")
}

fn task(stage: Stage) -> String {
    match stage {
        Stage::StrategicIntelligence => "TASK: Give strategic guidance for researching the question above: \
            key terminology and synonyms, disciplines to search, methodological approaches, and known debates. \
            Plain prose. This guidance steers the search; it is not evidence."
            .to_string(),
        Stage::SearchPlan => r#"TASK: Produce a systematic search plan as a JSON object:
{"keywords": [str], "boolean_groups": [str], "databases": [str], "seminal_authors": [str], "queries": [str]}
"queries" are ready-to-run academic search queries, most important first."#
            .to_string(),
        Stage::InitialDiscovery => format!(
            r#"TASK: Using the search results and your knowledge, list the distinct findings on the question as a JSON object:
{{"claims": [{{"text": str, "supporting_citations": [citation]}}]}}
{CITATION_SHAPE}"#
        ),
        Stage::CounterEvidence => format!(
            r#"TASK: Challenge the claims under review. Return a JSON object:
{{"contradictions": [{{"claim_id": str, "claim_text": str, "citation": citation}}],
  "alternative_explanations": [{{"text": str, "supporting_citations": [citation]}}]}}
Reference the claim id you are contradicting.
{CITATION_SHAPE}"#
        ),
        Stage::CompletenessCheck => r#"TASK: Identify structural gaps in the evidence. Return a JSON object:
{"gaps": [{"dimension": "geographic" | "demographic" | "methodological" | "temporal",
           "description": str, "recommended_study": str, "claim_id": str | null}]}
Use claim_id when a gap concerns one claim, null when it concerns the whole question."#
            .to_string(),
        Stage::Synthesis => r#"TASK: Apply the rubric to every claim under review and return a JSON object:
{"claim_assessments": [{"claim_id": str, "score": int, "rubric_application": str, "assessment": str}],
 "methodological_strengths": [str], "methodological_weaknesses": [str], "future_research_priorities": [str]}
"rubric_application" lists each rubric term you applied with its points."#
            .to_string(),
    }
}

/// Extra material folded into a stage prompt besides prior responses.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub search_results: &'a [RawCitationRecord],
    /// Claims aggregated so far, for stages that target claims by id.
    pub claims: Option<&'a ClaimMap>,
    /// Rendered scoring rubric, for synthesis.
    pub rubric: Option<&'a str>,
    /// Maximum characters kept from each prior response (0 = unlimited).
    pub max_context_chars: usize,
}

/// Build a stage prompt as a fold over the research question and prior records.
pub fn build_prompt(
    stage: Stage,
    research_question: &str,
    log: &StageLog,
    inputs: &PromptInputs<'_>,
) -> String {
    let mut prompt = format!("RESEARCH QUESTION: {research_question}\n");

    prompt = log.records().iter().fold(prompt, |mut acc, record| {
        let _ = write!(
            acc,
            "\n=== PRIOR STAGE {}: {} ===\n{}\n",
            record.stage_name.ordinal(),
            record.stage_name.title(),
            truncate(&record.raw_response, inputs.max_context_chars)
        );
        acc
    });

    if log.has_completed(Stage::StrategicIntelligence) && stage != Stage::SearchPlan {
        prompt.push_str(
            "\nNOTE: Strategic guidance above is direction only and must not be cited as evidence.\n",
        );
    }

    if stage.is_evidence_stage() {
        prompt.push_str(&render_search_results(inputs.search_results));
    }

    if let Some(claims) = inputs.claims
        && !claims.is_empty()
    {
        prompt.push_str(&render_claims(claims));
    }

    if let Some(rubric) = inputs.rubric {
        prompt.push('\n');
        prompt.push_str(rubric);
    }

    prompt.push('\n');
    prompt.push_str(&task(stage));
    prompt
}

fn render_search_results(records: &[RawCitationRecord]) -> String {
    if records.is_empty() {
        return "\n=== SEARCH RESULTS ===\n(no records returned)\n".to_string();
    }
    let mut out = format!("\n=== SEARCH RESULTS ({} records) ===\n", records.len());
    for (i, r) in records.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i + 1, r.display_citation());
        if let Some(abs) = &r.abstract_text {
            let _ = writeln!(out, "    Abstract: {}", truncate(abs, 600));
        }
    }
    out
}

fn render_claims(claims: &ClaimMap) -> String {
    let mut out = String::from("\n=== CLAIMS UNDER REVIEW ===\n");
    for claim in claims.iter() {
        let _ = writeln!(out, "{}: {}", claim.id, claim.text);
        for c in &claim.supporting_citations {
            let _ = writeln!(
                out,
                "  + {} | sample: {} | replicated: {} | lab-only: {} | narrow sample: {}",
                c.full_citation,
                c.sample_size
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unreported".to_string()),
                c.replicated,
                c.lab_only,
                c.narrow_sample
            );
        }
        for c in &claim.contradicting_citations {
            let _ = writeln!(
                out,
                "  - {} | sample: {}",
                c.full_citation,
                c.sample_size
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unreported".to_string())
            );
        }
        for gap in &claim.annotations {
            let _ = writeln!(out, "  ? {} gap: {}", gap.dimension, gap.description);
        }
    }
    out
}

/// Cut `text` to at most `max` characters on a char boundary (0 = unlimited).
pub fn truncate(text: &str, max: usize) -> &str {
    if max == 0 || text.chars().count() <= max {
        return text;
    }
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::claim::ClaimOrigin;
    use crate::pipeline::stage::StageRecord;
    use crate::types::{CostEstimate, TokenUsage};
    use chrono::Utc;

    fn record(stage: Stage, response: &str) -> StageRecord {
        StageRecord {
            stage_name: stage,
            prompt_sent: String::new(),
            system_instruction: None,
            raw_response: response.to_string(),
            timestamp: Utc::now(),
            model_identifier: "m".into(),
            token_usage: TokenUsage::default(),
            cost_estimate: CostEstimate::default(),
            attempts: 1,
            search_queries: vec![],
        }
    }

    #[test]
    fn test_first_prompt_contains_only_question_and_task() {
        let prompt = build_prompt(
            Stage::StrategicIntelligence,
            "Do emotional appeals increase protest turnout?",
            &StageLog::new(),
            &PromptInputs::default(),
        );
        assert!(prompt.starts_with("RESEARCH QUESTION: Do emotional appeals"));
        assert!(!prompt.contains("PRIOR STAGE"));
        assert!(prompt.contains("not evidence"));
    }

    #[test]
    fn test_prompt_folds_prior_responses_in_order() {
        let mut log = StageLog::new();
        log.append(record(Stage::StrategicIntelligence, "GUIDANCE-TEXT"))
            .unwrap();
        log.append(record(Stage::SearchPlan, "{\"keywords\": []}"))
            .unwrap();
        let prompt = build_prompt(
            Stage::InitialDiscovery,
            "Q?",
            &log,
            &PromptInputs::default(),
        );
        let g = prompt.find("GUIDANCE-TEXT").unwrap();
        let p = prompt.find("PRIOR STAGE 2: Search Plan").unwrap();
        assert!(g < p);
        assert!(prompt.contains("must not be cited as evidence"));
        assert!(prompt.contains("(no records returned)"));
    }

    #[test]
    fn test_prompt_includes_search_results_and_claims() {
        let records = vec![RawCitationRecord {
            source: "mock".into(),
            title: "Anger and protest".into(),
            year: Some(2019),
            abstract_text: Some("Field study.".into()),
            ..Default::default()
        }];
        let mut claims = ClaimMap::new();
        claims.create("Anger raises turnout", ClaimOrigin::Discovery);
        let prompt = build_prompt(
            Stage::CounterEvidence,
            "Q?",
            &StageLog::new(),
            &PromptInputs {
                search_results: &records,
                claims: Some(&claims),
                ..Default::default()
            },
        );
        assert!(prompt.contains("SEARCH RESULTS (1 records)"));
        assert!(prompt.contains("Abstract: Field study."));
        assert!(prompt.contains("claim-001: Anger raises turnout"));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 0), "abc");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_system_instruction_is_stage_specific() {
        assert!(system_instruction(Stage::CounterEvidence).contains("adversarial"));
        assert!(system_instruction(Stage::StrategicIntelligence).contains("Do not state findings"));
    }
}
