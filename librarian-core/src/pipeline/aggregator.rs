//! Evidence Aggregator: merges evidence-stage outputs into the claim map.
//!
//! Every step takes the current map by reference and returns a new one, so
//! a stage's claim updates become visible only once its aggregation is done.

use tracing::{debug, warn};

use super::claim::{Citation, ClaimMap, ClaimOrigin, Gap, VerificationStatus};
use super::outputs::{
    CompletenessOutput, CounterEvidenceOutput, DiscoveryOutput, ProposedClaim, SynthesisOutput,
};
use super::similarity::{has_negation, text_similarity};
use crate::config::PipelineConfig;

/// Result of folding `completeness_check` into the claims.
#[derive(Debug, Clone)]
pub struct CompletenessResult {
    pub claims: ClaimMap,
    /// Gaps that concern the question as a whole.
    pub run_gaps: Vec<Gap>,
}

/// Result of folding `counter_evidence` into the claims.
#[derive(Debug, Clone)]
pub struct CounterEvidenceResult {
    pub claims: ClaimMap,
    /// Contradicting citations that matched no claim.
    pub unattached: Vec<Citation>,
}

/// Merges stage outputs into a deduplicated claim map.
#[derive(Debug, Clone)]
pub struct EvidenceAggregator {
    dedup_threshold: f64,
    min_overlap: f64,
}

impl Default for EvidenceAggregator {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl EvidenceAggregator {
    pub fn new(dedup_threshold: f64, min_overlap: f64) -> Self {
        Self {
            dedup_threshold,
            min_overlap,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.dedup_threshold, config.contradiction_min_overlap)
    }

    /// One claim per distinct finding of `initial_discovery`.
    pub fn apply_discovery(&self, claims: &ClaimMap, output: DiscoveryOutput) -> ClaimMap {
        let mut next = claims.clone();
        for proposed in output.claims {
            self.merge_or_insert(&mut next, proposed, ClaimOrigin::Discovery);
        }
        debug!(claims = next.len(), "Aggregated initial discovery");
        next
    }

    /// Attach contradicting citations and add alternative explanations.
    pub fn apply_counter_evidence(
        &self,
        claims: &ClaimMap,
        output: CounterEvidenceOutput,
    ) -> CounterEvidenceResult {
        let mut next = claims.clone();
        let mut unattached = Vec::new();

        for contradiction in output.contradictions {
            let citation = fresh(contradiction.citation);
            let target = contradiction
                .claim_id
                .filter(|id| next.contains(id))
                .or_else(|| {
                    let needle = if contradiction.claim_text.trim().is_empty() {
                        citation.key_finding.as_str()
                    } else {
                        contradiction.claim_text.as_str()
                    };
                    self.best_match(&next, needle)
                });
            match target.and_then(|id| next.get_mut(&id)) {
                Some(claim) => {
                    claim.add_contradicting(citation);
                }
                None => {
                    warn!(citation = %citation.label(), "Contradicting citation matches no claim");
                    unattached.push(citation);
                }
            }
        }

        for alternative in output.alternative_explanations {
            self.merge_or_insert(&mut next, alternative, ClaimOrigin::AlternativeExplanation);
        }

        debug!(
            claims = next.len(),
            unattached = unattached.len(),
            "Aggregated counter-evidence"
        );
        CounterEvidenceResult {
            claims: next,
            unattached,
        }
    }

    /// Attach completeness gaps as annotations. Gaps are never citations.
    pub fn apply_completeness(
        &self,
        claims: &ClaimMap,
        output: CompletenessOutput,
    ) -> CompletenessResult {
        let mut next = claims.clone();
        let mut run_gaps = Vec::new();
        for reported in output.gaps {
            let gap = Gap {
                dimension: reported.dimension,
                description: reported.description,
                recommended_study: reported.recommended_study,
            };
            match reported.claim_id.as_deref().and_then(|id| next.get_mut(id)) {
                Some(claim) => {
                    if !claim.annotations.contains(&gap) {
                        claim.annotations.push(gap);
                    }
                }
                None => {
                    if !run_gaps.contains(&gap) {
                        run_gaps.push(gap);
                    }
                }
            }
        }
        CompletenessResult {
            claims: next,
            run_gaps,
        }
    }

    /// Record the synthesis model's per-claim rubric application.
    pub fn apply_synthesis(&self, claims: &ClaimMap, output: &SynthesisOutput) -> ClaimMap {
        let mut next = claims.clone();
        for assessment in &output.claim_assessments {
            let Some(claim) = next.get_mut(&assessment.claim_id) else {
                warn!(claim = %assessment.claim_id, "Synthesis assessed an unknown claim");
                continue;
            };
            claim.model_assessed_score = assessment.score.map(|s| s.clamp(0, 10) as u8);
            if !assessment.assessment.trim().is_empty() {
                claim.assessment = Some(assessment.assessment.trim().to_string());
            }
        }
        next
    }

    /// Merge into a near-duplicate claim or insert a new one. Returns the surviving id.
    ///
    /// Only claims of the same origin and the same polarity merge: an
    /// alternative explanation never folds into the claim it challenges.
    pub fn merge_or_insert(
        &self,
        claims: &mut ClaimMap,
        proposed: ProposedClaim,
        origin: ClaimOrigin,
    ) -> Option<String> {
        let text = proposed.text.trim().to_string();
        if text.is_empty() {
            return None;
        }
        let incoming: Vec<Citation> = proposed.supporting_citations.into_iter().map(fresh).collect();

        let negated = has_negation(&text);
        let duplicate = claims
            .iter()
            .filter(|c| c.origin == origin && has_negation(&c.text) == negated)
            .map(|c| (c.id.clone(), text_similarity(&c.text, &text)))
            .filter(|(_, sim)| *sim >= self.dedup_threshold)
            .fold(None::<(String, f64)>, |best, (id, sim)| match best {
                Some((_, best_sim)) if best_sim >= sim => best,
                _ => Some((id, sim)),
            });

        if let Some((id, similarity)) = duplicate
            && let Some(existing) = claims.get_mut(&id)
        {
            debug!(claim = %id, similarity, "Merging near-duplicate claim");
            if incoming.len() > existing.supporting_citations.len() {
                // The better-supported phrasing wins; its citations lead.
                existing.text = text;
                let previous = std::mem::take(&mut existing.supporting_citations);
                for c in incoming.into_iter().chain(previous) {
                    existing.add_supporting(c);
                }
            } else {
                for c in incoming {
                    existing.add_supporting(c);
                }
            }
            return Some(id);
        }

        let id = claims.create(text, origin);
        if let Some(claim) = claims.get_mut(&id) {
            for c in incoming {
                claim.add_supporting(c);
            }
        }
        Some(id)
    }

    fn best_match(&self, claims: &ClaimMap, needle: &str) -> Option<String> {
        claims
            .iter()
            .map(|c| (c.id.clone(), text_similarity(&c.text, needle)))
            .filter(|(_, sim)| *sim >= self.min_overlap)
            .fold(None::<(String, f64)>, |best, (id, sim)| match best {
                Some((_, best_sim)) if best_sim >= sim => best,
                _ => Some((id, sim)),
            })
            .map(|(id, _)| id)
    }
}

/// Model-supplied citations start unverified.
fn fresh(mut citation: Citation) -> Citation {
    citation.verification_status = VerificationStatus::Unverified;
    citation.correction = None;
    citation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::claim::GapDimension;
    use crate::pipeline::outputs::{ClaimAssessment, Contradiction, ReportedGap};

    fn cite(title: &str, doi: Option<&str>) -> Citation {
        Citation {
            full_citation: format!("{title} (2020)"),
            title: Some(title.to_string()),
            doi: doi.map(String::from),
            ..Default::default()
        }
    }

    fn proposed(text: &str, citations: Vec<Citation>) -> ProposedClaim {
        ProposedClaim {
            text: text.to_string(),
            supporting_citations: citations,
        }
    }

    fn discovered() -> ClaimMap {
        EvidenceAggregator::default().apply_discovery(
            &ClaimMap::new(),
            DiscoveryOutput {
                claims: vec![
                    proposed(
                        "Anger increases protest turnout among young adults",
                        vec![cite("Anger study", Some("10.1/a"))],
                    ),
                    proposed(
                        "Hope messaging increases donations to campaigns",
                        vec![cite("Hope study", Some("10.1/h"))],
                    ),
                ],
            },
        )
    }

    #[test]
    fn test_discovery_creates_unscored_claims() {
        let claims = discovered();
        assert_eq!(claims.len(), 2);
        assert!(claims.iter().all(|c| c.confidence_score.is_none()));
        assert_eq!(
            claims.get("claim-001").map(|c| c.supporting_citations.len()),
            Some(1)
        );
    }

    #[test]
    fn test_discovery_merges_near_duplicates_keeping_better_supported() {
        let claims = EvidenceAggregator::default().apply_discovery(
            &ClaimMap::new(),
            DiscoveryOutput {
                claims: vec![
                    proposed(
                        "Anger increases protest turnout among young adults",
                        vec![cite("A", Some("10.1/a"))],
                    ),
                    proposed(
                        "Anger increases protest turnout in young adults",
                        vec![cite("B", Some("10.1/b")), cite("A again", Some("10.1/A"))],
                    ),
                ],
            },
        );
        assert_eq!(claims.len(), 1);
        let claim = claims.get("claim-001").unwrap();
        assert_eq!(claim.text, "Anger increases protest turnout in young adults");
        let titles: Vec<&str> = claim.supporting_citations.iter().map(|c| c.label()).collect();
        assert_eq!(titles, vec!["B", "A again"]);
    }

    #[test]
    fn test_discovery_keeps_negated_phrasing_separate() {
        let claims = EvidenceAggregator::default().apply_discovery(
            &ClaimMap::new(),
            DiscoveryOutput {
                claims: vec![
                    proposed(
                        "Anger increases protest turnout among young adults",
                        vec![cite("Pro", Some("10.1/pro"))],
                    ),
                    proposed(
                        "Anger does not increase protest turnout among young adults",
                        vec![cite("Null A", Some("10.1/na")), cite("Null B", Some("10.1/nb"))],
                    ),
                ],
            },
        );
        assert_eq!(claims.len(), 2);
        let first = claims.get("claim-001").unwrap();
        assert_eq!(first.text, "Anger increases protest turnout among young adults");
        assert_eq!(first.supporting_citations.len(), 1);
        assert_eq!(claims.get("claim-002").unwrap().supporting_citations.len(), 2);
    }

    #[test]
    fn test_alternative_explanation_never_merges_into_discovery_claim() {
        let claims = EvidenceAggregator::default().apply_discovery(
            &ClaimMap::new(),
            DiscoveryOutput {
                claims: vec![proposed(
                    "Anger increases protest turnout among young adults",
                    vec![cite("Pro", Some("10.1/pro"))],
                )],
            },
        );
        let result = EvidenceAggregator::default().apply_counter_evidence(
            &claims,
            CounterEvidenceOutput {
                contradictions: vec![],
                alternative_explanations: vec![
                    proposed(
                        "Anger does not increase protest turnout among young adults",
                        vec![cite("Null A", Some("10.1/na")), cite("Null B", Some("10.1/nb"))],
                    ),
                    // Same wording as the discovery claim, still kept apart.
                    proposed(
                        "Anger increases protest turnout among young adults",
                        vec![cite("Other", Some("10.1/other"))],
                    ),
                ],
            },
        );

        assert_eq!(result.claims.len(), 3);
        let original = result.claims.get("claim-001").unwrap();
        assert_eq!(original.origin, ClaimOrigin::Discovery);
        assert_eq!(original.text, "Anger increases protest turnout among young adults");
        let labels: Vec<&str> = original.supporting_citations.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["Pro"]);
        assert!(original.contradicting_citations.is_empty());

        let challenger = result.claims.get("claim-002").unwrap();
        assert_eq!(challenger.origin, ClaimOrigin::AlternativeExplanation);
        assert_eq!(challenger.supporting_citations.len(), 2);
    }

    #[test]
    fn test_counter_evidence_targets_by_id_then_text() {
        let claims = discovered();
        let result = EvidenceAggregator::default().apply_counter_evidence(
            &claims,
            CounterEvidenceOutput {
                contradictions: vec![
                    Contradiction {
                        claim_id: Some("claim-002".into()),
                        claim_text: String::new(),
                        citation: cite("No hope effect", None),
                    },
                    Contradiction {
                        claim_id: Some("claim-999".into()),
                        claim_text: "Anger increases protest turnout".into(),
                        citation: cite("Anger null", None),
                    },
                    Contradiction {
                        claim_id: None,
                        claim_text: "Tax policy and growth".into(),
                        citation: cite("Unrelated", None),
                    },
                ],
                alternative_explanations: vec![proposed(
                    "Group identity rather than emotion drives turnout",
                    vec![],
                )],
            },
        );
        let c1 = result.claims.get("claim-001").unwrap();
        assert_eq!(c1.contradicting_citations[0].label(), "Anger null");
        let c2 = result.claims.get("claim-002").unwrap();
        assert_eq!(c2.contradicting_citations[0].label(), "No hope effect");
        assert_eq!(result.unattached.len(), 1);
        let alt = result.claims.get("claim-003").unwrap();
        assert_eq!(alt.origin, ClaimOrigin::AlternativeExplanation);
        // Input map untouched.
        assert!(claims.get("claim-003").is_none());
    }

    #[test]
    fn test_completeness_gaps_are_annotations() {
        let claims = discovered();
        let result = EvidenceAggregator::default().apply_completeness(
            &claims,
            CompletenessOutput {
                gaps: vec![
                    ReportedGap {
                        dimension: GapDimension::Geographic,
                        description: "Only US samples".into(),
                        recommended_study: Some("Cross-national panel".into()),
                        claim_id: Some("claim-001".into()),
                    },
                    ReportedGap {
                        dimension: GapDimension::Temporal,
                        description: "No studies after 2020".into(),
                        recommended_study: None,
                        claim_id: None,
                    },
                ],
            },
        );
        let c1 = result.claims.get("claim-001").unwrap();
        assert_eq!(c1.annotations.len(), 1);
        assert_eq!(c1.supporting_citations.len(), 1);
        assert_eq!(result.run_gaps.len(), 1);
        assert_eq!(result.run_gaps[0].dimension, GapDimension::Temporal);
    }

    #[test]
    fn test_synthesis_records_model_scores() {
        let claims = discovered();
        let next = EvidenceAggregator::default().apply_synthesis(
            &claims,
            &SynthesisOutput {
                claim_assessments: vec![ClaimAssessment {
                    claim_id: "claim-001".into(),
                    score: Some(14),
                    rubric_application: "base 5 ...".into(),
                    assessment: "Robust in lab settings.".into(),
                }],
                ..Default::default()
            },
        );
        let c1 = next.get("claim-001").unwrap();
        assert_eq!(c1.model_assessed_score, Some(10));
        assert_eq!(c1.assessment.as_deref(), Some("Robust in lab settings."));
        assert!(c1.confidence_score.is_none());
    }

    #[test]
    fn test_model_supplied_verification_is_reset() {
        let mut c = cite("Self-verified", None);
        c.verification_status = VerificationStatus::Verified;
        let claims = EvidenceAggregator::default().apply_discovery(
            &ClaimMap::new(),
            DiscoveryOutput {
                claims: vec![proposed("Some finding about turnout", vec![c])],
            },
        );
        let claim = claims.get("claim-001").unwrap();
        assert_eq!(
            claim.supporting_citations[0].verification_status,
            VerificationStatus::Unverified
        );
    }
}
