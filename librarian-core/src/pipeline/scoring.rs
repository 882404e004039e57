//! Confidence Scorer: a versioned rubric applied to every claim.
//!
//! The rubric is plain configuration. It is rendered verbatim into the
//! synthesis prompt so the model's application of it is captured in that
//! stage's record, and it is applied here as deterministic arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::debug;

use super::claim::{Citation, Claim, ClaimMap, ConfidenceBand, MAX_SCORE};
use super::stage::{Stage, StageLog};
use crate::error::PipelineError;

/// Where a claim's score comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Deterministic rubric arithmetic.
    #[default]
    Rubric,
    /// The synthesis model's rubric application, falling back to arithmetic.
    Delegated,
}

/// Criteria and point deltas. Penalties are stored as positive magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRubric {
    pub version: String,
    /// Starting score for a claim with at least one supporting citation.
    pub base_score: u8,
    /// Starting score for a claim with no supporting citation.
    pub unsupported_base_score: u8,
    /// Bonus per replicated supporting citation.
    pub replication_bonus: u8,
    /// Bonus per replicated supporting citation with a large sample (replaces the above).
    pub large_replication_bonus: u8,
    pub large_sample_threshold: u64,
    /// Contradicting sample at least `much_larger_ratio` times the largest supporting one.
    pub contradiction_much_larger_penalty: u8,
    pub contradiction_larger_penalty: u8,
    pub contradiction_comparable_penalty: u8,
    pub contradiction_smaller_penalty: u8,
    pub much_larger_ratio: f64,
    /// Contradicting samples at or above this fraction of the supporting one are comparable.
    pub comparable_ratio: f64,
    pub lab_field_gap_penalty: u8,
    pub narrow_sample_penalty: u8,
    pub effect_size_mismatch_penalty: u8,
    /// Absolute difference above which two effect sizes disagree.
    pub effect_size_tolerance: f64,
    /// Highest score a claim with a disputed citation may keep.
    pub disputed_score_ceiling: u8,
}

impl Default for ScoringRubric {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            base_score: 5,
            unsupported_base_score: 2,
            replication_bonus: 1,
            large_replication_bonus: 2,
            large_sample_threshold: 1000,
            contradiction_much_larger_penalty: 4,
            contradiction_larger_penalty: 3,
            contradiction_comparable_penalty: 2,
            contradiction_smaller_penalty: 1,
            much_larger_ratio: 2.0,
            comparable_ratio: 0.5,
            lab_field_gap_penalty: 2,
            narrow_sample_penalty: 1,
            effect_size_mismatch_penalty: 2,
            effect_size_tolerance: 0.005,
            disputed_score_ceiling: 3,
        }
    }
}

impl ScoringRubric {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, value) in [
            ("rubric.base_score", self.base_score),
            ("rubric.unsupported_base_score", self.unsupported_base_score),
            ("rubric.disputed_score_ceiling", self.disputed_score_ceiling),
        ] {
            if value > MAX_SCORE {
                warnings.push(format!("{name} ({value}) exceeds the maximum score {MAX_SCORE}"));
            }
        }
        if self.comparable_ratio > 1.0 || self.comparable_ratio <= 0.0 {
            warnings.push(format!(
                "rubric.comparable_ratio ({}) should be within (0, 1]",
                self.comparable_ratio
            ));
        }
        if self.much_larger_ratio <= 1.0 {
            warnings.push(format!(
                "rubric.much_larger_ratio ({}) should be greater than 1",
                self.much_larger_ratio
            ));
        }
        warnings
    }

    /// Penalty for one contradicting citation, with the reason it applies.
    pub fn contradiction_penalty(
        &self,
        contradicting_sample: Option<u64>,
        largest_supporting_sample: Option<u64>,
    ) -> (u8, &'static str) {
        match (contradicting_sample, largest_supporting_sample) {
            (Some(c), Some(s)) => {
                let (c, s) = (c as f64, s as f64);
                if c >= self.much_larger_ratio * s {
                    (self.contradiction_much_larger_penalty, "much larger sample")
                } else if c > s {
                    (self.contradiction_larger_penalty, "larger sample")
                } else if c >= self.comparable_ratio * s {
                    (self.contradiction_comparable_penalty, "comparable sample")
                } else {
                    (self.contradiction_smaller_penalty, "smaller sample")
                }
            }
            (None, None) => (
                self.contradiction_comparable_penalty,
                "sample sizes unreported",
            ),
            _ => (self.contradiction_smaller_penalty, "sample size unknown on one side"),
        }
    }

    /// Whether two reported effect sizes disagree.
    pub fn effect_sizes_differ(&self, recorded: f64, observed: f64) -> bool {
        (recorded - observed).abs() > self.effect_size_tolerance + f64::EPSILON
    }

    /// The rubric as prompt text.
    pub fn render(&self) -> String {
        let mut out = format!("CONFIDENCE RUBRIC v{}\n", self.version);
        let _ = writeln!(
            out,
            "- Base score {} if the claim has at least one supporting citation, otherwise {}.",
            self.base_score, self.unsupported_base_score
        );
        let _ = writeln!(
            out,
            "- +{} per supporting citation described as replicated (+{} instead when its sample is at least {}).",
            self.replication_bonus, self.large_replication_bonus, self.large_sample_threshold
        );
        let _ = writeln!(
            out,
            "- Per contradicting citation, compared with the largest supporting sample: -{} if at least {}x larger, -{} if larger, -{} if comparable (at least {}x) or both unreported, -{} if smaller or only one side reported.",
            self.contradiction_much_larger_penalty,
            self.much_larger_ratio,
            self.contradiction_larger_penalty,
            self.contradiction_comparable_penalty,
            self.comparable_ratio,
            self.contradiction_smaller_penalty
        );
        let _ = writeln!(
            out,
            "- -{} lab-field gap: every supporting citation is laboratory-only.",
            self.lab_field_gap_penalty
        );
        let _ = writeln!(
            out,
            "- -{} narrow sample bias noted in any supporting citation.",
            self.narrow_sample_penalty
        );
        let _ = writeln!(out, "- Clamp the result to [0, {MAX_SCORE}].");
        let _ = writeln!(
            out,
            "- Bands: HIGH >= 7, MEDIUM 4-6, LOW <= 3 (advisory, shown next to the score)."
        );
        out
    }
}

/// One signed rubric term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub delta: i32,
    pub reason: String,
}

/// The arithmetic behind one score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub rubric_version: String,
    pub base: i32,
    pub adjustments: Vec<Adjustment>,
    pub score: u8,
}

impl ScoreBreakdown {
    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.score)
    }

    /// "Rubric v1: base 5; -3 contradicting citation, larger sample (X) => 2 (LOW)."
    pub fn rationale(&self) -> String {
        let mut out = format!("Rubric v{}: base {}", self.rubric_version, self.base);
        for adj in &self.adjustments {
            let _ = write!(out, "; {:+} {}", adj.delta, adj.reason);
        }
        let _ = write!(out, " => {} ({}).", self.score, self.band());
        out
    }
}

/// Evidence-quality findings from red-teaming one claim.
#[derive(Debug, Clone, Default)]
pub struct ValidationFindings {
    /// Null-result or failed-replication studies found by the omission search.
    pub added_contradicting: Vec<Citation>,
    /// One note per effect-size mismatch, showing recorded and observed values.
    pub effect_size_mismatches: Vec<String>,
    /// Labels of citations that could not be located.
    pub disputed: Vec<String>,
    /// Metadata corrections (venue, year, DOI).
    pub corrections: Vec<String>,
}

impl ValidationFindings {
    pub fn is_clean(&self) -> bool {
        self.added_contradicting.is_empty()
            && self.effect_size_mismatches.is_empty()
            && self.disputed.is_empty()
            && self.corrections.is_empty()
    }
}

/// Applies the rubric to claims.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    rubric: ScoringRubric,
    mode: ScoringMode,
}

impl ConfidenceScorer {
    pub fn new(rubric: ScoringRubric, mode: ScoringMode) -> Self {
        Self { rubric, mode }
    }

    pub fn rubric(&self) -> &ScoringRubric {
        &self.rubric
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    /// Pure rubric arithmetic for one claim.
    pub fn breakdown(&self, claim: &Claim) -> ScoreBreakdown {
        let r = &self.rubric;
        let supporting = &claim.supporting_citations;
        let base = i32::from(if supporting.is_empty() {
            r.unsupported_base_score
        } else {
            r.base_score
        });
        let mut adjustments = Vec::new();

        for c in supporting.iter().filter(|c| c.replicated) {
            let large = c
                .sample_size
                .is_some_and(|n| n >= r.large_sample_threshold);
            let bonus = if large {
                r.large_replication_bonus
            } else {
                r.replication_bonus
            };
            adjustments.push(Adjustment {
                delta: bonus as i32,
                reason: format!(
                    "replicated{} ({})",
                    if large { ", large sample" } else { "" },
                    c.label()
                ),
            });
        }

        let largest = claim.largest_supporting_sample();
        for c in &claim.contradicting_citations {
            adjustments.push(self.contradiction_adjustment(c, largest));
        }

        if !supporting.is_empty() && supporting.iter().all(|c| c.lab_only) {
            adjustments.push(Adjustment {
                delta: -(r.lab_field_gap_penalty as i32),
                reason: "lab-field gap".to_string(),
            });
        }
        if supporting.iter().any(|c| c.narrow_sample) {
            adjustments.push(Adjustment {
                delta: -(r.narrow_sample_penalty as i32),
                reason: "narrow sample bias".to_string(),
            });
        }

        let raw = base + adjustments.iter().map(|a| a.delta).sum::<i32>();
        ScoreBreakdown {
            rubric_version: r.version.clone(),
            base,
            adjustments,
            score: clamp_score(raw),
        }
    }

    fn contradiction_adjustment(&self, c: &Citation, largest: Option<u64>) -> Adjustment {
        let (penalty, why) = self.rubric.contradiction_penalty(c.sample_size, largest);
        Adjustment {
            delta: -(penalty as i32),
            reason: format!("contradicting citation, {why} ({})", c.label()),
        }
    }

    /// Score every claim. Requires initial_discovery and counter_evidence.
    pub fn score_all(&self, claims: &mut ClaimMap, log: &StageLog) -> Result<(), PipelineError> {
        for required in [Stage::InitialDiscovery, Stage::CounterEvidence] {
            if !log.has_completed(required) {
                return Err(PipelineError::ScoringPrecondition { missing: required });
            }
        }
        for claim in claims.iter_mut() {
            self.score_claim(claim);
        }
        Ok(())
    }

    /// Score one claim according to the configured mode.
    pub fn score_claim(&self, claim: &mut Claim) {
        let breakdown = self.breakdown(claim);
        let (score, rationale) = match (self.mode, claim.model_assessed_score) {
            (ScoringMode::Delegated, Some(model_score)) => {
                let score = model_score.min(MAX_SCORE);
                (
                    score,
                    format!(
                        "Model-applied rubric v{}: {}. Arithmetic cross-check: {}",
                        self.rubric.version,
                        score,
                        breakdown.rationale()
                    ),
                )
            }
            _ => (breakdown.score, breakdown.rationale()),
        };
        debug!(claim = %claim.id, score, mode = ?self.mode, "Scored claim");
        if claim.red_teamed {
            claim.apply_validated_score(score, rationale);
        } else {
            claim.set_score(score, rationale);
        }
    }

    /// Downgrade a claim after red-teaming. Never raises the score.
    ///
    /// Added counter-evidence is expected to be on the claim already; its
    /// penalties are computed here against the claim's supporting samples.
    pub fn revise(&self, claim: &mut Claim, findings: &ValidationFindings) -> u8 {
        let pre = claim
            .confidence_score
            .unwrap_or_else(|| self.breakdown(claim).score);
        if claim.confidence_score.is_none() {
            let rationale = self.breakdown(claim).rationale();
            claim.set_score(pre, rationale);
        }

        let largest = claim.largest_supporting_sample();
        let mut adjustments: Vec<Adjustment> = findings
            .added_contradicting
            .iter()
            .map(|c| self.contradiction_adjustment(c, largest))
            .collect();
        for note in &findings.effect_size_mismatches {
            adjustments.push(Adjustment {
                delta: -(self.rubric.effect_size_mismatch_penalty as i32),
                reason: format!("effect size mismatch: {note}"),
            });
        }

        let raw = pre as i32 + adjustments.iter().map(|a| a.delta).sum::<i32>();
        let mut score = clamp_score(raw).min(pre);
        if !findings.disputed.is_empty() {
            score = score.min(self.rubric.disputed_score_ceiling);
        }

        let mut rationale = claim.confidence_rationale.clone();
        if findings.is_clean() {
            let _ = write!(rationale, " Red team: citations confirmed; score unchanged.");
        } else {
            let _ = write!(rationale, " Red team: pre-validation {pre}");
            for adj in &adjustments {
                let _ = write!(rationale, "; {:+} {}", adj.delta, adj.reason);
            }
            for label in &findings.disputed {
                let _ = write!(
                    rationale,
                    "; disputed citation \"{label}\" could not be located, capped at {}",
                    self.rubric.disputed_score_ceiling
                );
            }
            for correction in &findings.corrections {
                let _ = write!(rationale, "; corrected {correction}");
            }
            let _ = write!(
                rationale,
                " => {score} ({}).",
                ConfidenceBand::from_score(score)
            );
        }

        claim.apply_validated_score(score, rationale);
        score
    }
}

fn clamp_score(raw: i32) -> u8 {
    raw.clamp(0, MAX_SCORE as i32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::claim::ClaimOrigin;

    fn citation(title: &str, sample: Option<u64>) -> Citation {
        Citation {
            full_citation: title.to_string(),
            title: Some(title.to_string()),
            sample_size: sample,
            ..Default::default()
        }
    }

    fn claim_with(supporting: Vec<Citation>, contradicting: Vec<Citation>) -> Claim {
        let mut claim = Claim::new("claim-001", "Anger increases turnout", ClaimOrigin::Discovery);
        claim.supporting_citations = supporting;
        claim.contradicting_citations = contradicting;
        claim
    }

    #[test]
    fn test_base_score_with_single_support() {
        let scorer = ConfidenceScorer::default();
        let claim = claim_with(vec![citation("A", Some(200))], vec![]);
        let b = scorer.breakdown(&claim);
        assert_eq!(b.score, 5);
        assert_eq!(b.band(), ConfidenceBand::Medium);
    }

    #[test]
    fn test_unsupported_claim_starts_low() {
        let scorer = ConfidenceScorer::default();
        let claim = claim_with(vec![], vec![]);
        assert_eq!(scorer.breakdown(&claim).score, 2);
    }

    #[test]
    fn test_larger_contradiction_costs_three() {
        let scorer = ConfidenceScorer::default();
        let claim = claim_with(
            vec![citation("Support", Some(300))],
            vec![citation("Counter", Some(500))],
        );
        let b = scorer.breakdown(&claim);
        assert_eq!(b.score, 2);
        assert_eq!(b.band(), ConfidenceBand::Low);
        assert!(b.rationale().contains("larger sample (Counter)"));
    }

    #[test]
    fn test_contradiction_penalty_tiers() {
        let r = ScoringRubric::default();
        assert_eq!(r.contradiction_penalty(Some(2000), Some(1000)).0, 4);
        assert_eq!(r.contradiction_penalty(Some(1500), Some(1000)).0, 3);
        assert_eq!(r.contradiction_penalty(Some(1000), Some(1000)).0, 2);
        assert_eq!(r.contradiction_penalty(Some(500), Some(1000)).0, 2);
        assert_eq!(r.contradiction_penalty(Some(100), Some(1000)).0, 1);
        assert_eq!(r.contradiction_penalty(None, None).0, 2);
        assert_eq!(r.contradiction_penalty(Some(100), None).0, 1);
    }

    #[test]
    fn test_replication_bonuses() {
        let scorer = ConfidenceScorer::default();
        let mut big = citation("Big replication", Some(2400));
        big.replicated = true;
        let mut small = citation("Small replication", Some(80));
        small.replicated = true;
        let claim = claim_with(vec![big, small], vec![]);
        assert_eq!(scorer.breakdown(&claim).score, 8);
    }

    #[test]
    fn test_lab_gap_and_narrow_sample() {
        let scorer = ConfidenceScorer::default();
        let mut a = citation("Lab 1", Some(60));
        a.lab_only = true;
        a.narrow_sample = true;
        let mut b = citation("Lab 2", Some(90));
        b.lab_only = true;
        let claim = claim_with(vec![a, b.clone()], vec![]);
        assert_eq!(scorer.breakdown(&claim).score, 2);

        // A single field study closes the lab-field gap.
        b.lab_only = false;
        let mut c = citation("Lab 1", Some(60));
        c.lab_only = true;
        let claim = claim_with(vec![c, b], vec![]);
        assert_eq!(scorer.breakdown(&claim).score, 5);
    }

    #[test]
    fn test_score_clamped_at_zero() {
        let scorer = ConfidenceScorer::default();
        let claim = claim_with(
            vec![citation("S", Some(10))],
            vec![
                citation("C1", Some(1000)),
                citation("C2", Some(1000)),
                citation("C3", Some(1000)),
            ],
        );
        assert_eq!(scorer.breakdown(&claim).score, 0);
    }

    #[test]
    fn test_score_all_requires_counter_evidence() {
        let scorer = ConfidenceScorer::default();
        let mut claims = ClaimMap::new();
        claims.create("x", ClaimOrigin::Discovery);
        let err = scorer.score_all(&mut claims, &StageLog::new()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ScoringPrecondition {
                missing: Stage::InitialDiscovery
            }
        ));
    }

    #[test]
    fn test_delegated_mode_uses_model_score() {
        let scorer = ConfidenceScorer::new(ScoringRubric::default(), ScoringMode::Delegated);
        let mut claim = claim_with(vec![citation("S", Some(100))], vec![]);
        claim.model_assessed_score = Some(7);
        scorer.score_claim(&mut claim);
        assert_eq!(claim.confidence_score, Some(7));
        assert!(claim.confidence_rationale.contains("Model-applied rubric v1"));

        let mut fallback = claim_with(vec![citation("S", Some(100))], vec![]);
        scorer.score_claim(&mut fallback);
        assert_eq!(fallback.confidence_score, Some(5));
    }

    #[test]
    fn test_revise_effect_size_mismatch() {
        let scorer = ConfidenceScorer::default();
        let mut claim = claim_with(vec![citation("S", Some(100))], vec![]);
        claim.set_score(8, "seeded");
        let findings = ValidationFindings {
            effect_size_mismatches: vec!["recorded d = 0.67, source reports d = 0.64".into()],
            ..Default::default()
        };
        assert_eq!(scorer.revise(&mut claim, &findings), 6);
        assert_eq!(claim.band, Some(ConfidenceBand::Medium));
        assert_eq!(claim.pre_validation_score, Some(8));
        assert!(claim.confidence_rationale.contains("d = 0.64"));
    }

    #[test]
    fn test_revise_disputed_caps_score() {
        let scorer = ConfidenceScorer::default();
        let mut claim = claim_with(vec![citation("Ghost study", None)], vec![]);
        claim.set_score(9, "seeded");
        let findings = ValidationFindings {
            disputed: vec!["Ghost study".into()],
            ..Default::default()
        };
        assert_eq!(scorer.revise(&mut claim, &findings), 3);
        assert!(claim.confidence_rationale.contains("disputed citation \"Ghost study\""));
    }

    #[test]
    fn test_revise_clean_keeps_score() {
        let scorer = ConfidenceScorer::default();
        let mut claim = claim_with(vec![citation("S", Some(100))], vec![]);
        claim.set_score(2, "seeded");
        assert_eq!(scorer.revise(&mut claim, &ValidationFindings::default()), 2);
        assert!(claim.red_teamed);
    }

    #[test]
    fn test_rubric_render_mentions_version_and_deltas() {
        let text = ScoringRubric::default().render();
        assert!(text.starts_with("CONFIDENCE RUBRIC v1"));
        assert!(text.contains("-4 if at least 2x larger"));
        assert!(text.contains("-2 lab-field gap"));
    }
}
