//! Property-based tests for confidence scoring using proptest.

use proptest::prelude::*;

use librarian_core::pipeline::scoring::{ConfidenceScorer, ScoringMode, ScoringRubric, ValidationFindings};
use librarian_core::pipeline::{Citation, Claim, ClaimOrigin, ConfidenceBand};

#[derive(Debug, Clone)]
struct CitationShape {
    sample: Option<u64>,
    replicated: bool,
    lab_only: bool,
    narrow: bool,
}

fn citation_shape() -> impl Strategy<Value = CitationShape> {
    (
        proptest::option::of(1u64..20_000),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(sample, replicated, lab_only, narrow)| CitationShape {
            sample,
            replicated,
            lab_only,
            narrow,
        })
}

fn citation(prefix: &str, i: usize, shape: &CitationShape) -> Citation {
    Citation {
        full_citation: format!("{prefix} author {i} (2020). Study {prefix}-{i}."),
        doi: Some(format!("10.1000/{prefix}.{i}")),
        sample_size: shape.sample,
        replicated: shape.replicated,
        lab_only: shape.lab_only,
        narrow_sample: shape.narrow,
        ..Default::default()
    }
}

fn claim(supporting: &[CitationShape], contradicting: &[CitationShape]) -> Claim {
    let mut claim = Claim::new("claim-001", "Anger increases turnout", ClaimOrigin::Discovery);
    for (i, shape) in supporting.iter().enumerate() {
        claim.add_supporting(citation("s", i, shape));
    }
    for (i, shape) in contradicting.iter().enumerate() {
        claim.add_contradicting(citation("c", i, shape));
    }
    claim
}

fn scorer() -> ConfidenceScorer {
    ConfidenceScorer::new(ScoringRubric::default(), ScoringMode::Rubric)
}

// --- Scoring range and bands ---

proptest! {
    #[test]
    fn score_is_always_in_range(
        supporting in proptest::collection::vec(citation_shape(), 0..8),
        contradicting in proptest::collection::vec(citation_shape(), 0..8),
    ) {
        let mut claim = claim(&supporting, &contradicting);
        scorer().score_claim(&mut claim);
        let score = claim.confidence_score.unwrap();
        prop_assert!(score <= 10);
        prop_assert_eq!(claim.band, Some(ConfidenceBand::from_score(score)));
        prop_assert!(!claim.confidence_rationale.is_empty());
    }

    #[test]
    fn band_thresholds_partition_scores(score in 0u8..=10) {
        let band = ConfidenceBand::from_score(score);
        match score {
            7..=10 => prop_assert_eq!(band, ConfidenceBand::High),
            4..=6 => prop_assert_eq!(band, ConfidenceBand::Medium),
            _ => prop_assert_eq!(band, ConfidenceBand::Low),
        }
    }

    #[test]
    fn adding_contradiction_never_raises_score(
        supporting in proptest::collection::vec(citation_shape(), 1..6),
        extra in citation_shape(),
    ) {
        let mut before = claim(&supporting, &[]);
        scorer().score_claim(&mut before);
        let mut after = claim(&supporting, &[extra]);
        scorer().score_claim(&mut after);
        prop_assert!(after.confidence_score <= before.confidence_score);
    }
}

// --- Red-team revision ---

proptest! {
    #[test]
    fn revision_never_raises_score(
        supporting in proptest::collection::vec(citation_shape(), 0..6),
        added in proptest::collection::vec(citation_shape(), 0..3),
        mismatches in 0usize..3,
        disputed in any::<bool>(),
    ) {
        let scorer = scorer();
        let mut claim = claim(&supporting, &[]);
        scorer.score_claim(&mut claim);
        let pre = claim.confidence_score.unwrap();

        let findings = ValidationFindings {
            added_contradicting: added
                .iter()
                .enumerate()
                .map(|(i, shape)| citation("omitted", i, shape))
                .collect(),
            effect_size_mismatches: (0..mismatches)
                .map(|i| format!("recorded d = 0.{i}5, source reports d = 0.{i}1"))
                .collect(),
            disputed: if disputed { vec!["Ghost study".to_string()] } else { vec![] },
            corrections: vec![],
        };
        let revised = scorer.revise(&mut claim, &findings);

        prop_assert!(revised <= pre);
        prop_assert_eq!(claim.confidence_score, Some(revised));
        prop_assert_eq!(claim.pre_validation_score, Some(pre));
        if disputed {
            prop_assert!(revised <= 3);
        }
    }

    #[test]
    fn clean_revision_keeps_score(
        supporting in proptest::collection::vec(citation_shape(), 0..6),
    ) {
        let scorer = scorer();
        let mut claim = claim(&supporting, &[]);
        scorer.score_claim(&mut claim);
        let pre = claim.confidence_score.unwrap();
        prop_assert_eq!(scorer.revise(&mut claim, &ValidationFindings::default()), pre);
    }
}
