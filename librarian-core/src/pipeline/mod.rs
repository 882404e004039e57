//! Multi-stage evidence validation pipeline.
//!
//! A run moves through six fixed stages:
//! 1. **Strategic intelligence**: direction only, never evidence
//! 2. **Search plan**: keywords, boolean groups, databases, seminal authors
//! 3. **Initial discovery**: claims with supporting citations
//! 4. **Counter-evidence**: contradicting studies and alternative explanations
//! 5. **Completeness check**: geographic, demographic, methodological and temporal gaps
//! 6. **Synthesis**: rubric application and methodological assessment
//!
//! Claims are then scored, red-teamed against the search index, and rendered
//! into a deterministic markdown report.

pub mod aggregator;
pub mod claim;
pub mod engine;
pub mod executor;
pub mod outputs;
pub mod prompts;
pub mod red_team;
pub mod report;
pub mod run;
pub mod scoring;
pub mod similarity;
pub mod stage;

pub use aggregator::EvidenceAggregator;
pub use claim::{
    Citation, Claim, ClaimMap, ClaimOrigin, ConfidenceBand, EffectSize, Gap, GapDimension,
    VerificationStatus,
};
pub use engine::{NoOpObserver, PipelineEngine, PipelineObserver};
pub use executor::{StageError, StageExecutor, StageRequest};
pub use red_team::{RedTeamFinding, RedTeamOutcome, RedTeamValidator};
pub use report::ReportSynthesizer;
pub use run::{PipelineRun, RunStatus, RunStore, RunSummary};
pub use scoring::{ConfidenceScorer, ScoringMode, ScoringRubric};
pub use stage::{Stage, StageLog, StageRecord};
