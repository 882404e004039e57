//! The six pipeline stages and their append-only log of records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::{CostEstimate, TokenUsage};

/// A named stage, in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    StrategicIntelligence,
    SearchPlan,
    InitialDiscovery,
    CounterEvidence,
    CompletenessCheck,
    Synthesis,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::StrategicIntelligence,
        Stage::SearchPlan,
        Stage::InitialDiscovery,
        Stage::CounterEvidence,
        Stage::CompletenessCheck,
        Stage::Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StrategicIntelligence => "strategic_intelligence",
            Stage::SearchPlan => "search_plan",
            Stage::InitialDiscovery => "initial_discovery",
            Stage::CounterEvidence => "counter_evidence",
            Stage::CompletenessCheck => "completeness_check",
            Stage::Synthesis => "synthesis",
        }
    }

    /// 1-based position in the sequence.
    pub fn ordinal(&self) -> usize {
        *self as usize + 1
    }

    pub fn first() -> Stage {
        Stage::StrategicIntelligence
    }

    /// The stage that must follow this one, or `None` after synthesis.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(*self as usize + 1).copied()
    }

    /// Whether the model must answer with a JSON object.
    pub fn expects_json(&self) -> bool {
        !matches!(self, Stage::StrategicIntelligence)
    }

    /// Stages that query the search provider before prompting.
    pub fn is_evidence_stage(&self) -> bool {
        matches!(
            self,
            Stage::InitialDiscovery | Stage::CounterEvidence | Stage::CompletenessCheck
        )
    }

    /// Human-readable title used in logs and reports.
    pub fn title(&self) -> &'static str {
        match self {
            Stage::StrategicIntelligence => "Strategic Intelligence",
            Stage::SearchPlan => "Search Plan",
            Stage::InitialDiscovery => "Initial Discovery",
            Stage::CounterEvidence => "Counter-Evidence",
            Stage::CompletenessCheck => "Completeness Check",
            Stage::Synthesis => "Synthesis",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Immutable audit entry for one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_name: Stage,
    pub prompt_sent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub raw_response: String,
    pub timestamp: DateTime<Utc>,
    pub model_identifier: String,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub cost_estimate: CostEstimate,
    /// Gateway attempts it took to get an accepted response.
    #[serde(default = "one")]
    pub attempts: u32,
    /// Search queries whose results were folded into the prompt.
    #[serde(default)]
    pub search_queries: Vec<String>,
}

fn one() -> u32 {
    1
}

/// Append-only, order-enforcing log of stage records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageLog {
    records: Vec<StageRecord>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stage the next record must belong to, or `None` once complete.
    pub fn expected_next(&self) -> Option<Stage> {
        match self.records.last() {
            None => Some(Stage::first()),
            Some(last) => last.stage_name.next(),
        }
    }

    /// Append a record, rejecting skips, repeats and appends after synthesis.
    pub fn append(&mut self, record: StageRecord) -> Result<(), PipelineError> {
        let expected = self.expected_next();
        if expected != Some(record.stage_name) {
            return Err(PipelineError::StageOutOfOrder {
                expected,
                got: record.stage_name,
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn get(&self, stage: Stage) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.stage_name == stage)
    }

    pub fn has_completed(&self, stage: Stage) -> bool {
        self.get(stage).is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.expected_next().is_none()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of token usage over every record.
    pub fn total_usage(&self) -> TokenUsage {
        self.records.iter().fold(TokenUsage::default(), |mut acc, r| {
            acc.accumulate(&r.token_usage);
            acc
        })
    }

    /// Sum of cost over every record.
    pub fn total_cost(&self) -> CostEstimate {
        self.records
            .iter()
            .fold(CostEstimate::default(), |mut acc, r| {
                acc.accumulate(&r.cost_estimate);
                acc
            })
    }

    pub fn into_records(self) -> Vec<StageRecord> {
        self.records
    }
}
