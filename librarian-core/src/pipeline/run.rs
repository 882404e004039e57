//! The pipeline run: research question, stage log, claims, and final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use super::claim::{Citation, ClaimMap, Gap};
use super::outputs::SearchPlan;
use super::red_team::RedTeamFinding;
use super::stage::{Stage, StageLog, StageRecord};
use crate::error::{AbortedRun, LibrarianError, PipelineError};
use crate::persistence::{atomic_write_json, json_files, load_json};
use crate::types::{CostEstimate, TokenUsage};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Stage that was executing, or `None` when the red-team pass failed.
    pub stage: Option<Stage>,
    pub cause: String,
}

/// Methodology notes returned by the synthesis stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisNotes {
    pub methodological_strengths: Vec<String>,
    pub methodological_weaknesses: Vec<String>,
    pub future_research_priorities: Vec<String>,
}

/// One execution of the pipeline for one research question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    research_question: String,
    pub status: RunStatus,
    pub stage_records: StageLog,
    pub claims: ClaimMap,
    #[serde(default)]
    pub search_plan: Option<SearchPlan>,
    /// Gaps that concern the whole question rather than one claim.
    #[serde(default)]
    pub run_gaps: Vec<Gap>,
    /// Counter-evidence no claim could be matched to.
    #[serde(default)]
    pub unattached_counter_evidence: Vec<Citation>,
    #[serde(default)]
    pub synthesis_notes: SynthesisNotes,
    #[serde(default)]
    pub red_team_findings: Vec<RedTeamFinding>,
    #[serde(default)]
    pub red_team_queries: Vec<String>,
    #[serde(default)]
    final_report: Option<String>,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(research_question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            research_question: research_question.into(),
            status: RunStatus::Running,
            stage_records: StageLog::new(),
            claims: ClaimMap::new(),
            search_plan: None,
            run_gaps: Vec::new(),
            unattached_counter_evidence: Vec::new(),
            synthesis_notes: SynthesisNotes::default(),
            red_team_findings: Vec::new(),
            red_team_queries: Vec::new(),
            final_report: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn research_question(&self) -> &str {
        &self.research_question
    }

    /// Append a stage record; rejected unless it is the next stage in order.
    pub fn append_record(&mut self, record: StageRecord) -> Result<(), PipelineError> {
        self.stage_records.append(record)?;
        self.touch();
        Ok(())
    }

    pub fn next_stage(&self) -> Option<Stage> {
        self.stage_records.expected_next()
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.stage_records.total_usage()
    }

    pub fn total_cost(&self) -> CostEstimate {
        self.stage_records.total_cost()
    }

    pub fn final_report(&self) -> Option<&str> {
        self.final_report.as_deref()
    }

    pub fn is_finalized(&self) -> bool {
        self.final_report.is_some()
    }

    /// Store the rendered report. A run's report can be set only once.
    pub fn set_final_report(&mut self, report: String) -> Result<(), PipelineError> {
        if self.final_report.is_some() {
            return Err(PipelineError::AlreadyFinalized { run_id: self.id });
        }
        self.final_report = Some(report);
        self.touch();
        Ok(())
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.touch();
    }

    pub fn mark_failed(&mut self, stage: Option<Stage>, cause: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.failure = Some(RunFailure {
            stage,
            cause: cause.into(),
        });
        self.touch();
    }

    pub fn mark_cancelled(&mut self, stage: Option<Stage>) {
        self.status = RunStatus::Cancelled;
        self.failure = Some(RunFailure {
            stage,
            cause: "cancelled".to_string(),
        });
        self.touch();
    }

    /// The abort report for a failed run.
    pub fn aborted(&self, failed_stage: Option<Stage>, cause: impl Into<String>) -> AbortedRun {
        AbortedRun {
            run_id: self.id,
            failed_stage,
            research_question: self.research_question.clone(),
            captured_records: self.stage_records.records().to_vec(),
            cause: cause.into(),
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            question: self.research_question.clone(),
            status: self.status,
            stages_completed: self.stage_records.len(),
            claims: self.claims.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Summary of a run for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub question: String,
    pub status: RunStatus,
    pub stages_completed: usize,
    pub claims: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Runs persisted as `<data_dir>/runs/<id>.json`.
#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("runs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, run: &PipelineRun) -> Result<PathBuf, LibrarianError> {
        let path = self.path_for(&run.id);
        atomic_write_json(&path, run)?;
        Ok(path)
    }

    pub fn load(&self, id: &Uuid) -> Result<Option<PipelineRun>, LibrarianError> {
        Ok(load_json(&self.path_for(id))?)
    }

    /// All readable runs, most recently updated first.
    pub fn list(&self) -> Result<Vec<RunSummary>, LibrarianError> {
        let mut summaries = Vec::new();
        for path in json_files(&self.dir)? {
            match load_json::<PipelineRun>(&path) {
                Ok(Some(run)) => summaries.push(run.summary()),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run file"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
