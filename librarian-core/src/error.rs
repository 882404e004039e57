//! Error types for the Librarian core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM gateway, the search adapter, configuration, and the
//! pipeline state machine. Evidence-quality problems found by the red team
//! are modelled separately as [`VerificationIssue`]: they are recorded and
//! rendered, never propagated as failures.

use crate::pipeline::stage::{Stage, StageRecord};
use std::path::PathBuf;

/// Top-level error type for the Librarian core library.
#[derive(Debug, thiserror::Error)]
pub enum LibrarianError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the LLM gateway (the `ProviderError` family).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Model output was not valid for stage '{stage}': {message}")]
    MalformedOutput { stage: String, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Failures of the search provider adapter.
///
/// An empty result set is not an error; adapters return `Ok(vec![])`.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search quota exhausted for {provider}, retry after {retry_after_secs}s")]
    QuotaExhausted {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("Search request failed: {message}")]
    Request { message: String },

    /// The provider answered with a non-success HTTP status.
    #[error("Search provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Search timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Search provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the pipeline state machine.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage '{got}' cannot follow {}", describe_expected(.expected))]
    StageOutOfOrder { expected: Option<Stage>, got: Stage },

    #[error("Claims cannot be scored before '{missing}' has completed")]
    ScoringPrecondition { missing: Stage },

    #[error("{0}")]
    Aborted(Box<AbortedRun>),

    /// `stage` is `None` when red-team validation was running.
    #[error("Pipeline run was cancelled during {}", describe_step(.stage))]
    Cancelled { stage: Option<Stage> },

    #[error("Run {run_id} is already finalized; start a new run to correct it")]
    AlreadyFinalized { run_id: uuid::Uuid },
}

fn describe_expected(expected: &Option<Stage>) -> String {
    match expected {
        Some(stage) => format!("expected stage '{stage}'"),
        None => "a completed run".to_string(),
    }
}

fn describe_step(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => format!("stage '{stage}'"),
        None => "red-team validation".to_string(),
    }
}

/// Diagnostic snapshot of a run that exhausted its retry budget.
///
/// Carries everything needed for manual resumption: the failed stage, the
/// research question, and every stage record captured before the failure.
#[derive(Debug, Clone)]
pub struct AbortedRun {
    pub run_id: uuid::Uuid,
    /// `None` when the red-team pass failed after all six stages.
    pub failed_stage: Option<Stage>,
    pub research_question: String,
    pub captured_records: Vec<StageRecord>,
    pub cause: String,
}

impl std::fmt::Display for AbortedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Run {} aborted during {} for question \"{}\" ({} stage record(s) captured): {}",
            self.run_id,
            describe_step(&self.failed_stage),
            self.research_question,
            self.captured_records.len(),
            self.cause
        )
    }
}

/// Content-level discrepancies found by the red team.
///
/// These never abort a run. They downgrade the owning claim and surface as
/// visible notes in the final report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationIssue {
    #[error("{field} mismatch for \"{citation}\": recorded {recorded}, source reports {observed}")]
    VerificationMismatch {
        citation: String,
        field: String,
        recorded: String,
        observed: String,
    },

    #[error("Citation not locatable in any searched index: \"{citation}\"")]
    CitationNotLocatable { citation: String },
}

/// A type alias for results using the top-level `LibrarianError`.
pub type Result<T> = std::result::Result<T, LibrarianError>;

impl LlmError {
    /// Whether this failure is transient and the same prompt should be retried.
    ///
    /// Malformed model output is retried because the stage contract requires
    /// a well-formed response; authentication failures are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Timeout { .. }
                | LlmError::Connection { .. }
                | LlmError::ResponseParse { .. }
                | LlmError::MalformedOutput { .. }
                | LlmError::ApiRequest { .. }
        )
    }
}

impl SearchError {
    /// Whether this failure is transient and the query should be retried.
    ///
    /// Client errors (4xx other than 429) are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::ResponseParse { .. } => false,
            SearchError::Status { status, .. } => *status == 429 || !(400..500).contains(status),
            _ => true,
        }
    }
}
