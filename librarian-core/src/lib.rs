//! # Librarian Core
//!
//! Core library for Librarian, a multi-stage literature review and evidence
//! validation pipeline. Provides the LLM gateway and providers, academic
//! search adapters, the staged pipeline with evidence aggregation, confidence
//! scoring, red-team validation and report synthesis, plus configuration,
//! persistence and error types.

pub mod config;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod pipeline;
pub mod providers;
pub mod retry;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{LibrarianConfig, LlmConfig, PipelineConfig, RetryConfig, SearchConfig, load_config};
pub use error::{
    AbortedRun, ConfigError, LibrarianError, LlmError, PipelineError, Result, SearchError,
    VerificationIssue,
};
pub use gateway::{GatewayResponse, LlmGateway, LlmProvider, MockLlmProvider};
pub use pipeline::{
    Claim, ClaimMap, ConfidenceBand, PipelineEngine, PipelineRun, ReportSynthesizer, RunStatus,
    RunStore, Stage, StageRecord,
};
pub use providers::create_provider;
pub use search::{
    MockSearchProvider, RawCitationRecord, SearchFilters, SearchProvider, SearchQuery,
    create_search_provider,
};
pub use types::{CompletionRequest, CompletionResponse, CostEstimate, Message, Role, TokenUsage};
