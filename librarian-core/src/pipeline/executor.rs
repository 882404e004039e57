//! Stage Executor: runs exactly one stage against the LLM gateway.
//!
//! Evidence stages first fold search results into the prompt. The model call
//! is retried with the same prompt on transient failures and on output that
//! breaks the stage's contract. A cancellation token is raced against the
//! whole stage; a cancelled stage produces no record.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::claim::ClaimMap;
use super::outputs::validate_output;
use super::prompts::{PromptInputs, build_prompt, system_instruction};
use super::similarity::{normalize_doi, title_similarity};
use super::stage::{Stage, StageLog, StageRecord};
use crate::config::{PipelineConfig, RetryConfig};
use crate::error::{LlmError, PipelineError, SearchError};
use crate::gateway::{GatewayResponse, LlmGateway};
use crate::retry::with_retry;
use crate::search::{RawCitationRecord, SearchFilters, SearchProvider, SearchQuery};

/// Why a stage produced no record.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("stage cancelled")]
    Cancelled,
}

/// Everything one stage needs besides the shared collaborators.
#[derive(Debug, Clone)]
pub struct StageRequest<'a> {
    pub stage: Stage,
    pub research_question: &'a str,
    pub log: &'a StageLog,
    /// Search queries to run before prompting (evidence stages only).
    pub queries: Vec<String>,
    pub claims: Option<&'a ClaimMap>,
    pub rubric: Option<&'a str>,
}

impl<'a> StageRequest<'a> {
    pub fn new(stage: Stage, research_question: &'a str, log: &'a StageLog) -> Self {
        Self {
            stage,
            research_question,
            log,
            queries: Vec::new(),
            claims: None,
            rubric: None,
        }
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = queries;
        self
    }

    pub fn with_claims(mut self, claims: &'a ClaimMap) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn with_rubric(mut self, rubric: &'a str) -> Self {
        self.rubric = Some(rubric);
        self
    }
}

/// Executes single stages. Shared, immutable collaborators only.
#[derive(Clone)]
pub struct StageExecutor {
    gateway: LlmGateway,
    search: Arc<dyn SearchProvider>,
    retry: RetryConfig,
    model: String,
    filters: SearchFilters,
    max_queries: usize,
    max_context_chars: usize,
}

impl StageExecutor {
    pub fn new(
        gateway: LlmGateway,
        search: Arc<dyn SearchProvider>,
        retry: RetryConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        let model = gateway.default_model().to_string();
        Self {
            gateway,
            search,
            retry,
            model,
            filters: SearchFilters::default(),
            max_queries: pipeline.max_queries_per_stage.max(1),
            max_context_chars: pipeline.max_context_chars_per_stage,
        }
    }

    /// Override the model identifier sent with every request.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one stage and return its record. The caller appends it.
    pub async fn execute(
        &self,
        request: StageRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<StageRecord, StageError> {
        let stage = request.stage;
        let expected = request.log.expected_next();
        if expected != Some(stage) {
            return Err(PipelineError::StageOutOfOrder {
                expected,
                got: stage,
            }
            .into());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(stage = %stage, "Stage cancelled");
                Err(StageError::Cancelled)
            }
            result = self.run_stage(request) => result,
        }
    }

    async fn run_stage(&self, request: StageRequest<'_>) -> Result<StageRecord, StageError> {
        let stage = request.stage;
        info!(stage = %stage, ordinal = stage.ordinal(), "Stage started");

        let (records, search_queries) = if stage.is_evidence_stage() {
            self.gather(&request.queries).await?
        } else {
            (Vec::new(), Vec::new())
        };

        let prompt = build_prompt(
            stage,
            request.research_question,
            request.log,
            &PromptInputs {
                search_results: &records,
                claims: request.claims,
                rubric: request.rubric,
                max_context_chars: self.max_context_chars,
            },
        );
        let system = system_instruction(stage);

        let outcome = with_retry(&self.retry, |attempt| {
            self.attempt(stage, &prompt, &system, attempt)
        })
        .await?;
        let response = outcome.value;

        info!(
            stage = %stage,
            attempts = outcome.attempts,
            prompt_tokens = response.token_usage.prompt_tokens,
            completion_tokens = response.token_usage.completion_tokens,
            search_records = records.len(),
            "Stage completed"
        );

        Ok(StageRecord {
            stage_name: stage,
            prompt_sent: prompt,
            system_instruction: Some(system),
            raw_response: response.raw_text,
            timestamp: Utc::now(),
            model_identifier: response.model,
            token_usage: response.token_usage,
            cost_estimate: response.cost_estimate,
            attempts: outcome.attempts,
            search_queries,
        })
    }

    /// One model call whose output must satisfy the stage contract.
    async fn attempt(
        &self,
        stage: Stage,
        prompt: &str,
        system: &str,
        attempt: u32,
    ) -> Result<GatewayResponse, LlmError> {
        debug!(stage = %stage, attempt, "Calling model");
        let response = self
            .gateway
            .complete(prompt, &self.model, Some(system), stage.expects_json())
            .await?;
        validate_output(stage, &response.raw_text)?;
        Ok(response)
    }

    /// Run the stage's search queries and merge the results without duplicates.
    async fn gather(
        &self,
        queries: &[String],
    ) -> Result<(Vec<RawCitationRecord>, Vec<String>), SearchError> {
        let mut records: Vec<RawCitationRecord> = Vec::new();
        let mut issued = Vec::new();
        for text in queries.iter().take(self.max_queries) {
            let query = SearchQuery::new(text.clone()).with_filters(self.filters.clone());
            let hits = with_retry(&self.retry, |_| self.search.search(&query))
                .await?
                .value;
            debug!(query = %text, hits = hits.len(), "Search query completed");
            issued.push(text.clone());
            for hit in hits {
                if !records.iter().any(|r| same_record(r, &hit)) {
                    records.push(hit);
                }
            }
        }
        Ok((records, issued))
    }
}

fn same_record(a: &RawCitationRecord, b: &RawCitationRecord) -> bool {
    match (&a.doi, &b.doi) {
        (Some(x), Some(y)) => normalize_doi(x) == normalize_doi(y),
        _ => title_similarity(&a.title, &b.title) >= 0.95,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FailingLlmProvider, MockLlmProvider};
    use crate::search::MockSearchProvider;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            backoff_multiplier: 1.0,
            max_backoff_ms: 1,
            jitter: false,
        }
    }

    fn executor(
        llm: Arc<dyn crate::gateway::LlmProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> StageExecutor {
        StageExecutor::new(
            LlmGateway::new(llm),
            search,
            fast_retry(3),
            &PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_execute_first_stage() {
        let llm = Arc::new(MockLlmProvider::with_responses(["Look at social psychology."]));
        let exec = executor(llm.clone(), Arc::new(MockSearchProvider::empty()));
        let log = StageLog::new();

        let record = exec
            .execute(
                StageRequest::new(Stage::StrategicIntelligence, "Q?", &log),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(record.stage_name, Stage::StrategicIntelligence);
        assert_eq!(record.raw_response, "Look at social psychology.");
        assert_eq!(record.model_identifier, "mock-model");
        assert_eq!(record.attempts, 1);
        assert!(record.prompt_sent.contains("RESEARCH QUESTION: Q?"));

        let sent = llm.requests();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].json_mode);
    }

    #[tokio::test]
    async fn test_out_of_order_rejected_without_calling_model() {
        let llm = Arc::new(MockLlmProvider::new());
        let exec = executor(llm.clone(), Arc::new(MockSearchProvider::empty()));
        let log = StageLog::new();
        let err = exec
            .execute(
                StageRequest::new(Stage::SearchPlan, "Q?", &log),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Pipeline(PipelineError::StageOutOfOrder { .. })
        ));
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_retried_with_same_prompt() {
        let llm = Arc::new(MockLlmProvider::with_responses([
            "guidance",
            "Sorry, here is prose instead of JSON.",
            r#"{"keywords": ["anger"]}"#,
        ]));
        let exec = executor(llm.clone(), Arc::new(MockSearchProvider::empty()));
        let mut log = StageLog::new();
        let cancel = CancellationToken::new();
        let first = exec
            .execute(StageRequest::new(Stage::StrategicIntelligence, "Q?", &log), &cancel)
            .await
            .unwrap();
        log.append(first).unwrap();

        let record = exec
            .execute(StageRequest::new(Stage::SearchPlan, "Q?", &log), &cancel)
            .await
            .unwrap();
        assert_eq!(record.attempts, 2);
        let sent = llm.requests();
        let contents = |i: usize| -> Vec<String> {
            sent[i].messages.iter().map(|m| m.content.clone()).collect()
        };
        assert_eq!(contents(1), contents(2));
        assert!(sent[2].json_mode);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_provider_error() {
        let llm = Arc::new(FailingLlmProvider::new(|| LlmError::Timeout { timeout_secs: 1 }));
        let exec = executor(llm.clone(), Arc::new(MockSearchProvider::empty()));
        let log = StageLog::new();
        let err = exec
            .execute(
                StageRequest::new(Stage::StrategicIntelligence, "Q?", &log),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Llm(LlmError::Timeout { .. })));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let llm = Arc::new(FailingLlmProvider::new(|| LlmError::AuthFailed {
            provider: "openai".into(),
        }));
        let exec = executor(llm.clone(), Arc::new(MockSearchProvider::empty()));
        let log = StageLog::new();
        let result = exec
            .execute(
                StageRequest::new(Stage::StrategicIntelligence, "Q?", &log),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_evidence_stage_folds_search_results() {
        let corpus = vec![RawCitationRecord {
            source: "mock".into(),
            title: "Anger and protest turnout".into(),
            doi: Some("10.1/a".into()),
            year: Some(2019),
            ..Default::default()
        }];
        let search = Arc::new(MockSearchProvider::new(corpus));
        let llm = Arc::new(MockLlmProvider::with_responses(["g", "{}", r#"{"claims": []}"#]));
        let exec = executor(llm, search.clone());
        let cancel = CancellationToken::new();
        let mut log = StageLog::new();
        for stage in [Stage::StrategicIntelligence, Stage::SearchPlan] {
            let r = exec
                .execute(StageRequest::new(stage, "Q?", &log), &cancel)
                .await
                .unwrap();
            log.append(r).unwrap();
        }
        let record = exec
            .execute(
                StageRequest::new(Stage::InitialDiscovery, "Q?", &log).with_queries(vec![
                    "protest turnout".into(),
                    "anger protest".into(),
                ]),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(record.search_queries, vec!["protest turnout", "anger protest"]);
        assert!(record.prompt_sent.contains("SEARCH RESULTS (1 records)"));
        assert_eq!(search.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_retried_then_succeeds() {
        let search = Arc::new(MockSearchProvider::empty());
        search.queue_failure(SearchError::Timeout { timeout_secs: 1 });
        let llm = Arc::new(MockLlmProvider::with_responses(["g", "{}", "{}"]));
        let exec = executor(llm, search.clone());
        let cancel = CancellationToken::new();
        let mut log = StageLog::new();
        for stage in [Stage::StrategicIntelligence, Stage::SearchPlan] {
            let r = exec
                .execute(StageRequest::new(stage, "Q?", &log), &cancel)
                .await
                .unwrap();
            log.append(r).unwrap();
        }
        let record = exec
            .execute(
                StageRequest::new(Stage::InitialDiscovery, "Q?", &log)
                    .with_queries(vec!["anger".into()]),
                &cancel,
            )
            .await
            .unwrap();
        assert!(record.prompt_sent.contains("(no records returned)"));
        assert_eq!(search.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_stage_produces_no_record() {
        let llm = Arc::new(MockLlmProvider::with_responses(["guidance"]));
        let exec = executor(llm.clone(), Arc::new(MockSearchProvider::empty()));
        let log = StageLog::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec
            .execute(StageRequest::new(Stage::StrategicIntelligence, "Q?", &log), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));
        assert_eq!(llm.remaining(), 1);
    }
}
