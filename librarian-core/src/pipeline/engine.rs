//! Pipeline engine: drives one run through the six stages, scoring,
//! red-team validation and report synthesis.
//!
//! The engine holds only shared, immutable collaborators. Each run owns its
//! claims and stage records, so any number of runs may execute concurrently
//! on one engine.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::aggregator::EvidenceAggregator;
use super::executor::{StageError, StageExecutor, StageRequest};
use super::outputs::{
    CompletenessOutput, CounterEvidenceOutput, DiscoveryOutput, SearchPlan, SynthesisOutput,
    parse_output,
};
use super::red_team::RedTeamValidator;
use super::report::ReportSynthesizer;
use super::run::{PipelineRun, RunStatus, RunStore, SynthesisNotes};
use super::scoring::ConfidenceScorer;
use super::stage::{Stage, StageRecord};
use crate::config::LibrarianConfig;
use crate::error::PipelineError;
use crate::gateway::LlmGateway;
use crate::search::SearchProvider;

/// Receives progress events from a running pipeline.
pub trait PipelineObserver: Send + Sync {
    fn on_stage_start(&self, _run_id: Uuid, _stage: Stage) {}
    fn on_stage_complete(&self, _run_id: Uuid, _record: &StageRecord, _claims: usize) {}
    fn on_red_team_complete(&self, _run_id: Uuid, _findings: usize) {}
    fn on_run_finished(&self, _run: &PipelineRun) {}
}

/// Observer that ignores every event.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {}

const COUNTER_SUFFIXES: [&str; 2] = ["null result", "failed replication"];
const GAP_SUFFIXES: [&str; 4] = ["cross-cultural", "longitudinal", "field study", "diverse sample"];

/// Runs research questions through the full pipeline.
pub struct PipelineEngine {
    executor: StageExecutor,
    aggregator: EvidenceAggregator,
    scorer: ConfidenceScorer,
    red_team: RedTeamValidator,
    reporter: ReportSynthesizer,
    rubric_text: String,
    store: Option<RunStore>,
    observer: Arc<dyn PipelineObserver>,
}

impl PipelineEngine {
    pub fn new(gateway: LlmGateway, search: Arc<dyn SearchProvider>, config: &LibrarianConfig) -> Self {
        let pipeline = &config.pipeline;
        let filters = config.search.default_filters.clone();
        let scorer = ConfidenceScorer::new(config.rubric.clone(), pipeline.scoring_mode);
        Self {
            executor: StageExecutor::new(gateway, search.clone(), config.retry.clone(), pipeline)
                .with_filters(filters.clone()),
            aggregator: EvidenceAggregator::from_config(pipeline),
            red_team: RedTeamValidator::new(search, scorer.clone(), config.retry.clone(), pipeline)
                .with_filters(filters),
            reporter: ReportSynthesizer::new(&config.rubric, pipeline.scoring_mode),
            rubric_text: config.rubric.render(),
            scorer,
            store: None,
            observer: Arc::new(NoOpObserver),
        }
    }

    /// Persist every run (including failed and cancelled ones) to `store`.
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Override the model identifier sent with every stage.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.executor = self.executor.with_model(model);
        self
    }

    /// Run a new research question to completion.
    pub async fn run(
        &self,
        research_question: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::new(research_question);
        self.drive(&mut run, cancel).await?;
        Ok(run)
    }

    /// Drive `run` to completion. On error the run is left failed or cancelled
    /// with every record captured so far.
    ///
    /// Only running, unfinalized runs are accepted; any other run is returned
    /// untouched with `AlreadyFinalized`.
    pub async fn drive(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if run.is_finalized() || run.status != RunStatus::Running {
            warn!(run_id = %run.id, status = %run.status, "Refusing to drive a finished run");
            return Err(PipelineError::AlreadyFinalized { run_id: run.id });
        }
        info!(run_id = %run.id, question = %run.research_question(), "Pipeline run started");
        let result = self.drive_inner(run, cancel).await;
        if let Err(e) = &result {
            error!(run_id = %run.id, status = %run.status, error = %e, "Pipeline run stopped");
        }
        self.persist(run);
        self.observer.on_run_finished(run);
        result
    }

    async fn drive_inner(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        while let Some(stage) = run.next_stage() {
            self.observer.on_stage_start(run.id, stage);
            let record = match self.execute(run, stage, cancel).await {
                Ok(record) => record,
                Err(StageError::Cancelled) => {
                    run.mark_cancelled(Some(stage));
                    return Err(PipelineError::Cancelled { stage: Some(stage) });
                }
                Err(StageError::Pipeline(e)) => {
                    run.mark_failed(Some(stage), e.to_string());
                    return Err(e);
                }
                Err(e) => return Err(self.abort(run, Some(stage), e.to_string())),
            };
            if let Err(e) = self.apply(run, record) {
                return Err(match e {
                    StageError::Pipeline(e) => {
                        run.mark_failed(Some(stage), e.to_string());
                        e
                    }
                    other => self.abort(run, Some(stage), other.to_string()),
                });
            }
            if let Some(last) = run.stage_records.records().last() {
                self.observer
                    .on_stage_complete(run.id, last, run.claims.len());
            }
            self.persist(run);
        }

        let mut scored = run.claims.clone();
        if let Err(e) = self.scorer.score_all(&mut scored, &run.stage_records) {
            run.mark_failed(None, e.to_string());
            return Err(e);
        }
        run.claims = scored;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.red_team.validate(&run.claims) => Some(outcome),
        };
        let outcome = match outcome {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => return Err(self.abort(run, None, e.to_string())),
            None => {
                info!(run_id = %run.id, "Red-team validation cancelled");
                run.mark_cancelled(None);
                return Err(PipelineError::Cancelled { stage: None });
            }
        };
        run.claims = outcome.claims;
        run.red_team_queries = outcome.queries;
        run.red_team_findings = outcome.findings;
        self.observer
            .on_red_team_complete(run.id, run.red_team_findings.len());

        if let Err(e) = self.reporter.finalize(run) {
            run.mark_failed(None, e.to_string());
            return Err(e);
        }
        run.mark_completed();
        let usage = run.total_usage();
        info!(
            run_id = %run.id,
            claims = run.claims.len(),
            findings = run.red_team_findings.len(),
            total_tokens = usage.total(),
            cost = format!("${:.4}", run.total_cost().total()),
            "Pipeline run completed"
        );
        Ok(())
    }

    async fn execute(
        &self,
        run: &PipelineRun,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<StageRecord, StageError> {
        let question = run.research_question();
        let request = StageRequest::new(stage, question, &run.stage_records);
        let base = run
            .search_plan
            .as_ref()
            .map(SearchPlan::base_queries)
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| vec![question.to_string()]);
        let request = match stage {
            Stage::StrategicIntelligence | Stage::SearchPlan => request,
            Stage::InitialDiscovery => request.with_queries(base),
            Stage::CounterEvidence => request
                .with_queries(variants(&base, &COUNTER_SUFFIXES))
                .with_claims(&run.claims),
            Stage::CompletenessCheck => request
                .with_queries(variants(&base, &GAP_SUFFIXES))
                .with_claims(&run.claims),
            Stage::Synthesis => request
                .with_claims(&run.claims)
                .with_rubric(&self.rubric_text),
        };
        self.executor.execute(request, cancel).await
    }

    /// Fold a stage's output into the run. The record and the claim updates
    /// land together or not at all.
    fn apply(&self, run: &mut PipelineRun, record: StageRecord) -> Result<(), StageError> {
        let stage = record.stage_name;
        let raw = record.raw_response.as_str();
        match stage {
            Stage::StrategicIntelligence => {
                run.append_record(record)?;
            }
            Stage::SearchPlan => {
                let plan: SearchPlan = parse_output(stage, raw)?;
                run.append_record(record)?;
                run.search_plan = Some(plan);
            }
            Stage::InitialDiscovery => {
                let output: DiscoveryOutput = parse_output(stage, raw)?;
                let claims = self.aggregator.apply_discovery(&run.claims, output);
                run.append_record(record)?;
                run.claims = claims;
            }
            Stage::CounterEvidence => {
                let output: CounterEvidenceOutput = parse_output(stage, raw)?;
                let result = self.aggregator.apply_counter_evidence(&run.claims, output);
                run.append_record(record)?;
                run.claims = result.claims;
                run.unattached_counter_evidence = result.unattached;
            }
            Stage::CompletenessCheck => {
                let output: CompletenessOutput = parse_output(stage, raw)?;
                let result = self.aggregator.apply_completeness(&run.claims, output);
                run.append_record(record)?;
                run.claims = result.claims;
                run.run_gaps = result.run_gaps;
            }
            Stage::Synthesis => {
                let output: SynthesisOutput = parse_output(stage, raw)?;
                let claims = self.aggregator.apply_synthesis(&run.claims, &output);
                run.append_record(record)?;
                run.claims = claims;
                run.synthesis_notes = SynthesisNotes {
                    methodological_strengths: output.methodological_strengths,
                    methodological_weaknesses: output.methodological_weaknesses,
                    future_research_priorities: output.future_research_priorities,
                };
            }
        }
        Ok(())
    }

    fn abort(&self, run: &mut PipelineRun, stage: Option<Stage>, cause: String) -> PipelineError {
        run.mark_failed(stage, cause.clone());
        PipelineError::Aborted(Box::new(run.aborted(stage, cause)))
    }

    fn persist(&self, run: &PipelineRun) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(run)
        {
            warn!(run_id = %run.id, error = %e, "Failed to persist run");
        }
    }
}

/// Each base query combined with each suffix, base-major.
fn variants(base: &[String], suffixes: &[&str]) -> Vec<String> {
    base.iter()
        .flat_map(|q| suffixes.iter().map(move |s| format!("{q} {s}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_are_base_major() {
        let base = vec!["anger turnout".to_string(), "fear voting".to_string()];
        assert_eq!(
            variants(&base, &COUNTER_SUFFIXES),
            vec![
                "anger turnout null result",
                "anger turnout failed replication",
                "fear voting null result",
                "fear voting failed replication",
            ]
        );
    }
}
