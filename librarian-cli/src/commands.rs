//! CLI subcommand handlers.

use anyhow::{Context as _, anyhow, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use librarian_core::config::{load_config, load_config_file};
use librarian_core::pipeline::PipelineObserver;
use librarian_core::{
    LibrarianConfig, LlmGateway, PipelineEngine, PipelineError, PipelineRun, RunStore, Stage,
    StageRecord, create_provider, create_search_provider,
};

use crate::{Commands, ConfigAction, RunsAction};

/// Global options shared by every subcommand.
pub struct Context {
    pub workspace: PathBuf,
    pub config_path: Option<PathBuf>,
    pub quiet: bool,
}

impl Context {
    fn load_config(&self) -> anyhow::Result<LibrarianConfig> {
        match &self.config_path {
            Some(path) => load_config_file(path).map_err(|e| anyhow!("Configuration error: {e}")),
            None => load_config(Some(&self.workspace), None)
                .map_err(|e| anyhow!("Configuration error: {e}")),
        }
    }

    fn run_store(&self) -> anyhow::Result<RunStore> {
        let config = self.load_config()?;
        Ok(RunStore::new(&config.pipeline.resolved_data_dir()))
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            question,
            model,
            output,
        } => handle_run(&question, model, output.as_deref(), ctx).await,
        Commands::Config { action } => handle_config(action, ctx),
        Commands::Runs { action } => handle_runs(action, ctx),
    }
}

/// Prints stage progress to stderr.
struct ProgressObserver {
    quiet: bool,
}

impl PipelineObserver for ProgressObserver {
    fn on_stage_start(&self, _run_id: Uuid, stage: Stage) {
        if !self.quiet {
            eprintln!("[{}/6] {}...", stage.ordinal(), stage.title());
        }
    }

    fn on_stage_complete(&self, _run_id: Uuid, record: &StageRecord, claims: usize) {
        if !self.quiet {
            eprintln!(
                "      done: {} tokens, {} search quer{}, {claims} claim(s) tracked",
                record.token_usage.total(),
                record.search_queries.len(),
                if record.search_queries.len() == 1 { "y" } else { "ies" },
            );
        }
    }

    fn on_red_team_complete(&self, _run_id: Uuid, findings: usize) {
        if !self.quiet {
            eprintln!("Red-team validation: {findings} finding(s)");
        }
    }
}

async fn handle_run(
    question: &str,
    model: Option<String>,
    output: Option<&Path>,
    ctx: &Context,
) -> anyhow::Result<()> {
    let mut config = ctx.load_config()?;
    if let Some(model) = model {
        config.llm.model = model;
    }
    for warning in config.validate() {
        warn!("{warning}");
    }

    let provider = create_provider(&config.llm)?;
    let search = create_search_provider(&config.search)?;
    let gateway = LlmGateway::new(provider)
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens);
    let store = RunStore::new(&config.pipeline.resolved_data_dir());
    let engine = PipelineEngine::new(gateway, search, &config)
        .with_store(store.clone())
        .with_observer(Arc::new(ProgressObserver { quiet: ctx.quiet }));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling run...");
            signal_token.cancel();
        }
    });

    let mut run = PipelineRun::new(question);
    let result = engine.drive(&mut run, &cancel).await;
    let saved = store.path_for(&run.id);

    match result {
        Ok(()) => {
            let report = run.final_report().unwrap_or_default();
            match output {
                Some(path) => {
                    std::fs::write(path, report)
                        .with_context(|| format!("Failed to write report to {}", path.display()))?;
                    eprintln!("Report written to {}", path.display());
                }
                None => println!("{report}"),
            }
            if !ctx.quiet {
                let cost = run.total_cost();
                eprintln!(
                    "Run {} completed: {} claim(s), {} tokens, ${:.4}. Saved to {}",
                    run.id,
                    run.claims.len(),
                    run.total_usage().total(),
                    cost.total(),
                    saved.display()
                );
            }
            Ok(())
        }
        Err(PipelineError::Cancelled { .. }) => {
            eprintln!(
                "Run {} cancelled after {} stage(s). Saved to {}",
                run.id,
                run.stage_records.len(),
                saved.display()
            );
            Ok(())
        }
        Err(e) => Err(anyhow!(e).context(format!(
            "Run {} failed; captured records saved to {}",
            run.id,
            saved.display()
        ))),
    }
}

fn handle_config(action: ConfigAction, ctx: &Context) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = ctx.workspace.join(".librarian");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&LibrarianConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = ctx.load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
            for warning in config.validate() {
                eprintln!("warning: {warning}");
            }
            Ok(())
        }
    }
}

fn handle_runs(action: RunsAction, ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.run_store()?;
    match action {
        RunsAction::List => {
            let runs = store.list()?;
            if runs.is_empty() {
                println!("No saved runs in {}", store.dir().display());
                return Ok(());
            }
            println!("Saved runs ({}):", runs.len());
            for run in runs {
                println!(
                    "  {}  {:<9}  {}/6 stages  {:>2} claim(s)  {}  {}",
                    run.id,
                    run.status.to_string(),
                    run.stages_completed,
                    run.claims,
                    run.updated_at.format("%Y-%m-%d %H:%M"),
                    run.question
                );
            }
            Ok(())
        }
        RunsAction::Show { id, records } => {
            let id = Uuid::parse_str(&id).map_err(|e| anyhow!("Invalid run id '{id}': {e}"))?;
            let Some(run) = store.load(&id)? else {
                bail!("No saved run with id {id} in {}", store.dir().display());
            };
            print_run(&run);
            if records {
                println!("{}", serde_json::to_string_pretty(&run.stage_records)?);
            }
            Ok(())
        }
    }
}

fn print_run(run: &PipelineRun) {
    println!("Run:       {}", run.id);
    println!("Question:  {}", run.research_question());
    println!("Status:    {}", run.status);
    println!("Stages:    {}/6", run.stage_records.len());
    println!("Claims:    {}", run.claims.len());
    println!(
        "Usage:     {} tokens, ${:.4}",
        run.total_usage().total(),
        run.total_cost().total()
    );
    if let Some(failure) = &run.failure {
        let step = failure
            .stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "red-team validation".to_string());
        println!("Stopped:   during {step}: {}", failure.cause);
    }
    match run.final_report() {
        Some(report) => println!("\n{report}"),
        None => println!("\n(no final report)"),
    }
}
