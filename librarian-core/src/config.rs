//! Configuration system for Librarian.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/librarian/config.toml` and/or
//! `.librarian/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::scoring::{ScoringMode, ScoringRubric};
use crate::search::SearchFilters;

/// Top-level configuration for a Librarian pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrarianConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub retry: RetryConfig,
    pub pipeline: PipelineConfig,
    /// Versioned scoring rubric, embedded verbatim in the synthesis prompt.
    pub rubric: ScoringRubric,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint ("ollama", "vllm", "local").
    pub provider: String,
    /// Model identifier recorded on every stage record.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key (takes precedence over `api_key_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature. Kept low so stage outputs are reproducible.
    pub temperature: f32,
    /// Cost per 1M input tokens (USD).
    pub input_cost_per_million: f64,
    /// Cost per 1M output tokens (USD).
    pub output_cost_per_million: f64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.2,
            input_cost_per_million: 2.50,
            output_cost_per_million: 10.00,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid. Warnings never abort loading.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0–2.0",
                self.temperature
            ));
        }
        if self.temperature > 0.7 {
            warnings.push(format!(
                "temperature ({}) is high; stage outputs will be hard to replicate",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; requests will fail immediately".to_string());
        }
        warnings
    }
}

/// Search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider name: "semantic_scholar".
    pub provider: String,
    /// Optional base URL override (useful for proxies and tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable name containing the optional API key.
    pub api_key_env: String,
    /// Maximum records requested per query.
    pub results_per_query: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Minimum spacing between requests, in milliseconds.
    pub min_interval_ms: u64,
    /// Response cache time-to-live, in seconds (0 disables caching).
    pub cache_ttl_secs: u64,
    /// Maximum cached responses.
    pub cache_max_entries: usize,
    /// Filters applied to every query unless a stage overrides them.
    #[serde(default)]
    pub default_filters: SearchFilters,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "semantic_scholar".to_string(),
            base_url: None,
            api_key_env: "SEMANTIC_SCHOLAR_API_KEY".to_string(),
            results_per_query: 10,
            timeout_secs: 30,
            min_interval_ms: 1000,
            cache_ttl_secs: 3600,
            cache_max_entries: 512,
            default_filters: SearchFilters::default(),
        }
    }
}

/// Retry policy for gateway and search calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on a single backoff, in milliseconds.
    pub max_backoff_ms: u64,
    /// Add up to 25% jitter to each backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 32_000,
            jitter: true,
        }
    }
}

/// Pipeline behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Keyword Jaccard similarity at or above which two claims are merged.
    pub dedup_threshold: f64,
    /// Minimum keyword overlap for attaching an untargeted counter-citation to a claim.
    pub contradiction_min_overlap: f64,
    /// Title similarity at or above which a search record is the same work as a citation.
    pub title_match_threshold: f64,
    /// Maximum search queries issued per evidence stage.
    pub max_queries_per_stage: usize,
    /// Search for unreported null results during red-teaming.
    pub omission_search: bool,
    /// Where the claim score comes from.
    pub scoring_mode: ScoringMode,
    /// Maximum characters of each prior stage response folded into a prompt (0 = unlimited).
    pub max_context_chars_per_stage: usize,
    /// Directory for persisted runs. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.6,
            contradiction_min_overlap: 0.3,
            title_match_threshold: 0.8,
            max_queries_per_stage: 4,
            omission_search: true,
            scoring_mode: ScoringMode::Rubric,
            max_context_chars_per_stage: 0,
            data_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Resolve the directory where runs are persisted.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("org", "discernus", "librarian")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".librarian"))
        })
    }
}

impl LibrarianConfig {
    /// Validate the whole configuration, returning human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; treated as a single attempt".to_string());
        }
        for (name, value) in [
            ("pipeline.dedup_threshold", self.pipeline.dedup_threshold),
            (
                "pipeline.contradiction_min_overlap",
                self.pipeline.contradiction_min_overlap,
            ),
            (
                "pipeline.title_match_threshold",
                self.pipeline.title_match_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                warnings.push(format!("{name} ({value}) must be within 0.0–1.0"));
            }
        }
        if self.search.results_per_query == 0 {
            warnings.push("search.results_per_query is 0; no evidence will be retrieved".into());
        }
        warnings.extend(self.rubric.validate());
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `LIBRARIAN_`)
/// 3. Workspace-local config (`.librarian/config.toml`)
/// 4. User config (`~/.config/librarian/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&LibrarianConfig>,
) -> Result<LibrarianConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(LibrarianConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("org", "discernus", "librarian") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".librarian").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // LIBRARIAN_LLM__MODEL, LIBRARIAN_RETRY__MAX_ATTEMPTS, etc.
    figment = figment.merge(Env::prefixed("LIBRARIAN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit TOML file layered over the defaults.
pub fn load_config_file(path: &Path) -> Result<LibrarianConfig, crate::error::ConfigError> {
    if !path.exists() {
        return Err(crate::error::ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Figment::from(Serialized::defaults(LibrarianConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LIBRARIAN_").split("__"))
        .extract()
        .map_err(|e| crate::error::ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Check whether any Librarian configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("org", "discernus", "librarian")
        && config_dir.config_dir().join("config.toml").exists()
    {
        return true;
    }

    if let Some(ws) = workspace
        && ws.join(".librarian").join("config.toml").exists()
    {
        return true;
    }

    false
}
