//! LLM Gateway: a stateless request/response wrapper around any provider.
//!
//! The [`LlmProvider`] trait abstracts over concrete backends; the
//! [`LlmGateway`] turns a prompt (plus optional system instruction) into a
//! provider request and returns the raw text with token usage and cost.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, CostEstimate, Message, TokenUsage};

/// Trait for LLM providers, supporting single-shot text completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the context window size for this provider/model.
    fn context_window(&self) -> usize;

    /// Return the cost per token (input, output) in USD.
    fn cost_per_token(&self) -> (f64, f64);

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// What the gateway hands back for one prompt.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub raw_text: String,
    pub token_usage: TokenUsage,
    pub cost_estimate: CostEstimate,
    /// The model that actually answered, as reported by the provider.
    pub model: String,
}

/// Stateless wrapper that sends prompts to a provider.
///
/// Holds no per-run state so one gateway can be shared by concurrent runs.
#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The provider's default model identifier.
    pub fn default_model(&self) -> &str {
        self.provider.model_name()
    }

    /// Send one prompt and return the raw model text with usage and cost.
    pub async fn complete(
        &self,
        prompt: &str,
        model: &str,
        system_instruction: Option<&str>,
        json_mode: bool,
    ) -> Result<GatewayResponse, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_instruction
            && !system.is_empty()
        {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        debug!(
            model,
            prompt_chars = prompt.len(),
            json_mode,
            "Sending completion request"
        );

        let request = CompletionRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: Some(model.to_string()),
            json_mode,
        };

        let response = self.provider.complete(request).await?;
        let cost_estimate = self.cost_of(&response.usage);

        debug!(
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            cost = format!("${:.4}", cost_estimate.total()),
            "Completion received"
        );

        Ok(GatewayResponse {
            raw_text: response.message.content,
            token_usage: response.usage,
            cost_estimate,
            model: response.model,
        })
    }

    fn cost_of(&self, usage: &TokenUsage) -> CostEstimate {
        let (input_rate, output_rate) = self.provider.cost_per_token();
        CostEstimate {
            input_cost: usage.prompt_tokens as f64 * input_rate,
            output_cost: usage.completion_tokens as f64 * output_rate,
        }
    }
}

/// A mock LLM provider for testing.
///
/// Replays queued responses (or errors) in order and records every request.
pub struct MockLlmProvider {
    model: String,
    context_window: usize,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            context_window: 128_000,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that answers each call with the next text, in order.
    pub fn with_responses<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for text in texts {
            provider.queue_response(Self::text_response(text.as_ref()));
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        lock(&self.responses).push_back(Ok(response));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Number of queued responses not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(MockLlmProvider::text_response("{}")))
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn cost_per_token(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A provider that fails every call with the same kind of error.
pub struct FailingLlmProvider {
    make_error: fn() -> LlmError,
    calls: AtomicU32,
}

impl FailingLlmProvider {
    pub fn new(make_error: fn() -> LlmError) -> Self {
        Self {
            make_error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for FailingLlmProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }

    fn context_window(&self) -> usize {
        128_000
    }

    fn cost_per_token(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn model_name(&self) -> &str {
        "failing-model"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
