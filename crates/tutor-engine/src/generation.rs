//! Text-generation collaborator.
//!
//! Every utterance, critique, review narrative and overview is produced by a
//! [`TextGenerator`]. The engine never talks to one directly: it goes through
//! [`GenerationClient`], which bounds each call with a timeout and turns any
//! collaborator failure into `TutorError::GenerationFailed` with a generic
//! message. Collaborator error text is logged and never returned to callers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::error::{Result, TutorError};

// ============================================================================
// Request model
// ============================================================================

/// What a generation call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    /// The AI's first line of a session.
    OpeningLine,
    /// The AI's reply to a learner turn.
    Reply,
    /// Error critique of one learner message.
    ErrorAnalysis,
    /// End-of-session review narrative.
    Review,
    /// Overview of a source text.
    Overview,
}

impl GenerationTask {
    /// Returns the snake_case task name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpeningLine => "opening_line",
            Self::Reply => "reply",
            Self::ErrorAnalysis => "error_analysis",
            Self::Review => "review",
            Self::Overview => "overview",
        }
    }
}

impl std::fmt::Display for GenerationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The learner, or the engine's instructions.
    User,
    /// The AI.
    Assistant,
}

/// One message passed to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: ChatRole,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Purpose of the call.
    pub task: GenerationTask,
    /// Persona and output instructions.
    pub system: String,
    /// Conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Sampling seed, for calls that should repeat for the same inputs.
    pub seed: Option<u64>,
}

impl GenerationRequest {
    /// A request with a single user prompt.
    #[must_use]
    pub fn prompt(
        task: GenerationTask,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self::conversation(task, system, vec![ChatMessage::user(prompt)])
    }

    /// A request carrying a whole conversation.
    #[must_use]
    pub fn conversation(
        task: GenerationTask,
        system: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            task,
            system: system.into(),
            messages,
            seed: None,
        }
    }

    /// Sets the sampling seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Failure reported by a generator backend.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct GeneratorError(pub String);

impl From<reqwest::Error> for GeneratorError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

/// A backend that turns a request into text.
pub trait TextGenerator: Send + Sync {
    /// Generates text for the request.
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, std::result::Result<String, GeneratorError>>;

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Whether the backend has what it needs to serve calls.
    fn is_ready(&self) -> bool {
        true
    }
}

// ============================================================================
// GenerationClient
// ============================================================================

static CODE_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n?(.*?)\s*```\s*$").ok());

/// Removes a surrounding Markdown code fence, if any.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map_or_else(|| text.trim(), |m| m.as_str())
}

/// Deterministic seed derived from the inputs of an opening line (FNV-1a).
#[must_use]
pub fn seed_for(parts: &[&str]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    let mut hash = OFFSET;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hash ^= u64::from(b'/');
            hash = hash.wrapping_mul(PRIME);
        }
        for byte in part.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

/// Timeout-guarded access to a [`TextGenerator`].
#[derive(Clone)]
pub struct GenerationClient {
    inner: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("backend", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GenerationClient {
    /// Wraps a generator with a per-call timeout.
    #[must_use]
    pub fn new(inner: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Backend name.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.inner.name()
    }

    /// Whether the backend reports itself ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Generates text.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::GenerationFailed` if the backend fails, times out,
    /// or returns blank text.
    pub async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let task = request.task;

        let text = match tokio::time::timeout(self.timeout, self.inner.generate(request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(
                    task = %task,
                    backend = self.inner.name(),
                    error = %e,
                    "Generation failed"
                );
                return Err(TutorError::generation_failed(format!(
                    "the {task} generation call failed"
                )));
            }
            Err(_) => {
                tracing::warn!(
                    task = %task,
                    timeout_secs = self.timeout.as_secs(),
                    "Generation timed out"
                );
                return Err(TutorError::generation_failed(format!(
                    "the {task} generation call timed out"
                )));
            }
        };

        let text = text.trim();
        if text.is_empty() {
            tracing::warn!(task = %task, "Generation returned empty output");
            return Err(TutorError::generation_failed(format!(
                "the {task} generation call returned no text"
            )));
        }

        Ok(text.to_string())
    }

    /// Generates text and parses it as JSON.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::GenerationFailed` as for [`generate`](Self::generate),
    /// or `TutorError::Validation` if the output is not the expected JSON shape.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        request: GenerationRequest,
    ) -> Result<T> {
        let task = request.task;
        let text = self.generate(request).await?;

        serde_json::from_str(strip_code_fence(&text)).map_err(|e| {
            tracing::warn!(task = %task, error = %e, "Malformed generation output");
            TutorError::validation(format!("malformed {task} output from generator"))
        })
    }
}

// ============================================================================
// ChatCompletionsGenerator
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionContent,
}

#[derive(Debug, Deserialize)]
struct CompletionContent {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    /// Builds a generator from configuration, reading the API key from the
    /// environment variable the configuration names.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if the HTTP client cannot be built.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "No API key set for the text generator, requests will be unauthenticated"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                TutorError::config_validation(
                    format!("cannot build HTTP client: {e}"),
                    "Check the TLS setup of this host",
                )
            })?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    /// Full URL requests are sent to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn complete(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<String, GeneratorError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(CompletionMessage {
            role: "system",
            content: &request.system,
        });
        messages.extend(request.messages.iter().map(|m| CompletionMessage {
            role: match m.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: &m.content,
        }));

        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            seed: request.seed,
        };

        let mut http = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GeneratorError(format!("endpoint returned {status}: {detail}")));
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GeneratorError("response has no choices".to_string()))
    }
}

impl TextGenerator for ChatCompletionsGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, std::result::Result<String, GeneratorError>> {
        Box::pin(self.complete(request))
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }
}
