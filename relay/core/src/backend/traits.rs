//! Generation Backend Seam
//!
//! A run only needs an ordered feed of tokens for one query. Backends turn a
//! [`GenerationRequest`] into that feed and hide the provider's wire format.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// One step of a generation run, in emission order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    /// Next token of the answer
    Token(String),
    /// Generation finished
    Done {
        /// Answer as assembled by the backend
        answer: String,
    },
    /// Generation broke off
    Failed(String),
}

/// What to generate for one run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationRequest {
    /// User query
    pub query: String,
    /// Backend-specific model name
    pub model: String,
    /// Sampling temperature; backend default when unset
    pub temperature: Option<f32>,
    /// Instructions placed ahead of the query
    pub instructions: Option<String>,
}

impl GenerationRequest {
    /// Request answering `query` with `model`
    pub fn new(query: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Set the sampling temperature, clamped to `0.0..=1.0`
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    /// Set the instructions
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Apply the session settings a client sends in `configs`
    ///
    /// Reads `role`, `taskDefinition`, `language` and `outputFormat` into the
    /// instructions, and `temperature` when numeric. Unknown keys are ignored.
    #[must_use]
    pub fn with_session_configs(mut self, configs: &Value) -> Self {
        let text = |key: &str| {
            configs
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let mut lines = Vec::new();
        if let Some(role) = text("role") {
            lines.push(format!("You are {role}."));
        }
        if let Some(task) = text("taskDefinition") {
            lines.push(task.to_string());
        }
        if let Some(language) = text("language") {
            lines.push(format!("Answer in {language}."));
        }
        if let Some(format) = text("outputFormat") {
            lines.push(format!("Output format: {format}"));
        }
        if !lines.is_empty() {
            self.instructions = Some(lines.join("\n"));
        }

        #[allow(clippy::cast_possible_truncation)]
        let temperature = configs
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        match temperature {
            Some(t) => self.with_temperature(t),
            None => self,
        }
    }
}

/// Streaming text generator
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Whether the backend answers at all
    async fn health_check(&self) -> bool;

    /// Start generating; events arrive on the returned receiver
    ///
    /// The sender is dropped after `Done` or `Failed`, or when the provider
    /// stream ends without either.
    async fn stream_tokens(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<GenerationEvent>>;
}
