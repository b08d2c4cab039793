//! Generation Pipeline
//!
//! Consumes invocation payloads (gateway-shaped events), runs one generation
//! per payload and feeds the tokens to a fresh [`TokenRelay`].
//!
//! ```text
//! Invocation ──► GenerationJob::from_event ──► TokenRelay (per run)
//!                         │                          ▲
//!                         ▼                          │ on_token / on_end
//!                  LlmBackend::stream_tokens ──► drive()
//! ```
//!
//! Each run is spawned as its own task, so runs for different connections
//! proceed in parallel. Inside a run, tokens are handled strictly one after
//! another: the next token is not read until the previous delivery returned.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::backend::{GenerationEvent, GenerationRequest, LlmBackend};
use crate::config::{ConfigError, RelayConfig};
use crate::connection::{ConnectionId, RoutingContext};
use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::invoke::Invocation;
use crate::relay::{TokenRelay, TokenSink};

/// Reasons a run could not start
#[derive(Debug, Error)]
pub enum JobError {
    /// The payload is not a JSON object
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// No `requestContext.connectionId`
    #[error("event has no requestContext.connectionId")]
    MissingConnection,

    /// The body is not JSON
    #[error("invalid event body: {0}")]
    InvalidBody(String),

    /// The body has no query
    #[error("event body has no query")]
    MissingQuery,

    /// The relay could not be built
    #[error("relay configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The backend refused the generation request
    #[error("backend error: {0}")]
    Backend(String),
}

/// One generation run's inputs, extracted from an event
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationJob {
    /// Connection receiving the answer
    pub connection: ConnectionId,
    /// Gateway the connection lives on, when the event names one
    pub routing: Option<RoutingContext>,
    /// User query
    pub query: String,
    /// Raw `configs` object sent by the client, if any
    pub configs: Option<Value>,
}

impl GenerationJob {
    /// Extract a job from a gateway-shaped event
    ///
    /// The gateway's API id is read from `requestContext.apiId`, falling back
    /// to the first label of `requestContext.domainName`. Routing is `None`
    /// when either the id or `requestContext.stage` is missing.
    pub fn from_event(event: &Value, region: &str) -> Result<Self, JobError> {
        if !event.is_object() {
            return Err(JobError::InvalidPayload("not an object".to_string()));
        }

        let context = event.get("requestContext");
        let connection = context
            .and_then(|c| c.get("connectionId"))
            .and_then(Value::as_str)
            .map(ConnectionId::from)
            .ok_or(JobError::MissingConnection)?;

        let api_id = context.and_then(|c| {
            c.get("apiId").and_then(Value::as_str).map(String::from).or_else(|| {
                c.get("domainName")
                    .and_then(Value::as_str)
                    .and_then(|d| d.split('.').next())
                    .filter(|d| !d.is_empty())
                    .map(String::from)
            })
        });
        let stage = context
            .and_then(|c| c.get("stage"))
            .and_then(Value::as_str);
        let routing = match (api_id, stage) {
            (Some(api_id), Some(stage)) => Some(RoutingContext::new(api_id, region, stage)),
            _ => None,
        };

        let body = match event.get("body") {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .map_err(|e| JobError::InvalidBody(e.to_string()))?,
            Some(value @ Value::Object(_)) => value.clone(),
            _ => return Err(JobError::MissingQuery),
        };
        let query = body
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or(JobError::MissingQuery)?
            .to_string();

        Ok(Self {
            connection,
            routing,
            query,
            configs: body.get("configs").cloned(),
        })
    }
}

/// Outcome of one run, for logging and tests
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tokens fed to the sink
    pub tokens: u32,
    /// Envelopes delivered successfully
    pub delivered: u32,
    /// Envelopes whose delivery failed
    pub failed: u32,
    /// Whether generation ended normally
    pub completed: bool,
    /// Why the run stopped early: a backend error or a gone connection
    pub error: Option<String>,
    /// Answer as assembled by the backend
    pub final_answer: Option<String>,
}

/// Feed a token stream into a sink, one token at a time
///
/// Delivery failures are counted and the run goes on: the next envelope
/// carries the whole answer anyway. A connection reported gone ends the run.
/// `on_end` is called when the stream completes or closes, but not after a
/// generation error or a gone connection.
pub async fn drive<S: TokenSink>(
    sink: &mut S,
    mut tokens: mpsc::Receiver<GenerationEvent>,
) -> RunSummary {
    let mut summary = RunSummary::default();

    while let Some(token) = tokens.recv().await {
        match token {
            GenerationEvent::Token(text) => {
                summary.tokens += 1;
                match sink.on_token(&text).await {
                    Ok(_) => summary.delivered += 1,
                    Err(e @ DeliveryError::Gone { .. }) => {
                        // Nobody left to deliver to
                        summary.failed += 1;
                        summary.error = Some(e.to_string());
                        return summary;
                    }
                    Err(_) => summary.failed += 1,
                }
            }
            GenerationEvent::Done { answer } => {
                summary.final_answer = Some(answer);
                break;
            }
            GenerationEvent::Failed(e) => {
                summary.error = Some(e);
                return summary;
            }
        }
    }

    summary.completed = true;
    match sink.on_end().await {
        Ok(Some(_)) => summary.delivered += 1,
        Ok(None) => {}
        Err(_) => summary.failed += 1,
    }
    summary
}

/// How relays built by the pipeline deliver
#[derive(Clone)]
pub enum RelayChannels {
    /// Real HTTP channels derived from configuration
    Http(reqwest::Client),
    /// Caller-supplied channels, shared by every run
    Fixed {
        /// Channel for private connections
        publish: Arc<dyn DeliveryChannel>,
        /// Channel for direct connections
        push: Arc<dyn DeliveryChannel>,
    },
}

/// Worker turning invocations into generation runs
pub struct GenerationPipeline {
    config: Arc<RelayConfig>,
    backend: Arc<dyn LlmBackend>,
    channels: RelayChannels,
}

impl GenerationPipeline {
    /// Create a pipeline
    pub fn new(
        config: Arc<RelayConfig>,
        backend: Arc<dyn LlmBackend>,
        channels: RelayChannels,
    ) -> Self {
        Self {
            config,
            backend,
            channels,
        }
    }

    /// Consume invocations until the queue closes, one task per run
    ///
    /// Returns once the queue is closed; runs already spawned keep going.
    pub async fn run(self: Arc<Self>, mut invocations: mpsc::Receiver<Invocation>) {
        info!(backend = self.backend.name(), "Generation pipeline started");

        while let Some(invocation) = invocations.recv().await {
            let run_id = Uuid::new_v4();
            let span = tracing::info_span!(
                "generation_run",
                %run_id,
                function = %invocation.function_name
            );
            let pipeline = Arc::clone(&self);

            tokio::spawn(
                async move {
                    match pipeline.process(&invocation.payload).await {
                        Ok(summary) => info!(
                            tokens = summary.tokens,
                            delivered = summary.delivered,
                            failed = summary.failed,
                            completed = summary.completed,
                            "Generation run finished"
                        ),
                        Err(e) => error!(error = %e, "Generation run aborted"),
                    }
                }
                .instrument(span),
            );
        }

        info!("Invocation queue closed, pipeline stopping");
    }

    /// Run one generation for a serialized event
    pub async fn process(&self, payload: &[u8]) -> Result<RunSummary, JobError> {
        let event: Value = serde_json::from_slice(payload)
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        let job = GenerationJob::from_event(&event, &self.config.region)?;
        debug!(conn_id = %job.connection, class = %job.connection.class(), "Job parsed");

        let mut relay = self.build_relay(&job)?;

        let mut request =
            GenerationRequest::new(job.query.as_str(), self.config.backend.model.as_str());
        if let Some(ref configs) = job.configs {
            request = request.with_session_configs(configs);
        }
        let tokens = self
            .backend
            .stream_tokens(&request)
            .await
            .map_err(|e| JobError::Backend(e.to_string()))?;

        let summary = drive(&mut relay, tokens).await;
        if let Some(ref e) = summary.error {
            warn!(conn_id = %job.connection, error = %e, "Generation ended with error");
        }
        Ok(summary)
    }

    fn build_relay(&self, job: &GenerationJob) -> Result<TokenRelay, ConfigError> {
        match &self.channels {
            RelayChannels::Http(client) => TokenRelay::from_config(
                &self.config,
                job.connection.clone(),
                job.routing.as_ref(),
                client.clone(),
            ),
            RelayChannels::Fixed { publish, push } => {
                if job.routing.is_none() {
                    return Err(ConfigError::Missing("routing context"));
                }
                Ok(TokenRelay::with_channels(
                    job.connection.clone(),
                    Arc::clone(publish),
                    Arc::clone(push),
                )
                .with_completion_signal(self.config.completion_signal))
            }
        }
    }
}
