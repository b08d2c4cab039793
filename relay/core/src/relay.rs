//! Token Streaming Relay
//!
//! A `TokenRelay` is created for exactly one generation run and one
//! connection. Every token is appended to the run's answer, wrapped in a
//! [`StreamingEnvelope`] carrying the whole answer so far, and delivered on the
//! channel picked by the connection's class.
//!
//! ```text
//!   token ──► answer.push_str ──► envelope{text: answer} ──► JSON
//!                                                              │
//!                          ┌───────────────────────────────────┤
//!                          ▼                                   ▼
//!                 Private: PublishChannel              Direct: PushChannel
//! ```
//!
//! # Failure Semantics
//!
//! The append happens before delivery and is never rolled back. A failed
//! delivery returns a [`DeliveryError`] to the caller; the next envelope (or a
//! [`TokenRelay::resend`]) carries the full text again, so subscribers never
//! see a gap and replaying an older envelope is harmless.
//!
//! # Concurrency
//!
//! The relay is owned by its run and driven sequentially; `on_token` must
//! finish before the next token is fed. There is no interior locking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{CompletionSignal, ConfigError, RelayConfig};
use crate::connection::{ConnectionClass, ConnectionId, RoutingContext};
use crate::delivery::{
    ChannelKind, DeliveryChannel, DeliveryError, DeliveryReceipt, PublishChannel, PushChannel,
};
use crate::envelope::StreamingEnvelope;
use crate::signing::EXECUTE_API_SERVICE;

/// Consumer of a generation run's token feed
///
/// The generation side calls `on_token` once per token, in order, and
/// `on_end` once after the last token.
#[async_trait]
pub trait TokenSink: Send {
    /// Accept the next token
    async fn on_token(&mut self, token: &str) -> Result<DeliveryReceipt, DeliveryError>;

    /// Generation finished
    ///
    /// Returns the receipt of the terminal envelope when one was sent.
    async fn on_end(&mut self) -> Result<Option<DeliveryReceipt>, DeliveryError>;
}

/// Relay for one connection and one generation run
pub struct TokenRelay {
    /// Connection being served
    connection: ConnectionId,
    /// Channel picked from the connection class
    channel: Arc<dyn DeliveryChannel>,
    /// Cumulative answer; only ever appended to
    answer: String,
    /// What `on_end` does
    completion: CompletionSignal,
    /// Tokens accepted so far
    tokens: u32,
    /// When the relay was created
    started_at: Instant,
}

impl std::fmt::Debug for TokenRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRelay")
            .field("connection", &self.connection)
            .field("channel", &self.channel.kind())
            .field("answer_len", &self.answer.len())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl TokenRelay {
    /// Build a relay with real HTTP delivery channels
    ///
    /// `routing` is mandatory. Private connections additionally need a
    /// publish endpoint. Direct connections need signing credentials unless
    /// `push.endpoint_override` is set. Anything missing aborts the run before
    /// any token is processed.
    pub fn from_config(
        config: &RelayConfig,
        connection: ConnectionId,
        routing: Option<&RoutingContext>,
        http_client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let routing = routing.ok_or(ConfigError::Missing("routing context"))?;

        let channel: Arc<dyn DeliveryChannel> = match connection.class() {
            ConnectionClass::Private => {
                let endpoint = config
                    .publish
                    .endpoint
                    .clone()
                    .ok_or(ConfigError::Missing("publish.endpoint"))?;
                Arc::new(PublishChannel::new(
                    endpoint,
                    config.publish.api_key.clone(),
                    http_client,
                ))
            }
            ConnectionClass::Direct => match config.push.endpoint_override {
                Some(ref endpoint) => Arc::new(PushChannel::new(endpoint.clone(), http_client)),
                None => {
                    let signer = config.signer(EXECUTE_API_SERVICE, &routing.region)?;
                    Arc::new(PushChannel::for_routing(routing, http_client, signer))
                }
            },
        };

        Ok(Self::with_channel(connection, channel).with_completion_signal(config.completion_signal))
    }

    /// Build a relay choosing between two given channels by connection class
    #[must_use]
    pub fn with_channels(
        connection: ConnectionId,
        publish: Arc<dyn DeliveryChannel>,
        push: Arc<dyn DeliveryChannel>,
    ) -> Self {
        let channel = match connection.class() {
            ConnectionClass::Private => publish,
            ConnectionClass::Direct => push,
        };
        Self::with_channel(connection, channel)
    }

    fn with_channel(connection: ConnectionId, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            connection,
            channel,
            answer: String::new(),
            completion: CompletionSignal::None,
            tokens: 0,
            started_at: Instant::now(),
        }
    }

    /// Set the end-of-stream behavior
    #[must_use]
    pub fn with_completion_signal(mut self, completion: CompletionSignal) -> Self {
        self.completion = completion;
        self
    }

    /// Connection being served
    #[must_use]
    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    /// Channel this relay delivers on
    #[must_use]
    pub fn channel_kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    /// Cumulative answer so far
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Tokens accepted so far
    #[must_use]
    pub fn token_count(&self) -> u32 {
        self.tokens
    }

    /// Time since the relay was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Deliver the current cumulative answer again
    ///
    /// For callers that want to retry after a failed `on_token`. The buffer
    /// is not touched.
    pub async fn resend(&self) -> Result<DeliveryReceipt, DeliveryError> {
        self.send(&StreamingEnvelope::streaming(self.answer.as_str()))
            .await
    }

    async fn send(&self, envelope: &StreamingEnvelope) -> Result<DeliveryReceipt, DeliveryError> {
        let body = envelope.to_json()?;
        match self.channel.deliver(&self.connection, &body).await {
            Ok(receipt) => {
                debug!(
                    conn_id = %self.connection,
                    channel = %receipt.channel,
                    status = receipt.status,
                    "Envelope delivered"
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!(
                    conn_id = %self.connection,
                    channel = %self.channel.kind(),
                    error = %e,
                    "Envelope delivery failed"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TokenSink for TokenRelay {
    async fn on_token(&mut self, token: &str) -> Result<DeliveryReceipt, DeliveryError> {
        self.answer.push_str(token);
        self.tokens += 1;
        let envelope = StreamingEnvelope::streaming(self.answer.as_str());
        self.send(&envelope).await
    }

    async fn on_end(&mut self) -> Result<Option<DeliveryReceipt>, DeliveryError> {
        match self.completion {
            CompletionSignal::None => Ok(None),
            CompletionSignal::StreamingEnd => {
                let envelope = StreamingEnvelope::streaming_end(self.answer.as_str());
                self.send(&envelope).await.map(Some)
            }
        }
    }
}
