//! Relay Core - Token Streaming Relay and Private Connection Admission
//!
//! This crate relays text generated token by token to a waiting client, and
//! admits "private" clients whose answers travel over a pub/sub topic instead
//! of a gateway-held websocket connection.
//!
//! # Architecture
//!
//! ```text
//!  client ──► AdmissionGate ──(fire and forget)──► GenerationPipeline
//!               │   │                                     │
//!               │   └─► RegistrationStore                 │ one run per job
//!               ▼                                         ▼
//!          200/400/500                         LlmBackend ──► TokenRelay
//!                                                                 │
//!                                      ┌──────────────────────────┤
//!                                      ▼                          ▼
//!                             PublishChannel (private)    PushChannel (direct)
//! ```
//!
//! # Key Types
//!
//! - [`TokenRelay`]: accumulates one run's answer and delivers each increment
//! - [`TokenSink`]: the "accept next token" interface the generator drives
//! - [`AdmissionGate`]: validates, registers and dispatches private connections
//! - [`RelayConfig`]: process-wide configuration, built once at start
//! - [`StreamingEnvelope`]: the JSON message clients receive
//!
//! # Module Overview
//!
//! - [`admission`]: connection admission gate
//! - [`backend`]: LLM backend abstraction (Ollama)
//! - [`config`]: configuration loading and validation
//! - [`connection`]: connection identity, class and routing metadata
//! - [`delivery`]: publish and push delivery channels
//! - [`envelope`]: streaming envelope wire format
//! - [`invoke`]: fire-and-forget downstream invocation
//! - [`pipeline`]: generation runs feeding relays
//! - [`relay`]: the token streaming relay
//! - [`signing`]: SigV4 signing for gateway pushes and function invocations
//! - [`store`]: connection registration store

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod backend;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod envelope;
pub mod invoke;
pub mod pipeline;
pub mod relay;
pub mod signing;
pub mod store;

// Re-exports for convenience
pub use admission::{AdmissionError, AdmissionGate, GateResponse, CONNECTION_ID_HEADER};
pub use backend::{GenerationEvent, GenerationRequest, LlmBackend, OllamaBackend};
pub use config::{CompletionSignal, ConfigError, RelayConfig};
pub use connection::{ConnectionClass, ConnectionId, RoutingContext};
pub use delivery::{
    ChannelKind, DeliveryChannel, DeliveryError, DeliveryReceipt, PublishChannel, PushChannel,
};
pub use envelope::StreamingEnvelope;
pub use invoke::{ChannelInvoker, HttpInvoker, Invocation, InvocationError, Invoker};
pub use pipeline::{
    drive, GenerationJob, GenerationPipeline, JobError, RelayChannels, RunSummary,
};
pub use relay::{TokenRelay, TokenSink};
pub use signing::{RequestSigner, SigningError, EXECUTE_API_SERVICE, LAMBDA_SERVICE};
pub use store::{
    InMemoryRegistrationStore, PutOutcome, RegistrationRecord, RegistrationStore, StoreError,
};
