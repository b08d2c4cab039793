//! LLM Backend Integration
//!
//! Generation runs pull their token feed from an [`LlmBackend`]. Only Ollama
//! is wired up today.
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{GenerationRequest, LlmBackend, OllamaBackend};
//!
//! let backend = OllamaBackend::from_settings(&config.backend)?;
//! let request = GenerationRequest::new("Hello!", "llama3.2");
//! let rx = backend.stream_tokens(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{GenerationEvent, GenerationRequest, LlmBackend};
