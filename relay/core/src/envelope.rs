//! Streaming Envelope
//!
//! Wire message sent to a client for every token event. Each envelope carries
//! the full cumulative answer, never a delta, so a subscriber only ever needs
//! to keep the last `text` it received.

use serde::{Deserialize, Serialize};

/// `message` value for an in-progress envelope
pub const MESSAGE_STREAMING: &str = "streaming";

/// `message` value for the optional terminal envelope
pub const MESSAGE_STREAMING_END: &str = "streaming_end";

/// JSON envelope carrying the cumulative answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingEnvelope {
    /// Message kind (`"streaming"` or `"streaming_end"`)
    pub message: String,
    /// Wall-clock time in epoch milliseconds
    pub timestamp: f64,
    /// Retrieval sources, always empty on this path
    pub source_data: Vec<serde_json::Value>,
    /// Cumulative answer so far
    pub text: String,
    /// Answer relevance score, always empty on this path
    pub score_query_answer: String,
    /// Content moderation label, always empty on this path
    pub content_check_label: String,
    /// Content moderation suggestion, always empty on this path
    pub content_check_suggestion: String,
}

impl StreamingEnvelope {
    /// Envelope for a token event
    pub fn streaming(text: impl Into<String>) -> Self {
        Self::with_message(MESSAGE_STREAMING, text)
    }

    /// Terminal envelope, sent only when the completion signal is enabled
    pub fn streaming_end(text: impl Into<String>) -> Self {
        Self::with_message(MESSAGE_STREAMING_END, text)
    }

    fn with_message(message: &str, text: impl Into<String>) -> Self {
        Self {
            message: message.to_string(),
            timestamp: now_millis(),
            source_data: Vec::new(),
            text: text.into(),
            score_query_answer: String::new(),
            content_check_label: String::new(),
            content_check_suggestion: String::new(),
        }
    }

    /// Serialize to the JSON wire format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Current wall-clock time in epoch milliseconds, with sub-ms precision
#[allow(clippy::cast_precision_loss)]
fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1000.0
}
