//! Delivery Channel Traits
//!
//! A delivery channel takes one serialized envelope and gets it to one
//! connection. The relay owns two of them and picks per token.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Which delivery channel handled a call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Pub/sub publish (private connections)
    Publish,
    /// Direct connection push (everything else)
    Push,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => f.write_str("publish"),
            Self::Push => f.write_str("push"),
        }
    }
}

/// Raw outcome of a successful delivery call, kept for diagnostics
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    /// Channel that carried the envelope
    pub channel: ChannelKind,
    /// HTTP status returned by the channel
    pub status: u16,
    /// Response body as returned by the channel
    pub body: String,
}

impl DeliveryReceipt {
    /// Create a receipt
    pub fn new(channel: ChannelKind, status: u16, body: impl Into<String>) -> Self {
        Self {
            channel,
            status,
            body: body.into(),
        }
    }
}

/// Delivery failures
///
/// None of these touch the relay's accumulated answer; resending the next
/// envelope delivers the full text again.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The request never produced a response
    #[error("{channel} transport error: {message}")]
    Transport {
        /// Channel that failed
        channel: ChannelKind,
        /// Underlying error text
        message: String,
    },

    /// The channel answered with a non-success status
    #[error("{channel} rejected delivery with status {status}: {body}")]
    Rejected {
        /// Channel that failed
        channel: ChannelKind,
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// The target connection no longer exists on the gateway
    #[error("connection {connection} is gone")]
    Gone {
        /// Connection that was addressed
        connection: ConnectionId,
    },

    /// The pub/sub endpoint accepted the request but reported GraphQL errors
    #[error("publish returned errors: {errors}")]
    Publish {
        /// Serialized `errors` array
        errors: String,
    },

    /// The endpoint URL could not be used
    #[error("{channel} endpoint {endpoint:?} is not a usable URL")]
    Endpoint {
        /// Channel that failed
        channel: ChannelKind,
        /// Configured endpoint
        endpoint: String,
    },

    /// The request could not be signed
    #[error("{channel} request signing failed: {message}")]
    Signing {
        /// Channel that failed
        channel: ChannelKind,
        /// Signer error text
        message: String,
    },

    /// The envelope could not be serialized
    #[error("failed to serialize envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Whether resending later could plausibly succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Gone { .. }
            | Self::Publish { .. }
            | Self::Endpoint { .. }
            | Self::Signing { .. }
            | Self::Envelope(_) => false,
        }
    }
}

/// One way of getting an envelope to a connection
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel kind, used for receipts and logging
    fn kind(&self) -> ChannelKind;

    /// Deliver a serialized envelope to `connection`
    async fn deliver(
        &self,
        connection: &ConnectionId,
        body: &str,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transport = DeliveryError::Transport {
            channel: ChannelKind::Push,
            message: "reset".to_string(),
        };
        assert!(transport.is_transient());

        let throttled = DeliveryError::Rejected {
            channel: ChannelKind::Publish,
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_transient());

        let bad_request = DeliveryError::Rejected {
            channel: ChannelKind::Publish,
            status: 400,
            body: String::new(),
        };
        assert!(!bad_request.is_transient());

        let gone = DeliveryError::Gone {
            connection: ConnectionId::from("abc-1"),
        };
        assert!(!gone.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = DeliveryError::Rejected {
            channel: ChannelKind::Push,
            status: 403,
            body: "Forbidden".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "push rejected delivery with status 403: Forbidden"
        );
    }
}
