//! Pub/Sub Publish Channel
//!
//! Private connections subscribe to a named topic on a GraphQL pub/sub API.
//! Publishing is a mutation whose `data` variable is the envelope as an
//! opaque JSON string:
//!
//! ```text
//! POST {endpoint}
//! x-api-key: {api_key}
//!
//! {"query": "mutation PublishData(...)", "variables": {"name": id, "data": "<envelope>"}}
//! ```

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::traits::{ChannelKind, DeliveryChannel, DeliveryError, DeliveryReceipt};
use crate::connection::ConnectionId;

/// Mutation understood by the pub/sub API
pub const PUBLISH_MUTATION: &str = "mutation PublishData($name: String!, $data: AWSJSON!) { publish(name: $name, data: $data) { name data } }";

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize)]
struct PublishRequest<'a> {
    query: &'static str,
    variables: PublishVariables<'a>,
}

#[derive(Serialize)]
struct PublishVariables<'a> {
    name: &'a str,
    data: &'a str,
}

/// Publish to a pub/sub topic named after the connection
#[derive(Clone)]
pub struct PublishChannel {
    /// GraphQL endpoint
    endpoint: String,
    /// API key (sent as `x-api-key` when set)
    api_key: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl std::fmt::Debug for PublishChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishChannel")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl PublishChannel {
    /// Create a publish channel
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            http_client,
        }
    }

    /// Configured endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// JSON request body for one publish
    pub fn request_body(connection: &ConnectionId, data: &str) -> serde_json::Value {
        let request = PublishRequest {
            query: PUBLISH_MUTATION,
            variables: PublishVariables {
                name: connection.as_str(),
                data,
            },
        };
        serde_json::json!(request)
    }

    /// Turn a raw pub/sub response into a receipt or an error
    ///
    /// GraphQL reports most failures in an `errors` array on a 200 response,
    /// so a success status alone is not enough.
    pub fn interpret_response(status: u16, body: String) -> Result<DeliveryReceipt, DeliveryError> {
        if !(200..300).contains(&status) {
            return Err(DeliveryError::Rejected {
                channel: ChannelKind::Publish,
                status,
                body,
            });
        }

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
                if !errors.is_empty() {
                    return Err(DeliveryError::Publish {
                        errors: serde_json::Value::Array(errors.clone()).to_string(),
                    });
                }
            }
        }

        Ok(DeliveryReceipt::new(ChannelKind::Publish, status, body))
    }
}

#[async_trait]
impl DeliveryChannel for PublishChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Publish
    }

    async fn deliver(
        &self,
        connection: &ConnectionId,
        body: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        debug!(conn_id = %connection, endpoint = %self.endpoint, bytes = body.len(), "Publishing envelope");

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&Self::request_body(connection, body));
        if let Some(ref key) = self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| DeliveryError::Transport {
            channel: ChannelKind::Publish,
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Self::interpret_response(status, text)
    }
}
