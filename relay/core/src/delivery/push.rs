//! Connection Push Channel
//!
//! Posts envelopes to the websocket gateway's management API:
//!
//! ```text
//! POST {endpoint}/@connections/{connectionId}
//! ```
//!
//! The gateway only accepts SigV4-signed calls, so a channel built for a
//! routing context carries a [`RequestSigner`]. A channel on a fixed endpoint
//! (a local gateway emulator, `RELAY_PUSH_ENDPOINT`) sends plain requests
//! unless a signer is attached.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::traits::{ChannelKind, DeliveryChannel, DeliveryError, DeliveryReceipt};
use crate::connection::{ConnectionId, RoutingContext};
use crate::signing::RequestSigner;

const JSON: &str = "application/json";

/// Direct push to a gateway-held connection
#[derive(Clone, Debug)]
pub struct PushChannel {
    /// Management endpoint (`https://{domain}.execute-api.{region}.../{stage}`)
    endpoint: String,
    /// HTTP client
    http_client: reqwest::Client,
    /// Signs each push when set
    signer: Option<RequestSigner>,
}

impl PushChannel {
    /// Create an unsigned push channel for a fixed endpoint
    pub fn new(endpoint: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http_client,
            signer: None,
        }
    }

    /// Create a signed push channel for the gateway described by `routing`
    #[must_use]
    pub fn for_routing(
        routing: &RoutingContext,
        http_client: reqwest::Client,
        signer: RequestSigner,
    ) -> Self {
        Self::new(routing.endpoint_url(), http_client).with_signer(signer)
    }

    /// Sign every push with `signer`
    #[must_use]
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Configured management endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether pushes are signed
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    /// URL addressing one connection
    pub fn connection_url(&self, connection: &ConnectionId) -> Result<reqwest::Url, DeliveryError> {
        let bad_endpoint = || DeliveryError::Endpoint {
            channel: ChannelKind::Push,
            endpoint: self.endpoint.clone(),
        };

        let mut url = reqwest::Url::parse(&self.endpoint).map_err(|_| bad_endpoint())?;
        url.path_segments_mut()
            .map_err(|()| bad_endpoint())?
            .pop_if_empty()
            .push("@connections")
            .push(connection.as_str());
        Ok(url)
    }

    /// Build the push request for one envelope, signed when a signer is set
    pub fn request(
        &self,
        connection: &ConnectionId,
        body: &str,
    ) -> Result<reqwest::Request, DeliveryError> {
        let url = self.connection_url(connection)?;
        let mut builder = self
            .http_client
            .post(url.clone())
            .header(CONTENT_TYPE, JSON);

        if let Some(signer) = &self.signer {
            let signature = signer
                .sign("POST", url.as_str(), &[("content-type", JSON)], body.as_bytes())
                .map_err(|e| DeliveryError::Signing {
                    channel: ChannelKind::Push,
                    message: e.to_string(),
                })?;
            for (name, value) in signature {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(body.to_string())
            .build()
            .map_err(|e| DeliveryError::Transport {
                channel: ChannelKind::Push,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl DeliveryChannel for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn deliver(
        &self,
        connection: &ConnectionId,
        body: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let request = self.request(connection, body)?;
        debug!(
            conn_id = %connection,
            url = %request.url(),
            bytes = body.len(),
            signed = self.is_signed(),
            "Pushing envelope"
        );

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| DeliveryError::Transport {
                channel: ChannelKind::Push,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::GONE {
            return Err(DeliveryError::Gone {
                connection: connection.clone(),
            });
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                channel: ChannelKind::Push,
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(DeliveryReceipt::new(ChannelKind::Push, status.as_u16(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::EXECUTE_API_SERVICE;
    use pretty_assertions::assert_eq;

    fn signer(region: &str) -> RequestSigner {
        RequestSigner::new(
            "AKIDEXAMPLE",
            "secret",
            Some("session-1".to_string()),
            region,
            EXECUTE_API_SERVICE,
        )
    }

    #[test]
    fn test_connection_url() {
        let routing = RoutingContext::new("abc123", "us-east-1", "prod");
        let channel =
            PushChannel::for_routing(&routing, reqwest::Client::new(), signer("us-east-1"));

        let url = channel.connection_url(&ConnectionId::from("Xyz-1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://abc123.execute-api.us-east-1.amazonaws.com/prod/@connections/Xyz-1"
        );
    }

    #[test]
    fn test_connection_url_trailing_slash() {
        let channel = PushChannel::new("http://localhost:3001/", reqwest::Client::new());
        let url = channel.connection_url(&ConnectionId::from("abc-1")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3001/@connections/abc-1");
    }

    #[test]
    fn test_connection_url_escapes_id() {
        let channel = PushChannel::new("http://localhost:3001/dev", reqwest::Client::new());
        let url = channel.connection_url(&ConnectionId::from("a/b c")).unwrap();
        assert_eq!(url.path(), "/dev/@connections/a%2Fb%20c");
    }

    #[test]
    fn test_unusable_endpoint() {
        let channel = PushChannel::new("not a url", reqwest::Client::new());
        let err = channel
            .connection_url(&ConnectionId::from("abc-1"))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Endpoint { .. }));
    }

    #[test]
    fn test_gateway_push_is_signed() {
        let routing = RoutingContext::new("abc123", "cn-north-1", "prod");
        let channel =
            PushChannel::for_routing(&routing, reqwest::Client::new(), signer("cn-north-1"));
        assert!(channel.is_signed());

        let request = channel
            .request(&ConnectionId::from("abc-1"), r#"{"type":"streaming"}"#)
            .unwrap();
        let headers = request.headers();

        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/cn-north-1/execute-api/aws4_request"));
        assert!(headers.contains_key("x-amz-date"));
        assert_eq!(
            headers.get("x-amz-security-token").unwrap(),
            "session-1"
        );
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), JSON);
        assert_eq!(
            request.url().as_str(),
            "https://abc123.execute-api.cn-north-1.amazonaws.com.cn/prod/@connections/abc-1"
        );
    }

    #[test]
    fn test_override_push_is_plain() {
        let channel = PushChannel::new("http://localhost:3001/dev", reqwest::Client::new());
        assert!(!channel.is_signed());

        let request = channel.request(&ConnectionId::from("abc-1"), "{}").unwrap();
        assert!(!request.headers().contains_key("authorization"));
        assert!(!request.headers().contains_key("x-amz-date"));
        assert_eq!(request.headers().get(CONTENT_TYPE).unwrap(), JSON);
    }
}
