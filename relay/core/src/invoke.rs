//! Downstream Invocation
//!
//! The admission gate hands each accepted request to the processing function
//! with event (fire-and-forget) semantics: the invoker only reports whether
//! the dispatch was accepted, never the result of the run.
//!
//! Two invokers are provided:
//!
//! - [`ChannelInvoker`]: queues the payload for an in-process
//!   [`GenerationPipeline`](crate::pipeline::GenerationPipeline)
//! - [`HttpInvoker`]: POSTs the payload to a function invocation endpoint,
//!   SigV4-signed when a [`RequestSigner`] is attached

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::signing::RequestSigner;

/// Header selecting asynchronous invocation on the function endpoint
pub const INVOCATION_TYPE_HEADER: &str = "X-Amz-Invocation-Type";

/// One queued invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Function to run
    pub function_name: String,
    /// Serialized event payload
    pub payload: Vec<u8>,
}

/// Dispatch failures
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Nobody is listening for in-process invocations anymore
    #[error("invocation queue closed")]
    QueueClosed,

    /// The in-process queue is full
    #[error("invocation queue full")]
    QueueFull,

    /// The HTTP request failed
    #[error("invocation transport error: {0}")]
    Transport(String),

    /// The request could not be signed
    #[error("invocation signing failed: {0}")]
    Signing(String),

    /// The function endpoint refused the dispatch
    #[error("invocation rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },
}

/// Fire-and-forget function invoker
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Dispatch `payload` to `function_name` without waiting for the result
    async fn invoke_async(&self, function_name: &str, payload: Vec<u8>)
        -> Result<(), InvocationError>;
}

/// Invoker feeding an in-process queue
#[derive(Clone, Debug)]
pub struct ChannelInvoker {
    tx: mpsc::Sender<Invocation>,
}

impl ChannelInvoker {
    /// Create an invoker and the receiving end of its queue
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Invocation>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Invoker for ChannelInvoker {
    async fn invoke_async(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<(), InvocationError> {
        // try_send: the gate must not wait on a backed-up pipeline
        self.tx
            .try_send(Invocation {
                function_name: function_name.to_string(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => InvocationError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => InvocationError::QueueClosed,
            })?;
        debug!(function = function_name, "Invocation queued");
        Ok(())
    }
}

/// Invoker posting to `{base_url}/2015-03-31/functions/{name}/invocations`
#[derive(Clone, Debug)]
pub struct HttpInvoker {
    base_url: String,
    http_client: reqwest::Client,
    signer: Option<RequestSigner>,
}

impl HttpInvoker {
    /// Create an unsigned HTTP invoker
    pub fn new(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http_client,
            signer: None,
        }
    }

    /// Sign every invocation with `signer`
    #[must_use]
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Invocation URL for a function
    #[must_use]
    pub fn invocation_url(&self, function_name: &str) -> String {
        format!(
            "{}/2015-03-31/functions/{}/invocations",
            self.base_url.trim_end_matches('/'),
            function_name
        )
    }

    /// Build the invocation request, signed when a signer is set
    pub fn request(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<reqwest::Request, InvocationError> {
        let url = self.invocation_url(function_name);
        let mut builder = self
            .http_client
            .post(&url)
            .header(INVOCATION_TYPE_HEADER, "Event")
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(signer) = &self.signer {
            let signature = signer
                .sign(
                    "POST",
                    &url,
                    &[
                        ("content-type", "application/json"),
                        ("x-amz-invocation-type", "Event"),
                    ],
                    &payload,
                )
                .map_err(|e| InvocationError::Signing(e.to_string()))?;
            for (name, value) in signature {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(payload)
            .build()
            .map_err(|e| InvocationError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke_async(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<(), InvocationError> {
        let request = self.request(function_name, payload)?;
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| InvocationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvocationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(function = function_name, status = status.as_u16(), "Invocation accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::LAMBDA_SERVICE;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_channel_invoker_queues_payload() {
        let (invoker, mut rx) = ChannelInvoker::channel(4);
        invoker
            .invoke_async("processor", b"{}".to_vec())
            .await
            .unwrap();

        let invocation = rx.recv().await.unwrap();
        assert_eq!(invocation.function_name, "processor");
        assert_eq!(invocation.payload, b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_channel_invoker_full_queue() {
        let (invoker, _rx) = ChannelInvoker::channel(1);
        invoker.invoke_async("f", Vec::new()).await.unwrap();
        let err = invoker.invoke_async("f", Vec::new()).await.unwrap_err();
        assert!(matches!(err, InvocationError::QueueFull));
    }

    #[tokio::test]
    async fn test_channel_invoker_closed_queue() {
        let (invoker, rx) = ChannelInvoker::channel(1);
        drop(rx);
        let err = invoker.invoke_async("f", Vec::new()).await.unwrap_err();
        assert!(matches!(err, InvocationError::QueueClosed));
    }

    #[test]
    fn test_http_invocation_url() {
        let invoker = HttpInvoker::new("http://localhost:9001/", reqwest::Client::new());
        assert_eq!(
            invoker.invocation_url("langchain_processor_qa"),
            "http://localhost:9001/2015-03-31/functions/langchain_processor_qa/invocations"
        );
    }

    #[test]
    fn test_http_invoker_signs_request() {
        let signer = RequestSigner::new("AKIDEXAMPLE", "secret", None, "us-east-1", LAMBDA_SERVICE);
        let invoker = HttpInvoker::new(
            "https://lambda.us-east-1.amazonaws.com",
            reqwest::Client::new(),
        )
        .with_signer(signer);

        let request = invoker.request("processor", b"{}".to_vec()).unwrap();
        let headers = request.headers();
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/lambda/aws4_request"));
        assert!(auth.contains("x-amz-invocation-type"));
        assert!(headers.contains_key("x-amz-date"));
        assert_eq!(headers.get(INVOCATION_TYPE_HEADER).unwrap(), "Event");
    }

    #[test]
    fn test_http_invoker_unsigned_without_signer() {
        let invoker = HttpInvoker::new("http://localhost:9001", reqwest::Client::new());
        let request = invoker.request("processor", Vec::new()).unwrap();
        assert!(!request.headers().contains_key("authorization"));
        assert_eq!(
            request.url().as_str(),
            "http://localhost:9001/2015-03-31/functions/processor/invocations"
        );
    }
}
