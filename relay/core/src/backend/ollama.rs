//! Ollama Backend
//!
//! Streams completions from `/api/generate`, which answers with
//! newline-delimited JSON objects:
//!
//! ```text
//! {"response":"Hel","done":false}
//! {"response":"lo","done":false}
//! {"response":"","done":true}
//! ```
//!
//! HTTP chunks do not align with lines, so bytes are buffered until a full
//! line is available.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{GenerationEvent, GenerationRequest, LlmBackend};
use crate::config::BackendSettings;

/// Events buffered between the HTTP reader and the run
const EVENT_BUFFER: usize = 100;

/// One decoded NDJSON line
#[derive(Debug, PartialEq, Eq)]
struct GenerateChunk {
    token: Option<String>,
    done: bool,
}

impl GenerateChunk {
    /// Decode one line; blank or unparseable lines yield `None`
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let data: Value = serde_json::from_str(line).ok()?;
        Some(Self {
            token: data
                .get("response")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(String::from),
            done: data.get("done").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Splits a byte stream into complete lines
///
/// Bytes are held until a newline arrives, so a multibyte character split
/// across HTTP chunks is decoded whole.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and take every line they complete
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends
    fn finish(self) -> Option<String> {
        Some(String::from_utf8_lossy(&self.pending).into_owned())
            .filter(|rest| !rest.trim().is_empty())
    }
}

/// Ollama `/api/generate` client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    host: String,
    port: u16,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Backend on an existing client
    pub fn new(host: impl Into<String>, port: u16, http_client: reqwest::Client) -> Self {
        Self {
            host: host.into(),
            port,
            http_client,
        }
    }

    /// Backend for the configured host
    ///
    /// Only the connect phase is bounded; a generation may stream for a
    /// long time.
    pub fn from_settings(settings: &BackendSettings) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::new(settings.host.clone(), settings.port, http_client))
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{path}", self.host, self.port)
    }

    fn request_body(request: &GenerationRequest) -> Value {
        let prompt = match request.instructions {
            Some(ref instructions) => format!("{instructions}\n\n{}", request.query),
            None => request.query.clone(),
        };
        let mut body = json!({
            "model": request.model,
            "prompt": prompt,
            "stream": true,
        });
        if let Some(temperature) = request.temperature {
            body["options"] = json!({ "temperature": temperature });
        }
        body
    }
}

/// Forward decoded lines from `stream` to `tx` until `done`, an error, or
/// the end of the stream
async fn pump<S, B, E>(mut stream: S, tx: mpsc::Sender<GenerationEvent>, model: String)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut lines = LineBuffer::default();
    let mut answer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(model = %model, error = %e, "Generation stream broke off");
                let _ = tx.send(GenerationEvent::Failed(e.to_string())).await;
                return;
            }
        };

        for line in lines.push(bytes.as_ref()) {
            let Some(chunk) = GenerateChunk::parse(&line) else {
                continue;
            };
            if let Some(token) = chunk.token {
                answer.push_str(&token);
                if tx.send(GenerationEvent::Token(token)).await.is_err() {
                    // Run dropped its receiver
                    return;
                }
            }
            if chunk.done {
                debug!(model = %model, chars = answer.len(), "Generation done");
                let _ = tx.send(GenerationEvent::Done { answer }).await;
                return;
            }
        }
    }

    // No trailing newline on the last object
    if let Some(chunk) = lines.finish().as_deref().and_then(GenerateChunk::parse) {
        if let Some(token) = chunk.token {
            answer.push_str(&token);
            if tx.send(GenerationEvent::Token(token)).await.is_err() {
                return;
            }
        }
    }
    let _ = tx.send(GenerationEvent::Done { answer }).await;
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.url("/api/tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn stream_tokens(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<GenerationEvent>> {
        let response = self
            .http_client
            .post(self.url("/api/generate"))
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump(
            Box::pin(response.bytes_stream()),
            tx,
            request.model.clone(),
        ));
        Ok(rx)
    }
}
