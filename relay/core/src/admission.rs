//! Connection Admission Gate
//!
//! Entry point for private connections. A request is admitted when its
//! `connectionId` header names a private connection; admission registers the
//! connection and kicks off a generation run without waiting for it.
//!
//! ```text
//! request ──► header check ──► store.put ──► invoker.invoke_async ──► 200
//!                 │                │                 │
//!                 ▼                ▼                 ▼
//!              400 bad          500 went        logged, still 200
//!              request          wrong
//! ```
//!
//! The payload handed downstream is the original event with the identifier
//! copied to `requestContext.connectionId`, where a websocket gateway event
//! carries it, so the pipeline sees one input shape for both origins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::connection::{ConnectionClass, ConnectionId};
use crate::invoke::Invoker;
use crate::store::{RegistrationRecord, RegistrationStore};

/// Header carrying the connection identifier
pub const CONNECTION_ID_HEADER: &str = "connectionId";

/// HTTP-shaped gate response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Body, omitted on success
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<String>,
}

impl GateResponse {
    /// Admission accepted
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            status_code: 200,
            body: None,
        }
    }

    /// Missing or invalid connection identifier
    #[must_use]
    pub fn bad_request() -> Self {
        Self {
            status_code: 400,
            body: Some("bad request".to_string()),
        }
    }

    /// Registration could not be committed
    #[must_use]
    pub fn server_error() -> Self {
        Self {
            status_code: 500,
            body: Some("something went wrong".to_string()),
        }
    }
}

/// Reasons admission is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Missing or non-private connection identifier, or a non-object event
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The registration store did not commit the record
    #[error("registration failed: {0}")]
    Storage(String),
}

impl AdmissionError {
    /// Response the caller sees
    #[must_use]
    pub fn response(&self) -> GateResponse {
        match self {
            Self::InvalidRequest(_) => GateResponse::bad_request(),
            Self::Storage(_) => GateResponse::server_error(),
        }
    }
}

/// Validates, registers and dispatches private connections
pub struct AdmissionGate {
    store: Arc<dyn RegistrationStore>,
    invoker: Arc<dyn Invoker>,
    function_name: String,
}

impl AdmissionGate {
    /// Create a gate dispatching to the configured processing function
    pub fn new(
        config: &RelayConfig,
        store: Arc<dyn RegistrationStore>,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            store,
            invoker,
            function_name: config.invocation.function_name.clone(),
        }
    }

    /// Name of the function admitted requests are dispatched to
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Handle one inbound event and produce the caller's response
    pub async fn admit(&self, event: Value) -> GateResponse {
        match self.try_admit(event).await {
            Ok(connection) => {
                info!(conn_id = %connection, "Private connection admitted");
                GateResponse::accepted()
            }
            Err(e) => {
                warn!(error = %e, "Admission refused");
                e.response()
            }
        }
    }

    /// Admission with the failure reason kept
    ///
    /// A dispatch failure is not an admission failure: it is logged and the
    /// connection is still reported as admitted.
    pub async fn try_admit(&self, mut event: Value) -> Result<ConnectionId, AdmissionError> {
        let connection = connection_id_header(&event).ok_or_else(|| {
            AdmissionError::InvalidRequest("missing connectionId header".to_string())
        })?;
        if connection.class() != ConnectionClass::Private {
            return Err(AdmissionError::InvalidRequest(format!(
                "connection {connection} is not private"
            )));
        }

        inject_connection_id(&mut event, &connection)?;

        let outcome = self
            .store
            .put(RegistrationRecord::new(connection.clone()))
            .await
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        if !outcome.is_committed() {
            return Err(AdmissionError::Storage(format!(
                "store reported status {}",
                outcome.status_code
            )));
        }

        // Serializing a Value cannot fail
        let payload = serde_json::to_vec(&event).unwrap_or_default();
        if let Err(e) = self
            .invoker
            .invoke_async(&self.function_name, payload)
            .await
        {
            error!(
                conn_id = %connection,
                function = %self.function_name,
                error = %e,
                "Failed to dispatch generation run"
            );
        }

        Ok(connection)
    }
}

/// Read the connection identifier from `event.headers`
///
/// The exact header name is tried first, then a case-insensitive match, since
/// HTTP/2 front ends lowercase header names.
#[must_use]
pub fn connection_id_header(event: &Value) -> Option<ConnectionId> {
    let headers = event.get("headers")?.as_object()?;
    let value = headers.get(CONNECTION_ID_HEADER).or_else(|| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(CONNECTION_ID_HEADER))
            .map(|(_, v)| v)
    })?;
    value.as_str().map(ConnectionId::from)
}

/// Copy the identifier into `event.requestContext.connectionId`
fn inject_connection_id(event: &mut Value, connection: &ConnectionId) -> Result<(), AdmissionError> {
    let root = event
        .as_object_mut()
        .ok_or_else(|| AdmissionError::InvalidRequest("event is not an object".to_string()))?;
    let context = root
        .entry("requestContext")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !context.is_object() {
        *context = Value::Object(serde_json::Map::new());
    }
    if let Some(context) = context.as_object_mut() {
        context.insert(
            "connectionId".to_string(),
            Value::String(connection.as_str().to_string()),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::InvocationError;
    use crate::store::{InMemoryRegistrationStore, PutOutcome, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl Invoker for RecordingInvoker {
        async fn invoke_async(
            &self,
            function_name: &str,
            payload: Vec<u8>,
        ) -> Result<(), InvocationError> {
            if self.fail {
                return Err(InvocationError::Transport("unreachable".to_string()));
            }
            let value = serde_json::from_slice(&payload).unwrap();
            self.calls
                .lock()
                .unwrap()
                .push((function_name.to_string(), value));
            Ok(())
        }
    }

    /// Store that records every put and answers with a fixed status
    struct CountingStore {
        puts: Mutex<Vec<RegistrationRecord>>,
        status_code: u16,
    }

    impl CountingStore {
        fn answering(status_code: u16) -> Arc<Self> {
            Arc::new(Self {
                puts: Mutex::new(Vec::new()),
                status_code,
            })
        }

        fn put_ids(&self) -> Vec<String> {
            self.puts
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.id.as_str().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl RegistrationStore for CountingStore {
        async fn put(&self, record: RegistrationRecord) -> Result<PutOutcome, StoreError> {
            self.puts.lock().unwrap().push(record);
            Ok(PutOutcome {
                status_code: self.status_code,
            })
        }

        async fn lookup(
            &self,
            id: &ConnectionId,
        ) -> Result<Option<RegistrationRecord>, StoreError> {
            Ok(self
                .puts
                .lock()
                .unwrap()
                .iter()
                .find(|r| &r.id == id)
                .cloned())
        }
    }

    fn gate(
        store: Arc<dyn RegistrationStore>,
        invoker: Arc<RecordingInvoker>,
    ) -> AdmissionGate {
        AdmissionGate::new(&RelayConfig::default(), store, invoker)
    }

    #[tokio::test]
    async fn test_missing_header_is_bad_request() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let gate = gate(store.clone(), invoker.clone());

        let response = gate.admit(json!({"headers": {}, "body": "{}"})).await;
        assert_eq!(response, GateResponse::bad_request());
        assert!(store.is_empty());
        assert!(invoker.calls.lock().unwrap().is_empty());

        let response = gate.admit(json!({"body": "{}"})).await;
        assert_eq!(response, GateResponse::bad_request());
    }

    #[tokio::test]
    async fn test_non_private_header_is_bad_request() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let gate = gate(store.clone(), invoker.clone());

        let response = gate
            .admit(json!({"headers": {"connectionId": "abc-1"}}))
            .await;
        assert_eq!(response.status_code, 400);
        assert!(store.is_empty());
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admits_private_connection() {
        let store = CountingStore::answering(200);
        let invoker = Arc::new(RecordingInvoker::default());
        let gate = gate(store.clone(), invoker.clone());

        let event = json!({
            "headers": {"connectionId": "private-abc123"},
            "body": "{\"action\":\"search\",\"query\":\"hi\"}",
            "requestContext": {"domainName": "d", "stage": "prod"}
        });
        let response = gate.admit(event).await;

        assert_eq!(response, GateResponse::accepted());
        assert_eq!(store.put_ids(), vec!["private-abc123"]);
        let id = ConnectionId::from("private-abc123");
        assert!(store.lookup(&id).await.unwrap().is_some());

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (function, payload) = &calls[0];
        assert_eq!(function, crate::config::DEFAULT_PROCESSOR_FUNCTION);
        assert_eq!(payload["requestContext"]["connectionId"], "private-abc123");
        // Everything else passes through untouched
        assert_eq!(payload["requestContext"]["domainName"], "d");
        assert_eq!(payload["body"], "{\"action\":\"search\",\"query\":\"hi\"}");
    }

    #[tokio::test]
    async fn test_creates_missing_request_context() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let gate = gate(store, invoker.clone());

        gate.admit(json!({"headers": {"connectionid": "private-1"}}))
            .await;

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls[0].1["requestContext"]["connectionId"], "private-1");
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let invoker = Arc::new(RecordingInvoker::default());
        let store = CountingStore::answering(503);
        let gate = gate(store.clone(), invoker.clone());

        let response = gate
            .admit(json!({"headers": {"connectionId": "private-1"}}))
            .await;
        assert_eq!(response, GateResponse::server_error());
        assert_eq!(store.put_ids(), vec!["private-1"]);
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invocation_failure_still_accepted() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let invoker = Arc::new(RecordingInvoker {
            fail: true,
            ..Default::default()
        });
        let gate = gate(store.clone(), invoker);

        let response = gate
            .admit(json!({"headers": {"connectionId": "private-1"}}))
            .await;
        assert_eq!(response, GateResponse::accepted());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            serde_json::to_value(GateResponse::accepted()).unwrap(),
            json!({"statusCode": 200})
        );
        assert_eq!(
            serde_json::to_value(GateResponse::bad_request()).unwrap(),
            json!({"statusCode": 400, "body": "bad request"})
        );
        assert_eq!(
            serde_json::to_value(GateResponse::server_error()).unwrap(),
            json!({"statusCode": 500, "body": "something went wrong"})
        );
    }

    #[test]
    fn test_header_must_be_string() {
        let event = json!({"headers": {"connectionId": 42}});
        assert_eq!(connection_id_header(&event), None);
    }
}
