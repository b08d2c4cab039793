//! AWS Request Signing
//!
//! The gateway management API and the function invoke API both reject
//! unsigned requests. [`RequestSigner`] computes SigV4 headers for a request
//! before it is sent with `reqwest`.
//!
//! ```text
//! method + url + headers + body ──► SigV4 ──► authorization, x-amz-date,
//!                                             x-amz-security-token
//! ```

use std::fmt;
use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use thiserror::Error;

/// Signing name of the websocket gateway management API
pub const EXECUTE_API_SERVICE: &str = "execute-api";

/// Signing name of the function invoke API
pub const LAMBDA_SERVICE: &str = "lambda";

/// Provider name attached to credentials read from configuration
const CREDENTIALS_PROVIDER: &str = "relay-config";

/// Signing failures
#[derive(Debug, Error)]
pub enum SigningError {
    /// Signing parameters were incomplete
    #[error("invalid signing parameters: {0}")]
    Params(String),

    /// The request could not be signed
    #[error("failed to sign request: {0}")]
    Sign(String),
}

/// SigV4 signer for one service in one region
#[derive(Clone)]
pub struct RequestSigner {
    identity: Identity,
    access_key_id: String,
    region: String,
    service: &'static str,
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Signer using static credentials
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        region: impl Into<String>,
        service: &'static str,
    ) -> Self {
        let access_key_id = access_key_id.into();
        let credentials = Credentials::new(
            access_key_id.clone(),
            secret_access_key,
            session_token,
            None,
            CREDENTIALS_PROVIDER,
        );
        Self {
            identity: credentials.into(),
            access_key_id,
            region: region.into(),
            service,
        }
    }

    /// Region requests are signed for
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Service requests are signed for
    #[must_use]
    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Signature headers for a request sent now
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<Vec<(String, String)>, SigningError> {
        self.sign_at(method, url, headers, body, SystemTime::now())
    }

    /// Signature headers for a request sent at `time`
    pub fn sign_at(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
        time: SystemTime,
    ) -> Result<Vec<(String, String)>, SigningError> {
        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&self.identity)
            .region(&self.region)
            .name(self.service)
            .time(time)
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| SigningError::Params(e.to_string()))?
            .into();

        let signable = SignableRequest::new(
            method,
            url,
            headers.iter().copied(),
            SignableBody::Bytes(body),
        )
        .map_err(|e| SigningError::Sign(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| SigningError::Sign(e.to_string()))?
            .into_parts();

        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}
