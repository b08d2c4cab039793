//! Connection Identity and Routing Metadata
//!
//! A connection is named by an opaque string handed out by the websocket
//! gateway (direct connections) or minted by the web client (private
//! connections). The delivery channel is decided purely by that string.
//!
//! ```text
//!   "private-1712345678"  ──► ConnectionClass::Private ──► pub/sub publish
//!   "abc-1"               ──► ConnectionClass::Direct  ──► connection push
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix that marks a connection as private
pub const PRIVATE_PREFIX: &str = "private";

/// Opaque identifier of a logical client session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Delivery class of this connection
    ///
    /// Derived on every call; there is no stored class that could drift.
    #[must_use]
    pub fn class(&self) -> ConnectionClass {
        ConnectionClass::of(&self.0)
    }

    /// Shorthand for `class() == ConnectionClass::Private`
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.class() == ConnectionClass::Private
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Delivery class of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionClass {
    /// Subscribed through the pub/sub relay, reached by publishing to a topic
    Private,
    /// Held open by the websocket gateway, reached by pushing to the connection
    Direct,
}

impl ConnectionClass {
    /// Classify a raw identifier
    #[must_use]
    pub fn of(id: &str) -> Self {
        if id.starts_with(PRIVATE_PREFIX) {
            Self::Private
        } else {
            Self::Direct
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

/// Descriptor of the websocket gateway's management endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    /// API id part of the gateway domain (`{domain}.execute-api...`)
    pub domain: String,
    /// Cloud region the gateway lives in
    pub region: String,
    /// Deployment stage
    pub stage: String,
}

impl RoutingContext {
    /// Create a routing context
    pub fn new(
        domain: impl Into<String>,
        region: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            region: region.into(),
            stage: stage.into(),
        }
    }

    /// Management endpoint for connection pushes
    ///
    /// The partition is picked by a substring match on `"cn"` anywhere in the
    /// region. Regions are not validated; a malformed one still yields a URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        let suffix = if self.region.contains("cn") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        format!(
            "https://{}.execute-api.{}.{}/{}",
            self.domain, self.region, suffix, self.stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_prefix_classification() {
        assert_eq!(ConnectionId::from("private-abc123").class(), ConnectionClass::Private);
        assert_eq!(ConnectionId::from("private").class(), ConnectionClass::Private);
        assert_eq!(ConnectionId::from("abc-1").class(), ConnectionClass::Direct);
        // Case sensitive, and the prefix has to be at the start
        assert_eq!(ConnectionId::from("Private-1").class(), ConnectionClass::Direct);
        assert_eq!(ConnectionId::from("x-private").class(), ConnectionClass::Direct);
        assert_eq!(ConnectionId::from("").class(), ConnectionClass::Direct);
    }

    #[test]
    fn test_standard_partition_endpoint() {
        let ctx = RoutingContext::new("abc123", "us-east-1", "prod");
        assert_eq!(
            ctx.endpoint_url(),
            "https://abc123.execute-api.us-east-1.amazonaws.com/prod"
        );
    }

    #[test]
    fn test_china_partition_endpoint() {
        let ctx = RoutingContext::new("abc123", "cn-north-1", "prod");
        assert_eq!(
            ctx.endpoint_url(),
            "https://abc123.execute-api.cn-north-1.amazonaws.com.cn/prod"
        );

        let ctx = RoutingContext::new("abc123", "cn-northwest-1", "dev");
        assert!(ctx.endpoint_url().ends_with(".amazonaws.com.cn/dev"));
    }

    #[test]
    fn test_substring_partition_match_is_literal() {
        // Any region containing "cn" is treated as the China partition
        let ctx = RoutingContext::new("d", "acne-1", "s");
        assert!(ctx.endpoint_url().contains("amazonaws.com.cn"));
    }

    #[test]
    fn test_malformed_region_still_builds_url() {
        let ctx = RoutingContext::new("d", "", "s");
        assert_eq!(ctx.endpoint_url(), "https://d.execute-api..amazonaws.com/s");
    }

    #[test]
    fn test_connection_id_serde_is_transparent() {
        let id = ConnectionId::from("abc-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-1\"");
    }
}
