//! Connection Registration Store
//!
//! Key-value lookup table mapping connection identifiers to their
//! registration record. The admission gate only needs an idempotent `put`
//! that reports an HTTP-style status, plus `lookup` for whoever resolves
//! connections later.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionId;

/// Stored record for one connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Connection identifier (the key)
    pub id: ConnectionId,
}

impl RegistrationRecord {
    /// Record for `id`
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self { id }
    }
}

/// Outcome of a put, as reported by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PutOutcome {
    /// HTTP-style status code; only 200 counts as committed
    pub status_code: u16,
}

impl PutOutcome {
    /// Committed write
    pub const OK: Self = Self { status_code: 200 };

    /// Whether the write was committed
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.status_code == 200
    }
}

/// Store failures that prevent a status from being reported at all
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("registration store unavailable: {0}")]
    Unavailable(String),
}

/// Registration lookup store
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Upsert a record; safe to repeat
    async fn put(&self, record: RegistrationRecord) -> Result<PutOutcome, StoreError>;

    /// Fetch the record for `id`, if registered
    async fn lookup(&self, id: &ConnectionId) -> Result<Option<RegistrationRecord>, StoreError>;
}

/// In-process store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
    records: DashMap<ConnectionId, RegistrationRecord>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no connection is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn put(&self, record: RegistrationRecord) -> Result<PutOutcome, StoreError> {
        self.records.insert(record.id.clone(), record);
        Ok(PutOutcome::OK)
    }

    async fn lookup(&self, id: &ConnectionId) -> Result<Option<RegistrationRecord>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = InMemoryRegistrationStore::new();
        let id = ConnectionId::from("private-abc123");

        for _ in 0..3 {
            let outcome = store.put(RegistrationRecord::new(id.clone())).await.unwrap();
            assert!(outcome.is_committed());
        }

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.lookup(&id).await.unwrap(),
            Some(RegistrationRecord::new(id))
        );
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let store = InMemoryRegistrationStore::new();
        assert!(store.is_empty());
        assert_eq!(store.lookup(&ConnectionId::from("nope")).await.unwrap(), None);
    }

    #[test]
    fn test_put_outcome() {
        assert!(PutOutcome::OK.is_committed());
        assert!(!PutOutcome { status_code: 500 }.is_committed());
        assert!(!PutOutcome { status_code: 201 }.is_committed());
    }
}
