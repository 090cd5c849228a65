//! Record Store Port
//!
//! Read/update access to the reverse proxy's persisted routing records.
//! The proxy owns the lifecycle of these rows; we only repoint them.

use crate::domain::entities::ProxyRecord;
use crate::domain::value_objects::Scheme;
use async_trait::async_trait;

/// Errors talking to the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store connection failed: {0}")]
    Connection(String),
    #[error("record store query failed: {0}")]
    Query(String),
    #[error("malformed record {id}: {reason}")]
    Decode { id: i64, reason: String },
    #[error("record store is closed")]
    Closed,
}

/// Repository for proxy routing records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find the record whose domain set contains `domain`.
    async fn find_by_domain(&self, domain: &str) -> Result<Option<ProxyRecord>, StoreError>;

    /// Rewrite a record's forward host and port, and its scheme when given.
    ///
    /// Returns the number of rows affected. Zero means the id is stale.
    async fn update(
        &self,
        id: i64,
        host: &str,
        port: u16,
        scheme: Option<Scheme>,
    ) -> Result<usize, StoreError>;

    /// Release the underlying connection.
    async fn close(&self);
}
