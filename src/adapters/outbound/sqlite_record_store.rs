//! SQLite Record Store
//!
//! Implements RecordStore against the reverse proxy's own SQLite database
//! (`proxy_host` table). Calls run on the blocking pool so a slow disk
//! never stalls other services' schedules.

use crate::domain::entities::ProxyRecord;
use crate::domain::ports::{RecordStore, StoreError};
use crate::domain::value_objects::Scheme;
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Raw `proxy_host` columns before validation.
struct RawRow {
    id: i64,
    domain_names: String,
    forward_host: String,
    forward_port: i64,
    forward_scheme: String,
    enabled: i64,
}

/// SQLite-backed record store.
///
/// Holds one connection for the lifetime of the process; `close` drops it.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteRecordStore {
    /// Open the proxy database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Connection("connection lock poisoned".to_string()))?;
            match guard.as_ref() {
                Some(c) => f(c),
                None => Err(StoreError::Closed),
            }
        })
        .await
        .map_err(|e| StoreError::Connection(format!("spawn_blocking error: {}", e)))?
    }

    fn find_blocking(conn: &Connection, domain: &str) -> Result<Option<ProxyRecord>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT id, domain_names, forward_host, forward_port, forward_scheme, enabled
                 FROM proxy_host
                 WHERE is_deleted IS NULL OR is_deleted = 0
                 ORDER BY id",
            )
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::read_row)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        for row in rows {
            let raw = row.map_err(|e| StoreError::Query(e.to_string()))?;
            let domains: Vec<String> = match serde_json::from_str(&raw.domain_names) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(id = raw.id, "skipping record with unreadable domain_names: {}", e);
                    continue;
                }
            };
            if domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
                return Self::decode(raw, domains).map(Some);
            }
        }

        Ok(None)
    }

    fn read_row(row: &Row) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            domain_names: row.get(1)?,
            forward_host: row.get(2)?,
            forward_port: row.get(3)?,
            forward_scheme: row.get(4)?,
            enabled: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        })
    }

    fn decode(raw: RawRow, domain_names: Vec<String>) -> Result<ProxyRecord, StoreError> {
        let forward_port = u16::try_from(raw.forward_port).map_err(|_| StoreError::Decode {
            id: raw.id,
            reason: format!("forward_port {} out of range", raw.forward_port),
        })?;
        let forward_scheme = Scheme::parse(&raw.forward_scheme).ok_or_else(|| StoreError::Decode {
            id: raw.id,
            reason: format!("unknown forward_scheme {:?}", raw.forward_scheme),
        })?;

        Ok(ProxyRecord {
            id: raw.id,
            domain_names,
            forward_host: raw.forward_host,
            forward_port,
            forward_scheme,
            enabled: raw.enabled != 0,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_by_domain(&self, domain: &str) -> Result<Option<ProxyRecord>, StoreError> {
        let domain = domain.to_string();
        self.with_conn(move |conn| Self::find_blocking(conn, &domain))
            .await
    }

    async fn update(
        &self,
        id: i64,
        host: &str,
        port: u16,
        scheme: Option<Scheme>,
    ) -> Result<usize, StoreError> {
        let host = host.to_string();
        let scheme = scheme.map(|s| s.as_str());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE proxy_host
                 SET forward_host = ?1,
                     forward_port = ?2,
                     forward_scheme = COALESCE(?3, forward_scheme),
                     modified_on = datetime('now')
                 WHERE id = ?4",
                params![host, port, scheme, id],
            )
            .map_err(|e| StoreError::Query(e.to_string()))
        })
        .await
    }

    async fn close(&self) {
        let conn = match self.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("error closing record store: {}", e);
            } else {
                tracing::info!("record store closed");
            }
        }
    }
}
