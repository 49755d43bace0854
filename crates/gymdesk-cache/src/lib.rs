//! # GymDesk Cache
//!
//! Persistent, versioned cache namespaces for the offline engine.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (one SQLite database, survives restarts)
//!     ├── cache_namespaces   name ─┐
//!     └── cache_entries      (namespace, "METHOD url") → stored response
//! ```
//!
//! Each namespace holds at most one entry per key; writes overwrite. Entries
//! of different namespaces never merge. Deleting a namespace removes its
//! entries with it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use gymdesk_core::CacheNamespace;
use gymdesk_net::{Request, Response};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

mod schema;

// ==================== Errors ====================

/// Cache storage errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ==================== Entries ====================

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub namespace: CacheNamespace,
    pub key: String,
    pub url: Url,
    pub method: Method,
    pub response: Response,
    /// When the entry was written; used for eviction order only.
    pub stored_at: DateTime<Utc>,
}

/// Where a lookup searches.
#[derive(Debug, Clone, Copy)]
pub enum MatchScope<'a> {
    /// A single namespace.
    Namespace(&'a CacheNamespace),
    /// Every namespace, oldest first.
    All,
}

/// Row ready to be written, built before entering the blocking pool.
struct EntryRow {
    cache_key: String,
    url: String,
    method: String,
    status: u16,
    headers: String,
    body: Vec<u8>,
}

impl EntryRow {
    fn new(request: &Request, response: &Response) -> Result<Self, CacheError> {
        Ok(Self {
            cache_key: request.cache_key(),
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers: encode_headers(&response.headers)?,
            body: response.body.to_vec(),
        })
    }

    fn insert(&self, conn: &Connection, namespace: &str, stored_at: i64) -> Result<(), CacheError> {
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
                (namespace, cache_key, url, method, status, headers, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                namespace,
                self.cache_key,
                self.url,
                self.method,
                self.status,
                self.headers,
                self.body,
                stored_at
            ],
        )?;
        Ok(())
    }
}

fn encode_headers(headers: &HeaderMap) -> Result<String, CacheError> {
    let pairs: Vec<(&str, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

fn decode_headers(raw: &str) -> Result<HeaderMap, CacheError> {
    let pairs: Vec<(String, String)> = serde_json::from_str(raw)?;
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    Ok(headers)
}

const ENTRY_COLUMNS: &str =
    "e.namespace, e.cache_key, e.url, e.method, e.status, e.headers, e.body, e.stored_at";

fn read_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        namespace: row.get(0)?,
        key: row.get(1)?,
        url: row.get(2)?,
        method: row.get(3)?,
        status: row.get(4)?,
        headers: row.get(5)?,
        body: row.get(6)?,
        stored_at: row.get(7)?,
    })
}

struct RawEntry {
    namespace: String,
    key: String,
    url: String,
    method: String,
    status: u16,
    headers: String,
    body: Vec<u8>,
    stored_at: i64,
}

impl RawEntry {
    fn into_entry(self) -> Result<CachedEntry, CacheError> {
        let url = Url::parse(&self.url).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
        let status =
            StatusCode::from_u16(self.status).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
        let stored_at = Utc
            .timestamp_millis_opt(self.stored_at)
            .single()
            .ok_or_else(|| CacheError::InvalidEntry(format!("bad timestamp {}", self.stored_at)))?;

        Ok(CachedEntry {
            namespace: CacheNamespace::from(self.namespace),
            key: self.key,
            response: Response {
                url: Some(url.clone()),
                status,
                headers: decode_headers(&self.headers)?,
                body: Bytes::from(self.body),
            },
            url,
            method,
            stored_at,
        })
    }
}

fn ensure_namespace(conn: &Connection, namespace: &str) -> Result<bool, CacheError> {
    // IGNORE, never REPLACE: replacing the row would cascade-delete its entries
    let created = conn.execute(
        "INSERT OR IGNORE INTO cache_namespaces (name, created_at) VALUES (?1, ?2)",
        params![namespace, Utc::now().timestamp_millis()],
    )?;
    Ok(created > 0)
}

// ==================== Cache Storage ====================

/// Registry of cache namespaces.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl CacheStorage {
    /// Open (or create) a database file.
    pub fn open_path(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::init_database(&conn)?;
        info!(path = %path.display(), "Cache storage opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a storage that lives only as long as this process.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        schema::init_database(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }

    /// Open a namespace, creating it if absent. Idempotent.
    pub async fn open(&self, namespace: &CacheNamespace) -> Result<CacheHandle, CacheError> {
        let name = namespace.as_str().to_string();
        let created = self.with_conn(move |conn| ensure_namespace(conn, &name)).await?;
        if created {
            debug!(namespace = %namespace, "Cache namespace created");
        }
        Ok(self.cache(namespace))
    }

    /// Handle to a namespace without creating it; the first write creates it.
    pub fn cache(&self, namespace: &CacheNamespace) -> CacheHandle {
        CacheHandle {
            storage: self.clone(),
            namespace: namespace.clone(),
            max_entries: None,
        }
    }

    /// Check if a namespace exists.
    pub async fn has(&self, namespace: &CacheNamespace) -> Result<bool, CacheError> {
        let name = namespace.as_str().to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM cache_namespaces WHERE name = ?1",
                    params![name],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// All namespaces currently in storage.
    pub async fn list_namespaces(&self) -> Result<BTreeSet<CacheNamespace>, CacheError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM cache_namespaces")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names.into_iter().map(CacheNamespace::from).collect())
        })
        .await
    }

    /// Delete a namespace and all its entries.
    pub async fn delete(&self, namespace: &CacheNamespace) -> Result<bool, CacheError> {
        let name = namespace.as_str().to_string();
        let deleted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                // Explicit entry delete keeps this correct even if foreign keys are off
                tx.execute("DELETE FROM cache_entries WHERE namespace = ?1", params![name])?;
                let removed =
                    tx.execute("DELETE FROM cache_namespaces WHERE name = ?1", params![name])?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await?;
        if deleted {
            info!(namespace = %namespace, "Cache namespace deleted");
        }
        Ok(deleted)
    }

    /// Look up a request in one namespace or across all of them.
    pub async fn match_request(
        &self,
        request: &Request,
        scope: MatchScope<'_>,
    ) -> Result<Option<CachedEntry>, CacheError> {
        let key = request.cache_key();
        let namespace = match scope {
            MatchScope::Namespace(ns) => Some(ns.as_str().to_string()),
            MatchScope::All => None,
        };

        let raw = self
            .with_conn(move |conn| {
                let raw = match namespace {
                    Some(ns) => conn
                        .query_row(
                            &format!(
                                "SELECT {} FROM cache_entries e
                                 WHERE e.namespace = ?1 AND e.cache_key = ?2",
                                ENTRY_COLUMNS
                            ),
                            params![ns, key],
                            read_entry,
                        )
                        .optional()?,
                    None => conn
                        .query_row(
                            &format!(
                                "SELECT {} FROM cache_entries e
                                 JOIN cache_namespaces n ON n.name = e.namespace
                                 WHERE e.cache_key = ?1
                                 ORDER BY n.created_at, n.rowid
                                 LIMIT 1",
                                ENTRY_COLUMNS
                            ),
                            params![key],
                            read_entry,
                        )
                        .optional()?,
                };
                Ok(raw)
            })
            .await?;

        let entry = raw.map(RawEntry::into_entry).transpose()?;
        trace!(url = %request.url, hit = entry.is_some(), "Cache lookup");
        Ok(entry)
    }

    /// Store a response, overwriting any entry with the same key.
    pub async fn put(
        &self,
        namespace: &CacheNamespace,
        request: &Request,
        response: &Response,
    ) -> Result<(), CacheError> {
        self.put_all(namespace, &[(request.clone(), response.clone())])
            .await
    }

    /// Store several responses in one transaction: all are written or none.
    pub async fn put_all(
        &self,
        namespace: &CacheNamespace,
        entries: &[(Request, Response)],
    ) -> Result<(), CacheError> {
        let rows = entries
            .iter()
            .map(|(req, res)| EntryRow::new(req, res))
            .collect::<Result<Vec<_>, _>>()?;
        let name = namespace.as_str().to_string();
        let count = rows.len();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            ensure_namespace(&tx, &name)?;
            let stored_at = Utc::now().timestamp_millis();
            for row in &rows {
                row.insert(&tx, &name, stored_at)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!(namespace = %namespace, count, "Cache entries stored");
        Ok(())
    }

    /// Keys stored in a namespace, oldest first.
    pub async fn keys(&self, namespace: &CacheNamespace) -> Result<Vec<String>, CacheError> {
        let name = namespace.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT cache_key FROM cache_entries WHERE namespace = ?1
                 ORDER BY stored_at, rowid",
            )?;
            let keys = stmt
                .query_map(params![name], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    /// Delete a single entry.
    pub async fn delete_entry(
        &self,
        namespace: &CacheNamespace,
        request: &Request,
    ) -> Result<bool, CacheError> {
        let name = namespace.as_str().to_string();
        let key = request.cache_key();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND cache_key = ?2",
                params![name, key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Drop the oldest entries beyond `max_entries`. Returns how many were removed.
    pub async fn trim(
        &self,
        namespace: &CacheNamespace,
        max_entries: usize,
    ) -> Result<usize, CacheError> {
        let name = namespace.as_str().to_string();
        let keep = i64::try_from(max_entries).unwrap_or(i64::MAX);
        let removed = self
            .with_conn(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND rowid IN (
                        SELECT rowid FROM cache_entries WHERE namespace = ?1
                        ORDER BY stored_at DESC, rowid DESC
                        LIMIT -1 OFFSET ?2
                     )",
                    params![name, keep],
                )?;
                Ok(removed)
            })
            .await?;
        if removed > 0 {
            debug!(namespace = %namespace, removed, max_entries, "Cache trimmed");
        }
        Ok(removed)
    }
}

// ==================== Cache Handle ====================

/// One namespace of a [`CacheStorage`].
#[derive(Debug, Clone)]
pub struct CacheHandle {
    storage: CacheStorage,
    namespace: CacheNamespace,
    max_entries: Option<usize>,
}

impl CacheHandle {
    /// Bound the number of entries kept after each write.
    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn namespace(&self) -> &CacheNamespace {
        &self.namespace
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub async fn match_request(&self, request: &Request) -> Result<Option<CachedEntry>, CacheError> {
        self.storage
            .match_request(request, MatchScope::Namespace(&self.namespace))
            .await
    }

    /// Store a response, then enforce the entry bound if any.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.storage.put(&self.namespace, request, response).await?;
        if let Some(max) = self.max_entries {
            self.storage.trim(&self.namespace, max).await?;
        }
        Ok(())
    }

    pub async fn put_all(&self, entries: &[(Request, Response)]) -> Result<(), CacheError> {
        self.storage.put_all(&self.namespace, entries).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.storage.keys(&self.namespace).await
    }

    pub async fn delete(&self, request: &Request) -> Result<bool, CacheError> {
        self.storage.delete_entry(&self.namespace, request).await
    }
}
