//! Self-hosted document backend: SQLite rows plus in-process watcher fan-out.
//!
//! Every document is one JSON row keyed by `(collection, id)`. Writes notify
//! watchers while the store lock is still held, which is what gives the
//! per-document snapshot ordering the store contract promises.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::document::{Document, DocumentSnapshot};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::store::{DocumentStore, DocumentWatcher, QueryWatcher};

const SCHEMA_VERSION: i32 = 1;

/// Embedded replacement for the hosted document database.
///
/// Cloning is cheap; clones share the same underlying store.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    conn: Connection,
    doc_watchers: HashMap<(String, String), Vec<DocWatcherEntry>>,
    query_watchers: Vec<QueryWatcherEntry>,
    next_watcher_id: u64,
}

struct DocWatcherEntry {
    id: u64,
    tx: mpsc::UnboundedSender<DocumentSnapshot>,
}

struct QueryWatcherEntry {
    id: u64,
    query: Query,
    last: Vec<Document>,
    tx: mpsc::UnboundedSender<Vec<Document>>,
}

impl LocalStore {
    /// Open (or create) a store at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "opening document store");
        Self::from_connection(conn)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                doc_watchers: HashMap::new(),
                query_watchers: Vec::new(),
                next_watcher_id: 0,
            })),
        })
    }

    /// Number of live subscriptions. Diagnostic, e.g. to verify teardown.
    pub fn watcher_count(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => {
                inner.doc_watchers.values().map(Vec::len).sum::<usize>()
                    + inner.query_watchers.len()
            }
            Err(_) => 0,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                data       TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_collection
                ON documents(collection);",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

impl Inner {
    fn read(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM documents WHERE collection = ?1 AND id = ?2")?;
        let mut rows = stmt.query(params![collection, id])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    fn write(&mut self, collection: &str, id: &str, data: &Value) -> Result<()> {
        let raw = serde_json::to_string(data)?;
        self.conn.execute(
            "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
            params![collection, id, raw],
        )?;
        self.notify(collection, id, Some(data.clone()))
    }

    fn remove(&mut self, collection: &str, id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(affected > 0)
    }

    fn collection_docs(&self, collection: &str) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, data FROM documents WHERE collection = ?1")?;
        let rows = stmt.query_map(params![collection], |row| {
            let id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            Ok((id, raw))
        })?;
        let mut docs = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            docs.push(Document::new(id, serde_json::from_str::<Value>(&raw)?));
        }
        Ok(docs)
    }

    fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        let mut docs = self.collection_docs(&query.collection)?;
        docs.retain(|doc| query.matches(&doc.data));
        query.arrange(&mut docs);
        Ok(docs)
    }

    /// Fan one applied write (or delete) out to watchers. Runs under the
    /// store lock so snapshots leave in the order the writes landed.
    fn notify(&mut self, collection: &str, id: &str, data: Option<Value>) -> Result<()> {
        let key = (collection.to_string(), id.to_string());
        if let Some(entries) = self.doc_watchers.get_mut(&key) {
            entries.retain(|entry| {
                entry
                    .tx
                    .send(DocumentSnapshot {
                        id: id.to_string(),
                        data: data.clone(),
                    })
                    .is_ok()
            });
        }

        let mut updates = Vec::new();
        for (index, entry) in self.query_watchers.iter().enumerate() {
            if entry.query.collection == collection {
                updates.push((index, self.run_query(&entry.query)?));
            }
        }
        let mut dead = Vec::new();
        for (index, result) in updates {
            let entry = &mut self.query_watchers[index];
            if entry.last != result {
                entry.last = result.clone();
                if entry.tx.send(result).is_err() {
                    dead.push(entry.id);
                }
            }
        }
        if !dead.is_empty() {
            self.query_watchers.retain(|entry| !dead.contains(&entry.id));
        }
        Ok(())
    }

    fn remove_doc_watcher(&mut self, watcher_id: u64) {
        for entries in self.doc_watchers.values_mut() {
            entries.retain(|entry| entry.id != watcher_id);
        }
        self.doc_watchers.retain(|_, entries| !entries.is_empty());
    }

    fn remove_query_watcher(&mut self, watcher_id: u64) {
        self.query_watchers.retain(|entry| entry.id != watcher_id);
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.lock()?;
        Ok(inner.read(collection, id)?.map(|data| Document::new(id, data)))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let mut inner = self.lock()?;
        inner.write(collection, id, &data)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        let mut inner = self.lock()?;
        let mut data = inner.read(collection, id)?.ok_or(StoreError::NotFound)?;
        merge_fields(&mut data, fields);
        inner.write(collection, id, &data)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.remove(collection, id)? {
            inner.notify(collection, id, None)?;
        }
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let mut inner = self.lock()?;
        inner.write(collection, &id, &data)?;
        Ok(id)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let inner = self.lock()?;
        inner.run_query(query)
    }

    async fn watch_document(&self, collection: &str, id: &str) -> Result<DocumentWatcher> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;
        let initial = DocumentSnapshot {
            id: id.to_string(),
            data: inner.read(collection, id)?,
        };
        let _ = tx.send(initial);
        let watcher_id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        inner
            .doc_watchers
            .entry((collection.to_string(), id.to_string()))
            .or_default()
            .push(DocWatcherEntry { id: watcher_id, tx });
        drop(inner);
        debug!(collection, id, watcher_id, "document watch registered");

        let weak = Arc::downgrade(&self.inner);
        Ok(DocumentWatcher::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut guard) = inner.lock() {
                    guard.remove_doc_watcher(watcher_id);
                }
            }
        }))
    }

    async fn watch_query(&self, query: &Query) -> Result<QueryWatcher> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;
        let initial = inner.run_query(query)?;
        let _ = tx.send(initial.clone());
        let watcher_id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        inner.query_watchers.push(QueryWatcherEntry {
            id: watcher_id,
            query: query.clone(),
            last: initial,
            tx,
        });
        drop(inner);
        debug!(collection = %query.collection, watcher_id, "query watch registered");

        let weak = Arc::downgrade(&self.inner);
        Ok(QueryWatcher::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut guard) = inner.lock() {
                    guard.remove_query_watcher(watcher_id);
                }
            }
        }))
    }
}

fn merge_fields(data: &mut Value, fields: Value) {
    if let (Some(target), Value::Object(incoming)) = (data.as_object_mut(), fields) {
        for (key, value) in incoming {
            target.insert(key, value);
        }
    }
}
