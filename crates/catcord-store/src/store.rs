//! The document-store contract and subscription handles.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::{Document, DocumentSnapshot};
use crate::error::Result;
use crate::query::Query;

/// Contract of the hosted document database.
///
/// This is the seam between the application and whichever backend holds its
/// data. Two delivery guarantees carry the call-signaling core and every
/// live view, and every implementation must provide them:
///
/// - A subscription delivers an initial snapshot of the current state
///   immediately on registration.
/// - For any one document, snapshots arrive in the order the writes were
///   applied. Nothing is promised across documents.
///
/// Dropping a watcher cancels its subscription.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Create or fully replace a document under a caller-chosen id.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()>;

    /// Merge top-level fields into an existing document.
    ///
    /// Fails with `StoreError::NotFound` when the document is absent.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<()>;

    /// Delete a document. Deleting an absent document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Insert a document under a generated id and return that id.
    async fn add(&self, collection: &str, data: Value) -> Result<String>;

    /// Run a one-shot query.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Subscribe to a single document.
    async fn watch_document(&self, collection: &str, id: &str) -> Result<DocumentWatcher>;

    /// Subscribe to a query's full result set.
    async fn watch_query(&self, query: &Query) -> Result<QueryWatcher>;
}

/// Live snapshots of one document. Dropping the watcher cancels the
/// subscription.
pub struct DocumentWatcher {
    rx: mpsc::UnboundedReceiver<DocumentSnapshot>,
    _guard: WatchGuard,
}

impl DocumentWatcher {
    /// Build a watcher from a snapshot channel and a cancel hook. The hook
    /// runs exactly once, when the watcher is dropped.
    pub fn new(
        rx: mpsc::UnboundedReceiver<DocumentSnapshot>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            _guard: WatchGuard::new(cancel),
        }
    }

    /// Next snapshot; `None` once the backing store is gone.
    pub async fn next(&mut self) -> Option<DocumentSnapshot> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`DocumentWatcher::next`].
    pub fn try_next(&mut self) -> Option<DocumentSnapshot> {
        self.rx.try_recv().ok()
    }
}

/// Live result sets of one query. Dropping the watcher cancels the
/// subscription.
pub struct QueryWatcher {
    rx: mpsc::UnboundedReceiver<Vec<Document>>,
    _guard: WatchGuard,
}

impl QueryWatcher {
    /// Build a watcher from a result-set channel and a cancel hook.
    pub fn new(
        rx: mpsc::UnboundedReceiver<Vec<Document>>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            _guard: WatchGuard::new(cancel),
        }
    }

    /// Next result set; `None` once the backing store is gone.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`QueryWatcher::next`].
    pub fn try_next(&mut self) -> Option<Vec<Document>> {
        self.rx.try_recv().ok()
    }
}

struct WatchGuard(Option<Box<dyn FnOnce() + Send + Sync>>);

impl WatchGuard {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}
