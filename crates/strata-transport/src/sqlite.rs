use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::traits::{ProgressHandler, Transport};

/// Configuration for [`SqliteTransport`].
#[derive(Clone, Debug)]
pub struct SqliteTransportOptions {
    /// Transport name used in errors and progress events.
    pub name: String,
    /// Database file stem; the store lives at `<dir>/<scope>.db`.
    pub scope: String,
    /// Maximum rows written per flush transaction.
    pub max_transaction_size: usize,
    /// Poll interval of the background flush loop.
    pub poll_interval: Duration,
}

impl Default for SqliteTransportOptions {
    fn default() -> Self {
        Self {
            name: "SQLite".to_owned(),
            scope: "Data".to_owned(),
            max_transaction_size: 1000,
            poll_interval: Duration::from_millis(500),
        }
    }
}

struct SqliteInner {
    name: String,
    db_path: PathBuf,
    // Persistent connection for point reads and direct sync writes. Bulk
    // flushes open their own short-lived connections so they never block
    // point lookups.
    read_conn: Mutex<Connection>,
    queue: Mutex<VecDeque<(String, String)>>,
    is_flushing: AtomicBool,
    saved_count: AtomicUsize,
    flush_error: Mutex<Option<String>>,
    cancel: CancellationToken,
    on_progress: Mutex<Option<ProgressHandler>>,
    options: SqliteTransportOptions,
}

/// Batching durable transport backed by an embedded SQLite database.
///
/// Writes go to an unbounded in-memory queue; a background loop drains up
/// to [`SqliteTransportOptions::max_transaction_size`] rows per transaction
/// until the queue is empty. Durability is WAL-mode. Cancellation discards
/// the unflushed queue -- an explicit data-loss-on-cancel contract; await
/// [`write_complete`](Transport::write_complete) before relying on reads.
///
/// Must be constructed inside a Tokio runtime (the flush loop is a task).
pub struct SqliteTransport {
    inner: Arc<SqliteInner>,
}

impl SqliteTransport {
    /// Open (or create) a store at `<dir>/Data.db` with default options.
    pub fn new(dir: impl AsRef<Path>) -> TransportResult<Self> {
        Self::with_options(dir, SqliteTransportOptions::default())
    }

    pub fn with_options(
        dir: impl AsRef<Path>,
        options: SqliteTransportOptions,
    ) -> TransportResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let db_path = dir.as_ref().join(format!("{}.db", options.scope));

        let conn = Connection::open(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS objects(
                hash TEXT PRIMARY KEY,
                content TEXT
            ) WITHOUT ROWID",
            [],
        )?;
        // Insert optimisations: WAL for throughput, memory temp store.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA temp_store=MEMORY;")?;

        let inner = Arc::new(SqliteInner {
            name: options.name.clone(),
            db_path,
            read_conn: Mutex::new(conn),
            queue: Mutex::new(VecDeque::new()),
            is_flushing: AtomicBool::new(false),
            saved_count: AtomicUsize::new(0),
            flush_error: Mutex::new(None),
            cancel: CancellationToken::new(),
            on_progress: Mutex::new(None),
            options,
        });

        tokio::spawn(Self::flush_loop(Arc::clone(&inner)));
        Ok(Self { inner })
    }

    /// Install a progress callback: `(transport name, rows flushed)`.
    pub fn set_progress_handler(&self, handler: ProgressHandler) {
        *self.inner.on_progress.lock().expect("lock poisoned") = Some(handler);
    }

    /// Cancellation token observed by the flush loop and point operations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    async fn flush_loop(inner: Arc<SqliteInner>) {
        let mut ticker = tokio::time::interval(inner.options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    // Cancelled: the remaining queue is discarded, not flushed.
                    let dropped = {
                        let mut queue = inner.queue.lock().expect("lock poisoned");
                        let n = queue.len();
                        queue.clear();
                        n
                    };
                    if dropped > 0 {
                        warn!(transport = %inner.name, dropped, "cancelled with unflushed writes");
                    }
                    return;
                }
                _ = ticker.tick() => {
                    let queue_empty = inner.queue.lock().expect("lock poisoned").is_empty();
                    if !queue_empty && !inner.is_flushing.load(Ordering::Acquire) {
                        Self::consume_queue(&inner).await;
                    }
                }
            }
        }
    }

    /// Drain the queue in bounded transactions, looping until empty.
    async fn consume_queue(inner: &Arc<SqliteInner>) {
        inner.is_flushing.store(true, Ordering::Release);
        loop {
            if inner.cancel.is_cancelled() {
                inner.queue.lock().expect("lock poisoned").clear();
                break;
            }
            let batch: Vec<(String, String)> = {
                let mut queue = inner.queue.lock().expect("lock poisoned");
                let take = queue.len().min(inner.options.max_transaction_size);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            let db_path = inner.db_path.clone();
            let written = tokio::task::spawn_blocking(move || -> TransportResult<usize> {
                let mut conn = Connection::open(db_path)?;
                let tx = conn.transaction()?;
                for (id, payload) in &batch {
                    tx.execute(
                        "INSERT OR IGNORE INTO objects(hash, content) VALUES(?1, ?2)",
                        params![id, payload],
                    )?;
                }
                tx.commit()?;
                Ok(batch.len())
            })
            .await;

            match written {
                Ok(Ok(written)) => {
                    inner.saved_count.fetch_add(written, Ordering::Relaxed);
                    debug!(transport = %inner.name, written, "flushed batch");
                    if let Some(handler) = inner.on_progress.lock().expect("lock poisoned").as_ref()
                    {
                        handler(&inner.name, written);
                    }
                }
                Ok(Err(err)) => {
                    warn!(transport = %inner.name, error = %err, "flush failed");
                    *inner.flush_error.lock().expect("lock poisoned") = Some(err.to_string());
                    break;
                }
                Err(join_err) => {
                    *inner.flush_error.lock().expect("lock poisoned") = Some(join_err.to_string());
                    break;
                }
            }
        }
        inner.is_flushing.store(false, Ordering::Release);
    }

    /// Write one object directly, bypassing the queue.
    pub fn save_object_sync(&self, id: &str, payload: &str) -> TransportResult<()> {
        let conn = self.inner.read_conn.lock().expect("lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO objects(hash, content) VALUES(?1, ?2)",
            params![id, payload],
        )?;
        Ok(())
    }

    /// Replace an object's payload. Administrative escape hatch: rewriting
    /// a content-addressed entry can corrupt a store.
    pub fn update_object(&self, id: &str, payload: &str) -> TransportResult<()> {
        self.check_cancelled()?;
        let conn = self.inner.read_conn.lock().expect("lock poisoned");
        conn.execute(
            "REPLACE INTO objects(hash, content) VALUES(?1, ?2)",
            params![id, payload],
        )?;
        Ok(())
    }

    /// Delete an object. Administrative escape hatch; see [`Self::update_object`].
    pub fn delete_object(&self, id: &str) -> TransportResult<bool> {
        self.check_cancelled()?;
        let conn = self.inner.read_conn.lock().expect("lock poisoned");
        let affected = conn.execute("DELETE FROM objects WHERE hash = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> TransportResult<usize> {
        let conn = self.inner.read_conn.lock().expect("lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Rows flushed since the last write bracket.
    pub fn saved_object_count(&self) -> usize {
        self.inner.saved_count.load(Ordering::Relaxed)
    }

    fn check_cancelled(&self) -> TransportResult<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        Ok(())
    }

    fn take_flush_error(&self) -> Option<String> {
        self.inner.flush_error.lock().expect("lock poisoned").take()
    }
}

impl Drop for SqliteTransport {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

#[async_trait]
impl Transport for SqliteTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn save_object(&self, id: &str, payload: &str) -> TransportResult<()> {
        self.check_cancelled()?;
        self.inner
            .queue
            .lock()
            .expect("lock poisoned")
            .push_back((id.to_owned(), payload.to_owned()));
        Ok(())
    }

    async fn get_object(&self, id: &str) -> TransportResult<Option<String>> {
        self.check_cancelled()?;
        let conn = self.inner.read_conn.lock().expect("lock poisoned");
        let payload = conn
            .query_row(
                "SELECT content FROM objects WHERE hash = ?1 LIMIT 1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(payload)
    }

    async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>> {
        // Initialize with false so cancelled queries still report every id.
        let mut found: HashMap<String, bool> = ids.iter().map(|id| (id.clone(), false)).collect();

        let conn = Connection::open(&self.inner.db_path)?;
        for id in ids {
            self.check_cancelled()?;
            let present = conn
                .query_row(
                    "SELECT 1 FROM objects WHERE hash = ?1 LIMIT 1",
                    params![id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            found.insert(id.clone(), present);
        }
        Ok(found)
    }

    async fn begin_write(&self) -> TransportResult<()> {
        self.inner.saved_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn end_write(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn write_complete(&self) -> TransportResult<()> {
        loop {
            if let Some(detail) = self.take_flush_error() {
                return Err(TransportError::Failed {
                    transport: self.inner.name.clone(),
                    detail,
                });
            }
            if self.inner.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            let queue_empty = self.inner.queue.lock().expect("lock poisoned").is_empty();
            if queue_empty && !self.inner.is_flushing.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn as_transport(&self) -> &dyn Transport {
        self
    }
}

impl std::fmt::Debug for SqliteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransport")
            .field("name", &self.inner.name)
            .field("db_path", &self.inner.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> SqliteTransportOptions {
        SqliteTransportOptions {
            poll_interval: Duration::from_millis(10),
            ..SqliteTransportOptions::default()
        }
    }

    #[tokio::test]
    async fn queued_write_lands_after_write_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();

        store.save_object("aa", r#"{"a":1}"#).unwrap();
        store.write_complete().await.unwrap();

        assert_eq!(
            store.get_object("aa").await.unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();
        assert!(store.get_object("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_once_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();

        store.save_object("aa", "first").unwrap();
        store.write_complete().await.unwrap();
        store.save_object("aa", "second").unwrap();
        store.write_complete().await.unwrap();

        assert_eq!(store.get_object("aa").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn multi_batch_flush_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(
            dir.path(),
            SqliteTransportOptions {
                max_transaction_size: 4,
                poll_interval: Duration::from_millis(10),
                ..SqliteTransportOptions::default()
            },
        )
        .unwrap();

        for i in 0..11 {
            store.save_object(&format!("obj-{i}"), "payload").unwrap();
        }
        store.write_complete().await.unwrap();

        assert_eq!(store.object_count().unwrap(), 11);
        assert_eq!(store.saved_object_count(), 11);
    }

    #[tokio::test]
    async fn has_objects_reports_each_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();
        store.save_object("aa", "x").unwrap();
        store.write_complete().await.unwrap();

        let found = store
            .has_objects(&["aa".to_owned(), "bb".to_owned()])
            .await
            .unwrap();
        assert!(found["aa"]);
        assert!(!found["bb"]);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();
            store.save_object("aa", "durable").unwrap();
            store.write_complete().await.unwrap();
        }
        let reopened = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();
        assert_eq!(
            reopened.get_object("aa").await.unwrap().as_deref(),
            Some("durable")
        );
    }

    #[tokio::test]
    async fn sync_write_bypasses_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();
        store.save_object_sync("aa", "direct").unwrap();
        assert_eq!(store.get_object("aa").await.unwrap().as_deref(), Some("direct"));
    }

    #[tokio::test]
    async fn update_and_delete_escape_hatches() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();
        store.save_object_sync("aa", "v1").unwrap();

        store.update_object("aa", "v2").unwrap();
        assert_eq!(store.get_object("aa").await.unwrap().as_deref(), Some("v2"));

        assert!(store.delete_object("aa").unwrap());
        assert!(!store.delete_object("aa").unwrap());
        assert!(store.get_object("aa").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_discards_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(
            dir.path(),
            SqliteTransportOptions {
                poll_interval: Duration::from_secs(60),
                ..SqliteTransportOptions::default()
            },
        )
        .unwrap();

        store.save_object("aa", "doomed").unwrap();
        store.cancellation_token().cancel();

        let err = store.write_complete().await.expect_err("must cancel");
        assert!(matches!(err, TransportError::Cancelled));
        assert!(matches!(
            store.save_object("bb", "late"),
            Err(TransportError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn progress_handler_reports_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTransport::with_options(dir.path(), fast_options()).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = Arc::clone(&seen);
        store.set_progress_handler(Arc::new(move |_, n| {
            seen_in_handler.fetch_add(n, Ordering::Relaxed);
        }));

        for i in 0..5 {
            store.save_object(&format!("obj-{i}"), "x").unwrap();
        }
        store.write_complete().await.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 5);
    }
}
