use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::closure;
use crate::error::{TransportError, TransportResult};
use crate::traits::{ChildrenCountHandler, ProgressHandler, Transport};

/// Minimal server surface the remote transport is written against.
///
/// The HTTP implementation lives in [`crate::http`]; tests substitute an
/// in-process fake. All operations are batch-shaped so the server can diff
/// and transfer efficiently.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Download a single object; `None` if the server does not hold it.
    async fn download_object(&self, id: &str) -> TransportResult<Option<String>>;

    /// Download many objects; ids absent on the server are skipped.
    async fn download_objects(&self, ids: &[String]) -> TransportResult<Vec<(String, String)>>;

    /// Server-side existence check.
    async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>>;

    /// Upload a set of objects the server is known to be missing.
    async fn upload_objects(&self, objects: &[(String, String)]) -> TransportResult<()>;
}

struct SenderState {
    name: String,
    buffer: Mutex<Vec<(String, String)>>,
    is_write_complete: AtomicBool,
    should_run: AtomicBool,
    error: Mutex<Option<String>>,
    saved_count: AtomicUsize,
    cancel: CancellationToken,
    on_progress: Mutex<Option<ProgressHandler>>,
}

impl SenderState {
    fn poisoned(&self) -> bool {
        self.error.lock().expect("lock poisoned").is_some()
    }

    fn poison(&self, detail: String) {
        warn!(transport = %self.name, error = %detail, "remote send failed");
        self.buffer.lock().expect("lock poisoned").clear();
        *self.error.lock().expect("lock poisoned") = Some(detail);
    }

    fn progress(&self, n: usize) {
        if n == 0 {
            return;
        }
        if let Some(handler) = self.on_progress.lock().expect("lock poisoned").as_ref() {
            handler(&self.name, n);
        }
    }
}

/// Batching remote transport.
///
/// Saves accumulate in a send buffer; a sender task (running between
/// `begin_write` and `end_write`) drains the buffer, asks the server which
/// of those objects it is missing, and uploads only those. The first error
/// poisons the transport: later saves are dropped and
/// [`write_complete`](Transport::write_complete) surfaces the failure.
pub struct ServerTransport {
    api: Arc<dyn ServerApi>,
    state: Arc<SenderState>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl ServerTransport {
    pub fn new(api: Arc<dyn ServerApi>) -> Self {
        Self::named(api, "Remote")
    }

    pub fn named(api: Arc<dyn ServerApi>, name: impl Into<String>) -> Self {
        Self {
            api,
            state: Arc::new(SenderState {
                name: name.into(),
                buffer: Mutex::new(Vec::new()),
                is_write_complete: AtomicBool::new(true),
                should_run: AtomicBool::new(false),
                error: Mutex::new(None),
                saved_count: AtomicUsize::new(0),
                cancel: CancellationToken::new(),
                on_progress: Mutex::new(None),
            }),
            sender: Mutex::new(None),
        }
    }

    /// Install a progress callback: `(transport name, objects accounted)`.
    pub fn set_progress_handler(&self, handler: ProgressHandler) {
        *self.state.on_progress.lock().expect("lock poisoned") = Some(handler);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    /// Objects uploaded since the last write bracket.
    pub fn saved_object_count(&self) -> usize {
        self.state.saved_count.load(Ordering::Relaxed)
    }

    async fn sender_loop(api: Arc<dyn ServerApi>, state: Arc<SenderState>) {
        loop {
            if !state.should_run.load(Ordering::Acquire) || state.cancel.is_cancelled() {
                return;
            }

            // The guard must be out of scope before any await so the
            // spawned future stays `Send`.
            let drained: Option<Vec<(String, String)>> = {
                let mut locked = state.buffer.lock().expect("lock poisoned");
                if locked.is_empty() {
                    state.is_write_complete.store(true, Ordering::Release);
                    None
                } else {
                    Some(std::mem::take(&mut *locked))
                }
            };
            let buffer = match drained {
                Some(buffer) => buffer,
                None => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let ids: Vec<String> = buffer.iter().map(|(id, _)| id.clone()).collect();
            let result: TransportResult<()> = async {
                let present = api.has_objects(&ids).await?;
                let missing: Vec<(String, String)> = buffer
                    .into_iter()
                    .filter(|(id, _)| !present.get(id).copied().unwrap_or(false))
                    .collect();

                // Account for objects the server already had.
                state.progress(ids.len() - missing.len());

                if !missing.is_empty() {
                    api.upload_objects(&missing).await?;
                    state.saved_count.fetch_add(missing.len(), Ordering::Relaxed);
                    state.progress(missing.len());
                }
                Ok(())
            }
            .await;

            if let Err(err) = result {
                state.poison(err.to_string());
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for ServerTransport {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn save_object(&self, id: &str, payload: &str) -> TransportResult<()> {
        if self.state.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        // A poisoned transport drops saves; the error surfaces on
        // write_complete, mirroring the queue's asynchronous contract.
        if self.state.poisoned() {
            return Ok(());
        }
        self.state
            .buffer
            .lock()
            .expect("lock poisoned")
            .push((id.to_owned(), payload.to_owned()));
        self.state.is_write_complete.store(false, Ordering::Release);
        Ok(())
    }

    async fn get_object(&self, id: &str) -> TransportResult<Option<String>> {
        if self.state.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.api.download_object(id).await
    }

    async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>> {
        self.api.has_objects(ids).await
    }

    async fn begin_write(&self) -> TransportResult<()> {
        let mut sender = self.sender.lock().expect("lock poisoned");
        if sender.is_some() {
            return Err(TransportError::AlreadyWriting {
                transport: self.state.name.clone(),
            });
        }
        *self.state.error.lock().expect("lock poisoned") = None;
        self.state.saved_count.store(0, Ordering::Relaxed);
        self.state.should_run.store(true, Ordering::Release);
        *sender = Some(tokio::spawn(Self::sender_loop(
            Arc::clone(&self.api),
            Arc::clone(&self.state),
        )));
        Ok(())
    }

    async fn end_write(&self) -> TransportResult<()> {
        self.state.should_run.store(false, Ordering::Release);
        let handle = self.sender.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn write_complete(&self) -> TransportResult<()> {
        loop {
            if self.state.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            if let Some(detail) = self.state.error.lock().expect("lock poisoned").clone() {
                return Err(TransportError::Failed {
                    transport: self.state.name.clone(),
                    detail,
                });
            }
            if self.state.is_write_complete.load(Ordering::Acquire) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Batched download override: fetches all missing children with one
    /// server round per batch instead of one `get_object` per child.
    async fn copy_object_and_children(
        &self,
        id: &str,
        target: &dyn Transport,
        on_total_children_known: Option<ChildrenCountHandler<'_>>,
    ) -> TransportResult<String> {
        if self.state.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let root = self
            .api
            .download_object(id)
            .await?
            .ok_or_else(|| TransportError::NotFound {
                id: id.to_owned(),
                transport: self.state.name.clone(),
            })?;

        let children = closure::children_ids(&root);
        if let Some(on_known) = on_total_children_known {
            on_known(children.len());
        }

        let present = target.has_objects(&children).await?;
        let missing: Vec<String> = children
            .into_iter()
            .filter(|cid| !present.get(cid).copied().unwrap_or(false))
            .collect();
        debug!(root = id, missing = missing.len(), "downloading object closure");

        target.begin_write().await?;
        for (child_id, payload) in self.api.download_objects(&missing).await? {
            if self.state.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            target.save_object(&child_id, &payload)?;
            self.state.progress(1);
        }
        target.save_object(id, &root)?;
        target.write_complete().await?;
        target.end_write().await?;

        Ok(root)
    }

    fn as_transport(&self) -> &dyn Transport {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use std::sync::atomic::AtomicUsize;

    /// In-process fake server with upload accounting.
    #[derive(Default)]
    struct FakeServer {
        objects: Mutex<HashMap<String, String>>,
        uploaded: AtomicUsize,
        fail_uploads: AtomicBool,
    }

    impl FakeServer {
        fn seed(&self, id: &str, payload: &str) {
            self.objects
                .lock()
                .expect("lock poisoned")
                .insert(id.to_owned(), payload.to_owned());
        }
    }

    #[async_trait]
    impl ServerApi for FakeServer {
        async fn download_object(&self, id: &str) -> TransportResult<Option<String>> {
            Ok(self.objects.lock().expect("lock poisoned").get(id).cloned())
        }

        async fn download_objects(
            &self,
            ids: &[String],
        ) -> TransportResult<Vec<(String, String)>> {
            let objects = self.objects.lock().expect("lock poisoned");
            Ok(ids
                .iter()
                .filter_map(|id| objects.get(id).map(|p| (id.clone(), p.clone())))
                .collect())
        }

        async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>> {
            let objects = self.objects.lock().expect("lock poisoned");
            Ok(ids
                .iter()
                .map(|id| (id.clone(), objects.contains_key(id)))
                .collect())
        }

        async fn upload_objects(&self, batch: &[(String, String)]) -> TransportResult<()> {
            if self.fail_uploads.load(Ordering::Relaxed) {
                return Err(TransportError::Failed {
                    transport: "FakeServer".to_owned(),
                    detail: "upload rejected".to_owned(),
                });
            }
            let mut objects = self.objects.lock().expect("lock poisoned");
            for (id, payload) in batch {
                objects.entry(id.clone()).or_insert_with(|| payload.clone());
            }
            self.uploaded.fetch_add(batch.len(), Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn uploads_only_missing_objects() {
        let server = Arc::new(FakeServer::default());
        server.seed("already-there", "x");

        let transport = ServerTransport::new(Arc::clone(&server) as Arc<dyn ServerApi>);
        transport.begin_write().await.unwrap();
        transport.save_object("already-there", "x").unwrap();
        transport.save_object("new-one", "y").unwrap();
        transport.write_complete().await.unwrap();
        transport.end_write().await.unwrap();

        assert_eq!(server.uploaded.load(Ordering::Relaxed), 1);
        assert_eq!(transport.saved_object_count(), 1);
    }

    #[tokio::test]
    async fn first_error_poisons_the_batch() {
        let server = Arc::new(FakeServer::default());
        server.fail_uploads.store(true, Ordering::Relaxed);

        let transport = ServerTransport::new(Arc::clone(&server) as Arc<dyn ServerApi>);
        transport.begin_write().await.unwrap();
        transport.save_object("aa", "x").unwrap();

        let err = transport.write_complete().await.expect_err("must poison");
        assert!(matches!(err, TransportError::Failed { .. }));

        // Later saves are dropped silently; the error is already surfaced.
        transport.save_object("bb", "y").unwrap();
        transport.end_write().await.unwrap();
        assert_eq!(server.uploaded.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn double_begin_write_is_rejected() {
        let server = Arc::new(FakeServer::default());
        let transport = ServerTransport::new(server as Arc<dyn ServerApi>);
        transport.begin_write().await.unwrap();
        let err = transport.begin_write().await.expect_err("already writing");
        assert!(matches!(err, TransportError::AlreadyWriting { .. }));
        transport.end_write().await.unwrap();
    }

    #[tokio::test]
    async fn copy_object_and_children_downloads_diffed_closure() {
        let server = Arc::new(FakeServer::default());
        server.seed("child1", r#"{"b":2}"#);
        server.seed("child2", r#"{"c":3}"#);
        let root = r#"{"a":1,"__closure":{"child1":1,"child2":1},"id":"root"}"#;
        server.seed("root", root);

        let transport = ServerTransport::new(server as Arc<dyn ServerApi>);
        let local = MemoryTransport::new();
        // child2 already present locally: only child1 + root transfer
        local.save_object("child2", r#"{"c":3}"#).unwrap();

        let returned = transport
            .copy_object_and_children("root", &local, None)
            .await
            .unwrap();
        assert_eq!(returned, root);
        assert_eq!(local.saved_object_count(), 2);
        assert_eq!(local.len(), 3);
    }

    #[tokio::test]
    async fn second_copy_transfers_nothing_but_root() {
        let server = Arc::new(FakeServer::default());
        server.seed("child1", r#"{"b":2}"#);
        let root = r#"{"a":1,"__closure":{"child1":1},"id":"root"}"#;
        server.seed("root", root);

        let transport = ServerTransport::new(server as Arc<dyn ServerApi>);
        let local = MemoryTransport::new();

        transport
            .copy_object_and_children("root", &local, None)
            .await
            .unwrap();
        transport
            .copy_object_and_children("root", &local, None)
            .await
            .unwrap();

        assert_eq!(local.saved_object_count(), 1);
    }

    #[tokio::test]
    async fn copy_missing_root_is_not_found() {
        let server = Arc::new(FakeServer::default());
        let transport = ServerTransport::new(server as Arc<dyn ServerApi>);
        let local = MemoryTransport::new();

        let err = transport
            .copy_object_and_children("ghost", &local, None)
            .await
            .expect_err("missing root");
        assert!(matches!(err, TransportError::NotFound { .. }));
    }
}
