use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::closure;
use crate::error::{TransportError, TransportResult};

/// Progress callback: `(transport name, objects processed)`.
pub type ProgressHandler = Arc<dyn Fn(&str, usize) + Send + Sync>;

/// Callback reporting the total child count of a copy once known.
pub type ChildrenCountHandler<'a> = &'a (dyn Fn(usize) + Send + Sync);

/// Ids copied per round in the default child-replication loop.
const COPY_BATCH_SIZE: usize = 500;

/// Passive, content-addressed key/value store.
///
/// Ids and payloads are opaque strings; no schema is enforced at this
/// layer. Entries are write-once by convention: `save_object` on an
/// existing id is a no-op for every backend, and the update/delete escape
/// hatches on concrete backends are administrative only.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name, used in errors and progress events.
    fn name(&self) -> &str;

    /// Enqueue an object for eventual persistence. Never blocks on
    /// completion; pair with [`write_complete`](Self::write_complete) to
    /// observe durability.
    fn save_object(&self, id: &str, payload: &str) -> TransportResult<()>;

    /// Copy one object from another store into this one.
    ///
    /// Fails with [`TransportError::SourceMissing`] (naming both
    /// transports) when the source does not hold `id`.
    async fn save_object_from(&self, id: &str, source: &dyn Transport) -> TransportResult<()> {
        let payload = source.get_object(id).await?;
        match payload {
            Some(payload) => self.save_object(id, &payload),
            None => Err(TransportError::SourceMissing {
                id: id.to_owned(),
                source: source.name().to_owned(),
                target: self.name().to_owned(),
            }),
        }
    }

    /// Fetch an object. `Ok(None)` means "not found" and is not an error.
    async fn get_object(&self, id: &str) -> TransportResult<Option<String>>;

    /// Existence check for a set of ids, used to avoid redundant transfer.
    /// Every requested id appears in the returned map.
    async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>>;

    /// Open a logical write batch: reset counters, start background senders.
    async fn begin_write(&self) -> TransportResult<()>;

    /// Close the logical write batch opened by [`begin_write`](Self::begin_write).
    async fn end_write(&self) -> TransportResult<()>;

    /// Resolves once the write queue is empty and nothing is mid-flush.
    async fn write_complete(&self) -> TransportResult<()>;

    /// Replicate `id` and its whole closure into `target`, transferring
    /// only the objects `target` is missing.
    ///
    /// Reads the root, parses its closure table, reports the total child
    /// count, diffs against `target` via [`has_objects`](Self::has_objects),
    /// copies missing children in batches, copies the root last, and awaits
    /// the target's flush. Returns the root payload.
    async fn copy_object_and_children(
        &self,
        id: &str,
        target: &dyn Transport,
        on_total_children_known: Option<ChildrenCountHandler<'_>>,
    ) -> TransportResult<String> {
        let root = self
            .get_object(id)
            .await?
            .ok_or_else(|| TransportError::NotFound {
                id: id.to_owned(),
                transport: self.name().to_owned(),
            })?;

        let children = closure::children_ids(&root);
        if let Some(on_known) = on_total_children_known {
            on_known(children.len());
        }

        let found = target.has_objects(&children).await?;
        let missing: Vec<String> = children
            .into_iter()
            .filter(|cid| !found.get(cid).copied().unwrap_or(false))
            .collect();

        tracing::debug!(
            root = id,
            missing = missing.len(),
            source = self.name(),
            target = target.name(),
            "replicating object closure"
        );

        target.begin_write().await?;
        for batch in missing.chunks(COPY_BATCH_SIZE) {
            for cid in batch {
                target.save_object_from(cid, self.as_transport()).await?;
            }
        }
        target.save_object(id, &root)?;
        target.write_complete().await?;
        target.end_write().await?;

        Ok(root)
    }

    /// Upcast helper so default methods can hand `self` across as a trait
    /// object.
    fn as_transport(&self) -> &dyn Transport;
}
