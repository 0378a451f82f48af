use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::traits::Transport;

/// In-memory, HashMap-based transport.
///
/// Intended for tests, inline-id computation, and embedding. Writes land
/// synchronously, so [`write_complete`](Transport::write_complete) always
/// resolves immediately. Reads and writes are guarded by an `RwLock`; the
/// store itself performs no cross-operation coordination, so concurrent
/// writers need external sequencing if they care about order.
pub struct MemoryTransport {
    name: String,
    objects: RwLock<HashMap<String, String>>,
    saved_count: AtomicUsize,
}

impl MemoryTransport {
    /// Create an empty in-memory transport named `"Memory"`.
    pub fn new() -> Self {
        Self::named("Memory")
    }

    /// Create an empty in-memory transport with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(HashMap::new()),
            saved_count: AtomicUsize::new(0),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Objects saved since the last write bracket.
    pub fn saved_object_count(&self) -> usize {
        self.saved_count.load(Ordering::Relaxed)
    }

    /// Remove all objects. Administrative hatch.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }

    /// Sorted list of all stored ids. Do not use for large collections.
    pub fn object_ids(&self) -> Vec<String> {
        let map = self.objects.read().expect("lock poisoned");
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn save_object(&self, id: &str, payload: &str) -> TransportResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        // Write-once: content-addressing guarantees identical payloads.
        map.entry(id.to_owned()).or_insert_with(|| payload.to_owned());
        self.saved_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_object(&self, id: &str) -> TransportResult<Option<String>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(ids
            .iter()
            .map(|id| (id.clone(), map.contains_key(id)))
            .collect())
    }

    async fn begin_write(&self) -> TransportResult<()> {
        self.saved_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn end_write(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn write_complete(&self) -> TransportResult<()> {
        // Saves are synchronous; there is never a pending queue.
        Ok(())
    }

    fn as_transport(&self) -> &dyn Transport {
        self
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.name)
            .field("object_count", &self.len())
            .finish()
    }
}
