use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde_json::Value as Json;
use strata_model::wire;
use strata_model::{Record, Value};
use strata_registry::resolve;
use strata_transport::{ProgressHandler, Transport};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DeserializeError, DeserializeResult};
use crate::pool::{default_worker_count, TaskReceiver, WorkerPool};

/// Graph reconstructor: parses a root document, prefetches and decodes its
/// closure through a bounded worker pool, and rebuilds the record tree with
/// every reference token resolved.
///
/// One instance processes one root document at a time; re-entrant calls are
/// rejected with [`DeserializeError::Busy`].
pub struct Deserializer {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    worker_count: usize,
    on_progress: Option<ProgressHandler>,
    busy: AtomicBool,
}

/// Shared state of one `deserialize` call.
struct DecodeState {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    pool: WorkerPool,
    slots: Mutex<HashMap<String, Slot>>,
    on_progress: Option<ProgressHandler>,
    decoded_count: AtomicUsize,
}

/// One entry of the shared id -> value map.
#[derive(Clone)]
enum Slot {
    Resolved(Value),
    /// A pooled (or cold-path) decode owns this id; await its channel.
    Pending(TaskReceiver),
}

/// What `resolve_reference` found (or claimed) under the slot lock.
enum Claim {
    Existing(Slot),
    /// The id was unclaimed; the caller decodes it and publishes here.
    Ours(watch::Sender<Option<crate::pool::TaskOutcome>>),
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Deserializer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cancel: CancellationToken::new(),
            worker_count: default_worker_count(),
            on_progress: None,
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressHandler) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Reconstruct the record graph rooted at `root_json`.
    ///
    /// Closure entries are prefetched deepest-first and decoded through the
    /// worker pool; the root itself always decodes on the calling task. Any
    /// closure id missing from the read transport fails the call.
    pub async fn deserialize(&self, root_json: &str) -> DeserializeResult<Record> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DeserializeError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let state = Arc::new(DecodeState {
            transport: Arc::clone(&self.transport),
            cancel: self.cancel.clone(),
            pool: WorkerPool::new(self.worker_count),
            slots: Mutex::new(HashMap::new()),
            on_progress: self.on_progress.clone(),
            decoded_count: AtomicUsize::new(0),
        });

        let result = run(&state, root_json).await;
        // The pool never outlives its document, success or not.
        state.pool.shutdown().await;
        result
    }
}

async fn run(state: &Arc<DecodeState>, root_json: &str) -> DeserializeResult<Record> {
    let mut closure = closure_entries(root_json);
    // deepest first: leaves tend to be ready when their parents need them
    closure.sort_by(|a, b| b.1.cmp(&a.1));
    debug!(
        closure = closure.len(),
        workers = state.pool.capacity(),
        "deserializing record graph"
    );

    for (id, _) in closure {
        if state.cancel.is_cancelled() {
            return Err(DeserializeError::Cancelled);
        }
        let payload = state.transport.get_object(&id).await?.ok_or_else(|| {
            DeserializeError::ObjectMissing {
                id: id.clone(),
                transport: state.transport.name().to_owned(),
            }
        })?;

        let slot = {
            let task_state = Arc::clone(state);
            let task_payload = payload.clone();
            state
                .pool
                .try_submit(async move { decode_document(task_state, task_payload).await })
        };
        match slot {
            Some(rx) => {
                state
                    .slots
                    .lock()
                    .expect("lock poisoned")
                    .insert(id, Slot::Pending(rx));
            }
            // pool saturated: decode inline on this task
            None => {
                let value = decode_document(Arc::clone(state), payload).await?;
                state
                    .slots
                    .lock()
                    .expect("lock poisoned")
                    .insert(id, Slot::Resolved(value));
            }
        }
    }

    let root = decode_document(Arc::clone(state), root_json.to_owned()).await?;
    match root {
        Value::Record(record) => Ok(*record),
        _ => Err(DeserializeError::InvalidDocument(
            "root document is not a record".to_owned(),
        )),
    }
}

/// Closure table of a serialized document, as `(id, depth)` pairs.
///
/// Tolerant: an unparseable document or absent table yields an empty list;
/// the root decode itself reports the real parse error.
fn closure_entries(json: &str) -> Vec<(String, i64)> {
    let Ok(doc) = serde_json::from_str::<Json>(json) else {
        return Vec::new();
    };
    let Some(closure) = doc.get(wire::CLOSURE_FIELD).and_then(Json::as_object) else {
        return Vec::new();
    };
    closure
        .iter()
        .map(|(id, depth)| (id.clone(), depth.as_i64().unwrap_or(0)))
        .collect()
}

async fn decode_document(state: Arc<DecodeState>, payload: String) -> DeserializeResult<Value> {
    if state.cancel.is_cancelled() {
        return Err(DeserializeError::Cancelled);
    }
    let doc: Json = serde_json::from_str(&payload)?;
    let value = convert(state.clone(), doc).await?;

    let decoded = state.decoded_count.fetch_add(1, Ordering::Relaxed) + 1;
    if let Some(on_progress) = &state.on_progress {
        on_progress("deserialize", decoded);
    }
    Ok(value)
}

/// Recursive JSON -> [`Value`] conversion. Boxed: reference resolution can
/// re-enter through the cold path at arbitrary depth.
fn convert(
    state: Arc<DecodeState>,
    doc: Json,
) -> Pin<Box<dyn Future<Output = DeserializeResult<Value>> + Send>> {
    Box::pin(async move {
        match doc {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => {
                // lossless integers stay integral
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(DeserializeError::InvalidDocument(format!(
                        "unrepresentable number {n}"
                    )))
                }
            }
            Json::String(s) => Ok(Value::Text(s)),
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let value = convert(state.clone(), item).await?;
                    match value {
                        // chunk boundaries are invisible to the caller
                        Value::Record(record) if record.is_chunk() => {
                            let mut record = *record;
                            match record.remove(wire::CHUNK_DATA_FIELD) {
                                Some(Value::List(data)) => out.extend(data),
                                _ => {
                                    return Err(DeserializeError::InvalidDocument(
                                        "chunk record without a list under `data`".to_owned(),
                                    ))
                                }
                            }
                        }
                        value => out.push(value),
                    }
                }
                Ok(Value::List(out))
            }
            Json::Object(map) => {
                match map.get(wire::TYPE_DISCRIMINATOR).and_then(Json::as_str) {
                    Some(wire::REFERENCE_TYPE) => {
                        let id = map
                            .get(wire::REFERENCED_ID_FIELD)
                            .and_then(Json::as_str)
                            .ok_or_else(|| {
                                DeserializeError::InvalidDocument(
                                    "reference token without referencedId".to_owned(),
                                )
                            })?
                            .to_owned();
                        resolve_reference(state, id).await
                    }
                    Some(type_name) => {
                        let type_name = type_name.to_owned();
                        let closure_len = map
                            .get(wire::CLOSURE_FIELD)
                            .and_then(Json::as_object)
                            .map(|c| c.len())
                            .unwrap_or(0);
                        let mut props = IndexMap::with_capacity(map.len());
                        for (name, value) in map {
                            if name == wire::TYPE_DISCRIMINATOR || name == wire::CLOSURE_FIELD {
                                continue;
                            }
                            props.insert(name, convert(state.clone(), value).await?);
                        }
                        into_record(type_name, props, closure_len)
                    }
                    // no discriminator: a plain string-keyed map
                    None => {
                        let mut out = IndexMap::with_capacity(map.len());
                        for (name, value) in map {
                            out.insert(name, convert(state.clone(), value).await?);
                        }
                        Ok(Value::Map(out))
                    }
                }
            }
        }
    })
}

/// Assemble a decoded property bag into a [`Record`] via the registry:
/// case-insensitive typed-property matching with shape checks, everything
/// else into the dynamic bag, then post-decode hooks.
fn into_record(
    type_name: String,
    mut props: IndexMap<String, Value>,
    closure_len: usize,
) -> DeserializeResult<Value> {
    let id = match props.shift_remove(wire::ID_FIELD) {
        Some(Value::Text(id)) => Some(id),
        _ => None,
    };
    let application_id = match props.shift_remove("applicationId") {
        Some(Value::Text(app)) => Some(app),
        _ => None,
    };

    let descriptor = resolve(&type_name);
    let mut record = Record::new(type_name);
    for (name, value) in props {
        match descriptor.spec_ci(&name) {
            Some(spec) => {
                if let Some(expected) = spec.expected {
                    if !value.matches_kind(expected) {
                        return Err(DeserializeError::TypeMismatch {
                            type_name: record.type_name().to_owned(),
                            prop: spec.name.clone(),
                            expected: format!("{expected:?}"),
                            found: value
                                .kind()
                                .map_or_else(|| "Null".to_owned(), |k| format!("{k:?}")),
                        });
                    }
                }
                // canonical declared casing, not the wire casing
                record.set_raw(spec.name.clone(), value);
            }
            None => record.set_raw(name, value),
        }
    }

    record.id = id;
    record.application_id = application_id;
    record.total_children_count = closure_len as u64;
    for hook in descriptor.post_decode_hooks() {
        hook(&mut record);
    }
    Ok(Value::Record(Box::new(record)))
}

/// Resolve a reference token through the shared slot map.
///
/// A pending slot is awaited and memoized; an unclaimed id is claimed under
/// the lock (so concurrent resolvers of the same id await instead of
/// double-decoding) and fetched on demand -- the cold path for references
/// absent from the closure table.
async fn resolve_reference(state: Arc<DecodeState>, id: String) -> DeserializeResult<Value> {
    let claim = {
        let mut slots = state.slots.lock().expect("lock poisoned");
        match slots.get(&id) {
            Some(slot) => Claim::Existing(slot.clone()),
            None => {
                let (tx, rx) = watch::channel(None);
                slots.insert(id.clone(), Slot::Pending(rx));
                Claim::Ours(tx)
            }
        }
    };

    match claim {
        Claim::Existing(Slot::Resolved(value)) => Ok(value),
        Claim::Existing(Slot::Pending(mut rx)) => {
            let outcome = rx
                .wait_for(|outcome| outcome.is_some())
                .await
                .map_err(|_| {
                    DeserializeError::WorkerLost(format!("result channel for {id} closed"))
                })?
                .clone()
                .ok_or_else(|| {
                    DeserializeError::WorkerLost(format!("empty result for {id}"))
                })?;
            match outcome {
                Ok(value) => {
                    state
                        .slots
                        .lock()
                        .expect("lock poisoned")
                        .insert(id, Slot::Resolved(value.clone()));
                    Ok(value)
                }
                Err(shared) => Err(DeserializeError::Shared(shared)),
            }
        }
        Claim::Ours(tx) => {
            debug!(id = %id, "cold-path reference fetch");
            match fetch_and_decode(&state, &id).await {
                Ok(value) => {
                    let _ = tx.send(Some(Ok(value.clone())));
                    state
                        .slots
                        .lock()
                        .expect("lock poisoned")
                        .insert(id, Slot::Resolved(value.clone()));
                    Ok(value)
                }
                Err(err) => {
                    let shared = Arc::new(err);
                    let _ = tx.send(Some(Err(Arc::clone(&shared))));
                    Err(DeserializeError::Shared(shared))
                }
            }
        }
    }
}

async fn fetch_and_decode(state: &Arc<DecodeState>, id: &str) -> DeserializeResult<Value> {
    let payload = state.transport.get_object(id).await?.ok_or_else(|| {
        DeserializeError::ObjectMissing {
            id: id.to_owned(),
            transport: state.transport.name().to_owned(),
        }
    })?;
    decode_document(Arc::clone(state), payload).await
}
