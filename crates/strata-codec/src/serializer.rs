use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value as Json};
use strata_model::wire;
use strata_model::{hash, Record, Value};
use strata_registry::{dynamic_flags, resolve};
use strata_transport::{ProgressHandler, Transport};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SerializeError, SerializeResult};

/// Graph decomposer: walks a record tree, detaches and chunks flagged
/// properties into independently addressed records, and fans every persisted
/// record out to the configured write transports.
///
/// With no write transports configured the walk short-circuits: everything
/// stays inlined and nothing is persisted, which makes `serialize` a pure
/// id computation.
///
/// One instance serves one `serialize` call at a time (it keeps the
/// per-call ancestor state); instances are cheap, build one per operation.
pub struct Serializer {
    transports: Vec<Arc<dyn Transport>>,
    cancel: CancellationToken,
    on_progress: Option<ProgressHandler>,
    // closure tables of the records currently open in the walk, root first
    ancestors: Vec<BTreeMap<String, u32>>,
    serialized_count: usize,
}

impl Serializer {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self {
            transports,
            cancel: CancellationToken::new(),
            on_progress: None,
            ancestors: Vec::new(),
            serialized_count: 0,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressHandler) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Decompose `root` and persist every resulting record.
    ///
    /// Returns the root's id and its serialized document. Any transport
    /// failure or observed cancellation aborts the whole call.
    pub fn serialize(&mut self, root: &Record) -> SerializeResult<(String, String)> {
        self.ancestors.clear();
        self.serialized_count = 0;

        let (id, json, _) = self.encode_record(root)?;
        self.save_to_transports(&id, &json)?;
        debug!(
            root = %id,
            records = self.serialized_count,
            transports = self.transports.len(),
            "serialized record graph"
        );
        Ok((id, json))
    }

    /// Records encoded by the last `serialize` call.
    pub fn serialized_count(&self) -> usize {
        self.serialized_count
    }

    fn check_cancelled(&self) -> SerializeResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SerializeError::Cancelled);
        }
        Ok(())
    }

    fn detaching(&self) -> bool {
        !self.transports.is_empty()
    }

    /// Encode one record into its document: `(id, json, doc)`.
    ///
    /// The document carries the closure table (when non-empty) and the
    /// content hash as its last field; the hash covers everything but the
    /// `id` field itself.
    fn encode_record(&mut self, record: &Record) -> SerializeResult<(String, String, Json)> {
        self.check_cancelled()?;
        self.ancestors.push(BTreeMap::new());

        let descriptor = resolve(record.type_name());
        let mut doc = Map::new();
        doc.insert(
            wire::TYPE_DISCRIMINATOR.to_owned(),
            Json::String(record.type_name().to_owned()),
        );
        if let Some(app_id) = &record.application_id {
            doc.insert("applicationId".to_owned(), Json::String(app_id.clone()));
        }

        for (name, value) in record.entries() {
            if name.starts_with(wire::TRANSIENT_PREFIX) || name == wire::ID_FIELD {
                continue;
            }
            if value.is_null() {
                continue;
            }
            let flags = descriptor
                .spec(name)
                .map(|spec| spec.flags)
                .unwrap_or_else(|| dynamic_flags(name));

            let encoded = if self.detaching() && flags.chunkable {
                match value {
                    Value::List(items) => self.encode_chunked(name, items, flags.chunk_size)?,
                    // chunkable flag on a non-list degrades to plain detachment
                    other => self.encode_detached(name, other)?,
                }
            } else if self.detaching() && flags.detachable {
                self.encode_detached(name, value)?
            } else {
                self.encode_inline(name, value)?
            };
            doc.insert(name.to_owned(), encoded);
        }

        let closure = self.ancestors.pop().expect("ancestor stack underflow");
        if !closure.is_empty() {
            doc.insert(wire::CLOSURE_FIELD.to_owned(), serde_json::to_value(&closure)?);
        }

        let canonical = serde_json::to_string(&doc)?;
        let id = hash::object_id(&canonical);
        doc.insert(wire::ID_FIELD.to_owned(), Json::String(id.clone()));
        let json = serde_json::to_string(&doc)?;

        self.serialized_count += 1;
        if let Some(on_progress) = &self.on_progress {
            on_progress("serialize", self.serialized_count);
        }
        Ok((id, json, Json::Object(doc)))
    }

    /// Persist a nested record as its own object and hand back a reference
    /// token pointing at it.
    fn detach_record(&mut self, record: &Record) -> SerializeResult<Json> {
        let (id, json, _) = self.encode_record(record)?;
        self.save_to_transports(&id, &json)?;
        self.track_reference(&id);

        let mut token = Map::new();
        token.insert(
            wire::TYPE_DISCRIMINATOR.to_owned(),
            Json::String(wire::REFERENCE_TYPE.to_owned()),
        );
        token.insert(wire::REFERENCED_ID_FIELD.to_owned(), Json::String(id));
        Ok(Json::Object(token))
    }

    /// Detachable property: records become reference tokens; lists and maps
    /// detach their record elements and inline everything else.
    fn encode_detached(&mut self, prop: &str, value: &Value) -> SerializeResult<Json> {
        match value {
            Value::Record(record) => self.detach_record(record),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(match item {
                        Value::Record(record) => self.detach_record(record)?,
                        other => self.encode_inline(prop, other)?,
                    });
                }
                Ok(Json::Array(out))
            }
            Value::Map(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    let encoded = match item {
                        Value::Record(record) => self.detach_record(record)?,
                        other => self.encode_inline(prop, other)?,
                    };
                    out.insert(key.clone(), encoded);
                }
                Ok(Json::Object(out))
            }
            other => self.encode_inline(prop, other),
        }
    }

    /// Chunkable list: split into `ceil(len / chunk_size)` ordered chunk
    /// records, detach each, and replace the list with the reference tokens.
    fn encode_chunked(
        &mut self,
        prop: &str,
        items: &[Value],
        chunk_size: usize,
    ) -> SerializeResult<Json> {
        let chunk_size = chunk_size.max(1);
        debug!(
            prop,
            elements = items.len(),
            chunk_size,
            "chunking list property"
        );
        let mut refs = Vec::with_capacity(items.len().div_ceil(chunk_size));
        for group in items.chunks(chunk_size) {
            let chunk = Record::data_chunk(group.to_vec());
            refs.push(self.detach_record(&chunk)?);
        }
        Ok(Json::Array(refs))
    }

    /// Inline conversion. Nested records keep their own id and closure
    /// participation but are embedded, not persisted.
    fn encode_inline(&mut self, prop: &str, value: &Value) -> SerializeResult<Json> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::Number(Number::from(*n)),
            Value::Float(f) => Json::Number(Number::from_f64(*f).ok_or_else(|| {
                SerializeError::NonFiniteFloat {
                    prop: prop.to_owned(),
                }
            })?),
            Value::Text(s) => Json::String(s.clone()),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.encode_inline(prop, item)?);
                }
                Json::Array(out)
            }
            Value::Map(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    out.insert(key.clone(), self.encode_inline(prop, item)?);
                }
                Json::Object(out)
            }
            Value::Record(record) => {
                let (_, _, doc) = self.encode_record(record)?;
                doc
            }
        })
    }

    /// Note `id` as a descendant of every still-open ancestor, at the
    /// minimum depth seen so far.
    fn track_reference(&mut self, id: &str) {
        let open = self.ancestors.len();
        for (i, closure) in self.ancestors.iter_mut().enumerate() {
            let depth = (open - i) as u32;
            closure
                .entry(id.to_owned())
                .and_modify(|d| *d = (*d).min(depth))
                .or_insert(depth);
        }
    }

    fn save_to_transports(&self, id: &str, json: &str) -> SerializeResult<()> {
        for transport in &self.transports {
            self.check_cancelled()?;
            transport.save_object(id, json)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_transport::MemoryTransport;

    fn parse(json: &str) -> Json {
        serde_json::from_str(json).unwrap()
    }

    fn child(b: i64) -> Record {
        let mut rec = Record::base();
        rec.set("b", b).unwrap();
        rec
    }

    // ---- no transports: pure id computation ----

    #[test]
    fn without_transports_everything_inlines() {
        let mut root = Record::base();
        root.set("a", 1i64).unwrap();
        root.set("@child", child(2)).unwrap();

        let (id, json) = Serializer::new(vec![]).serialize(&root).unwrap();
        let doc = parse(&json);

        assert_eq!(doc["id"], Json::String(id));
        assert_eq!(doc["@child"]["b"], 2);
        assert!(doc["@child"]["id"].is_string());
        assert!(doc.get("__closure").is_none());
        assert!(!json.contains(wire::REFERENCE_TYPE));
    }

    #[test]
    fn serialization_is_deterministic() {
        let build = || {
            let mut root = Record::new("Widget");
            root.set("a", 1i64).unwrap();
            root.set("@child", child(2)).unwrap();
            root
        };
        let (id_a, json_a) = Serializer::new(vec![]).serialize(&build()).unwrap();
        let (id_b, json_b) = Serializer::new(vec![]).serialize(&build()).unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(json_a, json_b);
    }

    // ---- detachment ----

    #[test]
    fn detached_child_becomes_reference_with_closure_entry() {
        let transport = Arc::new(MemoryTransport::new());
        let mut root = Record::base();
        root.set("a", 1i64).unwrap();
        root.set("@child", child(2)).unwrap();

        let mut serializer = Serializer::new(vec![transport.clone()]);
        let (root_id, json) = serializer.serialize(&root).unwrap();
        let doc = parse(&json);

        let child_id = doc["@child"]["referencedId"].as_str().unwrap().to_owned();
        assert_eq!(doc["@child"][wire::TYPE_DISCRIMINATOR], wire::REFERENCE_TYPE);
        assert_eq!(doc["__closure"][&child_id], 1);

        assert_eq!(transport.len(), 2);
        assert!(transport.object_ids().contains(&root_id));
        assert!(transport.object_ids().contains(&child_id));
        assert_eq!(serializer.serialized_count(), 2);
    }

    #[test]
    fn transient_and_null_props_are_skipped() {
        let mut root = Record::base();
        root.set("kept", 1i64).unwrap();
        root.set("__scratch", 2i64).unwrap();
        root.set("gone", Value::Null).unwrap();

        let (_, json) = Serializer::new(vec![]).serialize(&root).unwrap();
        let doc = parse(&json);
        assert_eq!(doc["kept"], 1);
        assert!(doc.get("__scratch").is_none());
        assert!(doc.get("gone").is_none());
    }

    #[test]
    fn shared_descendant_keeps_minimum_depth() {
        let transport = Arc::new(MemoryTransport::new());

        let mut shared = Record::base();
        shared.set("c", 1i64).unwrap();

        let mut middle = Record::base();
        middle.set("@deep", shared.clone()).unwrap();

        let mut root = Record::base();
        root.set("@a", middle).unwrap();
        root.set("@b", shared).unwrap();

        let (_, json) = Serializer::new(vec![transport.clone()])
            .serialize(&root)
            .unwrap();
        let doc = parse(&json);

        let shared_id = doc["@b"]["referencedId"].as_str().unwrap();
        let middle_id = doc["@a"]["referencedId"].as_str().unwrap();
        // reachable at depth 2 through @a and depth 1 through @b
        assert_eq!(doc["__closure"][shared_id], 1);
        assert_eq!(doc["__closure"][middle_id], 1);
        // root + middle + shared: the shared record is stored once
        assert_eq!(transport.len(), 3);
    }

    // ---- chunking ----

    #[tokio::test]
    async fn chunkable_list_splits_by_ceiling() {
        let transport = Arc::new(MemoryTransport::new());
        let mut root = Record::base();
        root.set("@(2)nums", vec![1i64, 2, 3, 4, 5]).unwrap();

        let (_, json) = Serializer::new(vec![transport.clone()])
            .serialize(&root)
            .unwrap();
        let doc = parse(&json);

        let refs = doc["@(2)nums"].as_array().unwrap();
        assert_eq!(refs.len(), 3);
        for token in refs {
            assert_eq!(token[wire::TYPE_DISCRIMINATOR], wire::REFERENCE_TYPE);
            let chunk_id = token["referencedId"].as_str().unwrap();
            let payload = transport.get_object(chunk_id).await.unwrap().unwrap();
            let chunk = parse(&payload);
            assert_eq!(chunk[wire::TYPE_DISCRIMINATOR], wire::CHUNK_TYPE);
        }
        // 3 chunks + root
        assert_eq!(transport.len(), 4);
    }

    // ---- failure policy ----

    #[test]
    fn cancelled_token_aborts_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut root = Record::base();
        root.set("a", 1i64).unwrap();

        let err = Serializer::new(vec![Arc::new(MemoryTransport::new())])
            .with_cancellation(cancel)
            .serialize(&root)
            .unwrap_err();
        assert!(matches!(err, SerializeError::Cancelled));
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let mut root = Record::base();
        root.set("bad", f64::NAN).unwrap();

        let err = Serializer::new(vec![]).serialize(&root).unwrap_err();
        assert!(matches!(err, SerializeError::NonFiniteFloat { prop } if prop == "bad"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,12}".prop_map(Value::Text),
        ]
    }

    proptest! {
        #[test]
        fn ids_are_deterministic_and_well_formed(
            props in proptest::collection::vec(("[a-z]{1,8}", scalar()), 1..8)
        ) {
            let mut root = Record::base();
            for (name, value) in &props {
                root.set(name.clone(), value.clone()).unwrap();
            }
            let (id_a, json_a) = Serializer::new(vec![]).serialize(&root).unwrap();
            let (id_b, json_b) = Serializer::new(vec![]).serialize(&root).unwrap();
            prop_assert_eq!(&id_a, &id_b);
            prop_assert_eq!(json_a, json_b);
            prop_assert!(strata_model::hash::is_object_id(&id_a));
        }
    }
}
