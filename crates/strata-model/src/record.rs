use indexmap::IndexMap;

use crate::error::{ModelError, ModelResult};
use crate::value::Value;
use crate::wire;

/// A typed, content-hashed unit of a decomposed object graph.
///
/// A record is a type discriminator plus an ordered property bag. Typed
/// fields (described by the registry) and ad hoc dynamic fields live in the
/// same bag and are enumerated uniformly; what distinguishes them is the
/// per-type metadata the registry holds, not the record itself.
///
/// The `id` is populated by serialization (it is the hash of the record's
/// canonical JSON) or by deserialization from storage. It is `None` for
/// records built in memory that were never encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    type_name: String,
    props: IndexMap<String, Value>,
    /// Content hash; set by the codec, never by callers.
    pub id: Option<String>,
    /// Secondary, host-application-driven identifier.
    pub application_id: Option<String>,
    /// Populated when the record was read back from storage.
    pub total_children_count: u64,
}

impl Record {
    /// Generic base discriminator, used when no concrete type applies.
    pub const BASE_TYPE: &'static str = "Base";

    /// Create an empty record with the given type discriminator.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            props: IndexMap::new(),
            id: None,
            application_id: None,
            total_children_count: 0,
        }
    }

    /// Create an untyped record (generic base).
    pub fn base() -> Self {
        Self::new(Self::BASE_TYPE)
    }

    /// Create a data chunk record wrapping `values`.
    ///
    /// Chunks are an encoding artifact: they never survive reconstruction,
    /// their `data` is spliced back into the owning list on decode.
    pub fn data_chunk(values: Vec<Value>) -> Self {
        let mut chunk = Self::new(wire::CHUNK_TYPE);
        chunk
            .props
            .insert(wire::CHUNK_DATA_FIELD.to_owned(), Value::List(values));
        chunk
    }

    /// The record's type discriminator.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns `true` if this record is a data chunk.
    pub fn is_chunk(&self) -> bool {
        self.type_name == wire::CHUNK_TYPE
    }

    /// Set a property, validating the name.
    ///
    /// Names containing `.` or `/` are rejected: both collide with the
    /// path syntax used by downstream consumers of decomposed graphs.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> ModelResult<()> {
        let name = name.into();
        validate_prop_name(&name)?;
        self.props.insert(name, value.into());
        Ok(())
    }

    /// Set a property without name validation. For codec-internal use where
    /// names were already accepted on the wire.
    pub fn set_raw(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(name.into(), value.into());
    }

    /// Get a property by exact name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Remove a property, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.props.shift_remove(name)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Uniform, ordered enumeration over all properties, typed and dynamic.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Property names, in insertion order.
    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(String::as_str)
    }
}

fn validate_prop_name(name: &str) -> ModelResult<()> {
    if name.is_empty() {
        return Err(ModelError::InvalidPropertyName {
            name: name.to_owned(),
            reason: "name is empty".to_owned(),
        });
    }
    if let Some(bad) = name.chars().find(|c| *c == '.' || *c == '/') {
        return Err(ModelError::InvalidPropertyName {
            name: name.to_owned(),
            reason: format!("contains disallowed character {bad:?}"),
        });
    }
    Ok(())
}
