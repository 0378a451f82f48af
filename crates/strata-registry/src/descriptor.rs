use std::collections::HashMap;

use strata_model::{Record, ValueKind};
use strata_model::wire;

/// Detach and chunk metadata of a single property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyFlags {
    /// Store the value as its own independently addressed record.
    pub detachable: bool,
    /// Split large list values into bounded-size chunk records.
    pub chunkable: bool,
    /// Maximum elements per chunk; meaningful only when `chunkable`.
    pub chunk_size: usize,
}

impl PropertyFlags {
    /// Inline: neither detached nor chunked.
    pub const INLINE: Self = Self {
        detachable: false,
        chunkable: false,
        chunk_size: wire::DEFAULT_CHUNK_SIZE,
    };

    pub const fn detach() -> Self {
        Self {
            detachable: true,
            chunkable: false,
            chunk_size: wire::DEFAULT_CHUNK_SIZE,
        }
    }

    pub const fn chunked(chunk_size: usize) -> Self {
        Self {
            detachable: true,
            chunkable: true,
            chunk_size,
        }
    }
}

impl Default for PropertyFlags {
    fn default() -> Self {
        Self::INLINE
    }
}

/// Schema descriptor of one typed property.
#[derive(Clone, Debug)]
pub struct PropertySpec {
    pub name: String,
    pub flags: PropertyFlags,
    /// Expected value shape on decode; `None` accepts anything.
    pub expected: Option<ValueKind>,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: PropertyFlags::INLINE,
            expected: None,
        }
    }

    pub fn detachable(mut self) -> Self {
        self.flags.detachable = true;
        self
    }

    pub fn chunked(mut self, chunk_size: usize) -> Self {
        self.flags.detachable = true;
        self.flags.chunkable = true;
        self.flags.chunk_size = chunk_size;
        self
    }

    pub fn expect(mut self, kind: ValueKind) -> Self {
        self.expected = Some(kind);
        self
    }
}

/// Hook invoked on a record after all of its properties were decoded.
pub type PostDecodeHook = fn(&mut Record);

/// Cached per-type schema: the full set of typed-property descriptors plus
/// post-decode hooks. Built once per type and shared behind an `Arc`.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    type_name: String,
    specs: Vec<PropertySpec>,
    // lowercase property name -> index into `specs`, for the decoder's
    // case-insensitive matching
    lower_index: HashMap<String, usize>,
    post_decode: Vec<PostDecodeHook>,
}

impl TypeDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            specs: Vec::new(),
            lower_index: HashMap::new(),
            post_decode: Vec::new(),
        }
    }

    /// Generic fallback descriptor for an unknown discriminator. Has no
    /// typed properties: every decoded field lands in the dynamic bag.
    pub fn generic(type_name: impl Into<String>) -> Self {
        Self::new(type_name)
    }

    pub fn with_prop(mut self, spec: PropertySpec) -> Self {
        self.lower_index
            .insert(spec.name.to_lowercase(), self.specs.len());
        self.specs.push(spec);
        self
    }

    pub fn with_post_decode(mut self, hook: PostDecodeHook) -> Self {
        self.post_decode.push(hook);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Typed-property descriptors, in declaration order.
    pub fn specs(&self) -> &[PropertySpec] {
        &self.specs
    }

    /// Exact-name lookup (serialization path).
    pub fn spec(&self, name: &str) -> Option<&PropertySpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Case-insensitive lookup (deserialization path).
    pub fn spec_ci(&self, name: &str) -> Option<&PropertySpec> {
        self.lower_index
            .get(&name.to_lowercase())
            .map(|&i| &self.specs[i])
    }

    pub fn post_decode_hooks(&self) -> &[PostDecodeHook] {
        &self.post_decode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_lookup_is_case_insensitive() {
        let desc = TypeDescriptor::new("Widget")
            .with_prop(PropertySpec::new("displayValue").detachable());

        assert!(desc.spec("displayValue").is_some());
        assert!(desc.spec("displayvalue").is_none());
        assert!(desc.spec_ci("DISPLAYVALUE").is_some());
    }

    #[test]
    fn chunked_implies_detachable() {
        let spec = PropertySpec::new("points").chunked(300);
        assert!(spec.flags.detachable);
        assert!(spec.flags.chunkable);
        assert_eq!(spec.flags.chunk_size, 300);
    }

    #[test]
    fn generic_descriptor_has_no_typed_props() {
        let desc = TypeDescriptor::generic("Unknown.Type");
        assert!(desc.specs().is_empty());
        assert!(desc.spec_ci("anything").is_none());
    }
}
