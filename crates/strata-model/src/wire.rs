//! Reserved field names and discriminators of the serialized record format.

/// JSON field carrying a record's type discriminator.
pub const TYPE_DISCRIMINATOR: &str = "strata_type";

/// Discriminator value of a reference token.
pub const REFERENCE_TYPE: &str = "reference";

/// JSON field of a reference token naming the referenced record.
pub const REFERENCED_ID_FIELD: &str = "referencedId";

/// Discriminator value of a data chunk record.
pub const CHUNK_TYPE: &str = "Strata.DataChunk";

/// JSON field of a chunk record holding the chunked elements.
pub const CHUNK_DATA_FIELD: &str = "data";

/// JSON field carrying a record's closure table (descendant id -> min depth).
pub const CLOSURE_FIELD: &str = "__closure";

/// JSON field carrying a record's content hash.
pub const ID_FIELD: &str = "id";

/// Prefix marking a property as transient: ignored for hashing and storage.
pub const TRANSIENT_PREFIX: &str = "__";

/// Prefix marking a dynamic property as detachable.
pub const DETACH_PREFIX: char = '@';

/// Default maximum number of elements per chunk when a chunkable property
/// does not specify its own size.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
