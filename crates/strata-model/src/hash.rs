//! Content hashing for serialized records.
//!
//! A record's id is the hex-encoded BLAKE3 hash of its canonical JSON with
//! the `id` field excluded. The hash is deterministic within one deployment;
//! it makes no promise of interop with other implementations of the format.

/// Compute a record id from its canonical JSON (without the `id` field).
pub fn object_id(canonical_json: &str) -> String {
    hex::encode(blake3::hash(canonical_json.as_bytes()).as_bytes())
}

/// Returns `true` if `id` has the shape of a computed record id.
pub fn is_object_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit())
}
