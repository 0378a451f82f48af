//! Closure-table extraction from serialized root documents.

use strata_model::wire;

/// Parse the descendant ids out of a root document's closure table.
///
/// Tolerant: a document without a closure table (or one that is not valid
/// JSON) yields an empty list, meaning "no children to copy".
pub fn children_ids(root_json: &str) -> Vec<String> {
    let Ok(doc) = serde_json::from_str::<serde_json::Value>(root_json) else {
        return Vec::new();
    };
    let Some(closure) = doc.get(wire::CLOSURE_FIELD).and_then(|c| c.as_object()) else {
        return Vec::new();
    };
    closure.keys().cloned().collect()
}
