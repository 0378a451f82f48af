use strata_model::{Record, Value};
use strata_model::wire;

use crate::dynamic::dynamic_flags;
use crate::registry::resolve;

/// Count the detachable descendants of a record, before serialization.
///
/// This mirrors what the serializer will persist: detached sub-records are
/// counted individually, chunkable lists contribute one child per chunk,
/// and inline sub-records are traversed but not counted themselves.
/// Serialized roots also carry the real count in their closure table; this
/// is the cheap pre-flight estimate for progress reporting.
pub fn count_descendants(record: &Record) -> u64 {
    let desc = resolve(record.type_name());
    let mut count = 0u64;
    for (name, value) in record.entries() {
        if name.starts_with(wire::TRANSIENT_PREFIX) || name == wire::ID_FIELD {
            continue;
        }
        let flags = desc
            .spec(name)
            .map(|s| s.flags)
            .unwrap_or_else(|| dynamic_flags(name));

        if flags.chunkable {
            if let Value::List(items) = value {
                count += items.len().div_ceil(flags.chunk_size) as u64;
                count += items.iter().map(|v| count_in_value(v, false)).sum::<u64>();
                continue;
            }
        }
        count += count_in_value(value, flags.detachable);
    }
    count
}

fn count_in_value(value: &Value, detached: bool) -> u64 {
    match value {
        Value::Record(rec) => u64::from(detached) + count_descendants(rec),
        Value::List(items) => items.iter().map(|v| count_in_value(v, detached)).sum(),
        Value::Map(map) => map.values().map(|v| count_in_value(v, detached)).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(n: i64) -> Record {
        let mut rec = Record::base();
        rec.set("n", n).unwrap();
        rec
    }

    #[test]
    fn flat_record_has_no_descendants() {
        let mut rec = Record::base();
        rec.set("a", 1i64).unwrap();
        assert_eq!(count_descendants(&rec), 0);
    }

    #[test]
    fn detached_child_counts_once() {
        let mut rec = Record::base();
        rec.set("@child", child(1)).unwrap();
        rec.set("inline", child(2)).unwrap();
        assert_eq!(count_descendants(&rec), 1);
    }

    #[test]
    fn nested_detachment_counts_transitively() {
        let mut inner = Record::base();
        inner.set("@leaf", child(1)).unwrap();
        let mut root = Record::base();
        root.set("@inner", inner).unwrap();
        assert_eq!(count_descendants(&root), 2);
    }

    #[test]
    fn detached_list_counts_each_record() {
        let mut rec = Record::base();
        rec.set("@parts", Value::List(vec![child(1).into(), child(2).into()]))
            .unwrap();
        assert_eq!(count_descendants(&rec), 2);
    }

    #[test]
    fn chunkable_list_counts_chunks() {
        let mut rec = Record::base();
        let items: Vec<Value> = (0..25).map(Value::Int).collect();
        rec.set("@(10)points", Value::List(items)).unwrap();
        // ceil(25 / 10) = 3 chunk records
        assert_eq!(count_descendants(&rec), 3);
    }

    #[test]
    fn transient_props_are_skipped() {
        let mut rec = Record::base();
        rec.set_raw("__scratch", child(1));
        assert_eq!(count_descendants(&rec), 0);
    }
}
