use strata_model::wire;

use crate::descriptor::PropertyFlags;

/// Parse the detach/chunk convention out of a dynamic property name.
///
/// `@name` detaches; `@(N)name` detaches and chunks at `N`; `@()name`
/// detaches and chunks at [`wire::DEFAULT_CHUNK_SIZE`]. A malformed size
/// group (no closing paren, non-digits) degrades to plain detachment, the
/// same way the convention is applied on the wire.
///
/// Never cached: dynamic property shapes vary per instance.
pub fn dynamic_flags(name: &str) -> PropertyFlags {
    let Some(rest) = name.strip_prefix(wire::DETACH_PREFIX) else {
        return PropertyFlags::INLINE;
    };

    let Some(group) = rest.strip_prefix('(') else {
        return PropertyFlags::detach();
    };
    let Some(close) = group.find(')') else {
        return PropertyFlags::detach();
    };

    let digits = &group[..close];
    if digits.is_empty() {
        return PropertyFlags::chunked(wire::DEFAULT_CHUNK_SIZE);
    }
    match digits.parse::<usize>() {
        Ok(n) if n > 0 => PropertyFlags::chunked(n),
        _ => PropertyFlags::detach(),
    }
}
