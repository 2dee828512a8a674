//! Composite lookup keys.

/// Joins key parts with `:` into a single lookup key.
pub(crate) fn join(parts: &[&str]) -> String {
    parts.join(":")
}
