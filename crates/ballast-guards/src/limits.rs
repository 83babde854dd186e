//! Shared limit lookup for the typed limiters.

use ballast_core::entity::EntityTag;
use indexmap::IndexMap;

/// Resolve a limit for an entity: specific type key first, then the
/// first configured key naming the entity's tag category. `None` when
/// nothing matches.
pub(crate) fn lookup(
    types: &IndexMap<String, i64>,
    type_key: &str,
    tag: EntityTag,
) -> Option<i64> {
    if let Some(&limit) = types.get(type_key) {
        return Some(limit);
    }
    types
        .iter()
        .find(|(key, _)| EntityTag::from_key(key) == Some(tag))
        .map(|(_, &limit)| limit)
}
