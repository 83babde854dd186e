//! Reusable snapshot-value fixtures.
//!
//! Builders for the entity and player bundles tests feed into the mock
//! host. Fields are public on the view types, so tests tweak the
//! returned value directly for protection flags, names, and the like.

use ballast_core::entity::{EntityTag, EntityView, PlayerView, Vec3};
use ballast_core::id::{EntityId, WorldId};

/// An entity with neutral attributes: unnamed, untamed, aware,
/// collidable, type key equal to the tag name.
pub fn entity(id: u64, world: WorldId, pos: Vec3, tag: EntityTag) -> EntityView {
    EntityView {
        id: EntityId(id),
        world,
        pos,
        tag,
        type_key: tag.to_string(),
        custom_name: None,
        tamed: false,
        leashed: false,
        mounted: false,
        aware: true,
        collidable: true,
    }
}

/// Like [`entity`] but with an explicit host type key (e.g. `"zombie"`).
pub fn typed_entity(
    id: u64,
    world: WorldId,
    pos: Vec3,
    tag: EntityTag,
    type_key: &str,
) -> EntityView {
    let mut view = entity(id, world, pos, tag);
    view.type_key = type_key.to_string();
    view
}

/// A player standing at `pos`, eyes 1.6 blocks up, looking along
/// `look_dir` (normalized; facing +X when the input has no direction).
pub fn player(id: u64, world: WorldId, pos: Vec3, look_dir: Vec3) -> PlayerView {
    PlayerView {
        id: EntityId(id),
        world,
        pos,
        eye_pos: Vec3::new(pos.x, pos.y + 1.6, pos.z),
        look_dir: look_dir
            .normalized()
            .unwrap_or_else(|| Vec3::new(1.0, 0.0, 0.0)),
    }
}

/// Chunk coordinates of the square of radius `r` centred on
/// `(cx, cz)`: `(2r + 1)^2` chunks.
pub fn chunk_square(cx: i32, cz: i32, r: i32) -> Vec<(i32, i32)> {
    let mut out = Vec::new();
    for x in (cx - r)..=(cx + r) {
        for z in (cz - r)..=(cz + r) {
            out.push((x, z));
        }
    }
    out
}
