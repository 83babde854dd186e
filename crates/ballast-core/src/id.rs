//! Strongly-typed identifiers for worlds, chunks, entities, and ticks.

use std::fmt;

/// Identifies a world on the host server.
///
/// Hosts expose worlds under a 128-bit UUID; the guardian treats it as
/// an opaque stable key and never derives meaning from its bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(pub u128);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for WorldId {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

/// Identifies an entity (including players) on the host server.
///
/// Stable for the lifetime of the entity; a removed entity's ID is
/// never observed again within one process run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Monotonically increasing tick counter.
///
/// Incremented once per main-loop iteration by the host-driven
/// [`TimeBase`](crate::time::TimeBase).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickId(pub u64);

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TickId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Chunk coordinates within a single world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    /// Chunk X coordinate.
    pub x: i32,
    /// Chunk Z coordinate.
    pub z: i32,
}

impl ChunkPos {
    /// Construct a chunk position.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Pack into a single `u64` key (`x` in the high half, `z` in the low).
    ///
    /// Used where per-chunk counters are keyed within an already
    /// world-scoped map, e.g. the lag analyzer's density table.
    pub fn packed(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }

    /// Inverse of [`packed`](Self::packed).
    pub fn from_packed(key: u64) -> Self {
        Self {
            x: (key >> 32) as u32 as i32,
            z: key as u32 as i32,
        }
    }

    /// Chebyshev distance to another chunk, in chunks.
    ///
    /// This is the radius metric used when excluding chunks near a
    /// player from unload candidacy.
    pub fn chebyshev(self, other: ChunkPos) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz) as u32
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Globally unique chunk address: world plus chunk coordinates.
///
/// Every per-chunk map in the guardian (activation counters,
/// suppressions, unload plans) is keyed by `ChunkKey` so identical
/// coordinates in different worlds never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    /// Owning world.
    pub world: WorldId,
    /// Chunk coordinates within that world.
    pub pos: ChunkPos,
}

impl ChunkKey {
    /// Construct a chunk key.
    pub fn new(world: WorldId, x: i32, z: i32) -> Self {
        Self {
            world,
            pos: ChunkPos::new(x, z),
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.pos, self.world)
    }
}
