//! Entity capability model and snapshot value types.
//!
//! The host exposes a deep subtype hierarchy of entity kinds; the
//! guardian never switches on host classes. Instead every entity is
//! projected once, at snapshot time, into an [`EntityTag`] plus a flat
//! attribute bundle ([`EntityView`]). Scanners move these bundles
//! across threads by value; nothing in them refers back to live host
//! state.

use std::fmt;

/// A position or direction in world space.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Vec3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vec3 {
    /// Construct a vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component-wise difference `self - other`.
    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Dot product.
    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Squared length.
    pub fn length_sq(self) -> f64 {
        self.dot(self)
    }

    /// Length.
    pub fn length(self) -> f64 {
        self.length_sq().sqrt()
    }

    /// Unit-length copy, or `None` for the zero vector.
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len > 0.0 {
            Some(Vec3::new(self.x / len, self.y / len, self.z / len))
        } else {
            None
        }
    }

    /// Squared distance to another point.
    pub fn distance_sq(self, other: Vec3) -> f64 {
        self.sub(other).length_sq()
    }

    /// Distance to another point.
    pub fn distance(self, other: Vec3) -> f64 {
        self.distance_sq(other).sqrt()
    }

    /// Chunk coordinates containing this position (16-block chunks).
    pub fn chunk_x(self) -> i32 {
        (self.x.floor() as i64 >> 4) as i32
    }

    /// See [`chunk_x`](Self::chunk_x).
    pub fn chunk_z(self) -> i32 {
        (self.z.floor() as i64 >> 4) as i32
    }
}

/// Capability projection over the host's entity hierarchy.
///
/// The closed set every piece of core logic switches on. Projection
/// happens exactly once, when the host adapter builds an
/// [`EntityView`]; ambiguous kinds fall back to [`EntityTag::Mob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityTag {
    /// A dropped item stack.
    Item,
    /// An experience orb.
    ExperienceOrb,
    /// A hostile mob.
    Monster,
    /// A passive (non-hostile, non-villager) living entity.
    Passive,
    /// An armor stand.
    ArmorStand,
    /// A villager.
    Villager,
    /// A tameable living entity (tamed or not).
    Tameable,
    /// Any other living entity.
    Mob,
}

impl EntityTag {
    /// Eviction order for the per-chunk limiter: lower ranks are
    /// removed first. Dropped items go before orbs, orbs before
    /// hostiles, hostiles before everything else living.
    pub fn removal_rank(self) -> u8 {
        match self {
            Self::Item => 0,
            Self::ExperienceOrb => 1,
            Self::Monster => 2,
            _ => 3,
        }
    }

    /// Whether the tag denotes a living entity.
    pub fn is_living(self) -> bool {
        !matches!(self, Self::Item | Self::ExperienceOrb)
    }

    /// Parse a configuration key naming a tag category.
    ///
    /// Accepts the kebab-case tag names plus the common aliases hosts
    /// use in configs (`hostile`, `xp-orb`, `animal`).
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "item" => Some(Self::Item),
            "experience-orb" | "xp-orb" => Some(Self::ExperienceOrb),
            "monster" | "hostile" => Some(Self::Monster),
            "passive" | "animal" => Some(Self::Passive),
            "armor-stand" => Some(Self::ArmorStand),
            "villager" => Some(Self::Villager),
            "tameable" => Some(Self::Tameable),
            "mob" => Some(Self::Mob),
            _ => None,
        }
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Item => "item",
            Self::ExperienceOrb => "experience-orb",
            Self::Monster => "monster",
            Self::Passive => "passive",
            Self::ArmorStand => "armor-stand",
            Self::Villager => "villager",
            Self::Tameable => "tameable",
            Self::Mob => "mob",
        };
        write!(f, "{name}")
    }
}

/// Immutable snapshot of one non-player entity.
#[derive(Clone, Debug)]
pub struct EntityView {
    /// Host entity ID.
    pub id: crate::id::EntityId,
    /// Owning world.
    pub world: crate::id::WorldId,
    /// Position at snapshot time.
    pub pos: Vec3,
    /// Capability tag.
    pub tag: EntityTag,
    /// Host type key (e.g. `"zombie"`), used for per-type limits.
    pub type_key: String,
    /// Custom display name, if any.
    pub custom_name: Option<String>,
    /// Whether the entity is tamed.
    pub tamed: bool,
    /// Whether the entity is leashed.
    pub leashed: bool,
    /// Whether the entity is riding or being ridden.
    pub mounted: bool,
    /// Whether mob AI is currently enabled.
    pub aware: bool,
    /// Whether the entity currently collides.
    pub collidable: bool,
}

impl EntityView {
    /// The entity's chunk within its world.
    pub fn chunk(&self) -> crate::id::ChunkKey {
        crate::id::ChunkKey::new(self.world, self.pos.chunk_x(), self.pos.chunk_z())
    }

    /// Whether the entity carries a custom display name.
    pub fn has_custom_name(&self) -> bool {
        self.custom_name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// Immutable snapshot of one player.
#[derive(Clone, Debug)]
pub struct PlayerView {
    /// Host entity ID of the player.
    pub id: crate::id::EntityId,
    /// Owning world.
    pub world: crate::id::WorldId,
    /// Feet position at snapshot time.
    pub pos: Vec3,
    /// Eye position at snapshot time.
    pub eye_pos: Vec3,
    /// Unit look direction at snapshot time.
    pub look_dir: Vec3,
}

impl PlayerView {
    /// The player's chunk within their world.
    pub fn chunk(&self) -> crate::id::ChunkKey {
        crate::id::ChunkKey::new(self.world, self.pos.chunk_x(), self.pos.chunk_z())
    }
}
