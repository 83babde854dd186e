//! The host adapter boundary.
//!
//! [`HostAdapter`] is the single seam between the guardian and the game
//! server it protects. The guardian reads world/entity state through it
//! and applies every mutation through it; the adapter implementation is
//! the host's concern and is injected at construction. Tests inject the
//! mock adapter from `ballast-test-utils`.
//!
//! Mutation methods are only ever called from the main (simulation)
//! thread, via tasks drained by the workload distributor.
//! Notification methods are thread-safe; message strings carry the
//! host's legacy `&`-color codes as an opaque byte stream.

use std::error::Error;
use std::fmt;

use crate::entity::{EntityView, PlayerView, Vec3};
use crate::id::{ChunkKey, ChunkPos, EntityId, WorldId};

/// Snapshot of one world's headline numbers.
#[derive(Clone, Debug)]
pub struct WorldInfo {
    /// Stable world identifier.
    pub id: WorldId,
    /// Human-readable world name.
    pub name: String,
    /// Whether this is the host's default world (cannot be unloaded).
    pub is_default: bool,
    /// Players currently in the world.
    pub player_count: u32,
    /// Chunks currently loaded.
    pub loaded_chunk_count: u32,
    /// Current view distance, in chunks.
    pub view_distance: u8,
    /// Current simulation distance, if the host exposes the capability.
    pub simulation_distance: Option<u8>,
    /// World spawn point, the evacuation target.
    pub spawn: Vec3,
}

/// Host capabilities probed once at startup.
///
/// Callers branch on these flags instead of probing the host per call.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostCapabilities {
    /// Whether the host supports reading and writing simulation distance.
    pub simulation_distance: bool,
}

/// A sound notification, forwarded verbatim to the host.
#[derive(Clone, Debug)]
pub struct SoundSpec {
    /// Host sound key.
    pub name: String,
    /// Playback volume.
    pub volume: f32,
    /// Playback pitch.
    pub pitch: f32,
}

/// Failure of a host mutation.
///
/// Distinguishes retryable absence from a refusal and from a missing
/// capability, so callers can re-validate, escalate, or skip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationError {
    /// The target (entity, chunk, world, player) no longer exists.
    /// Retryable in the sense that the next snapshot simply won't
    /// contain it.
    Missing,
    /// The host refused the mutation (e.g. unloading the default world).
    Refused {
        /// Host-supplied reason.
        reason: String,
    },
    /// The host lacks the capability entirely (e.g. simulation distance
    /// on an older host). Callers should have checked
    /// [`HostCapabilities`] first.
    Unsupported,
}

impl MutationError {
    /// Whether the failure is benign staleness rather than a refusal.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "mutation target no longer exists"),
            Self::Refused { reason } => write!(f, "host refused mutation: {reason}"),
            Self::Unsupported => write!(f, "host lacks the capability"),
        }
    }
}

impl Error for MutationError {}

/// The boundary through which the guardian observes and mutates the
/// simulation.
pub trait HostAdapter: Send + Sync {
    // ── Reads ────────────────────────────────────────────────────

    /// Enumerate all loaded worlds.
    fn worlds(&self) -> Vec<WorldInfo>;

    /// Look up one world.
    fn world(&self, id: WorldId) -> Option<WorldInfo>;

    /// Enumerate a world's loaded chunks.
    fn loaded_chunks(&self, world: WorldId) -> Vec<ChunkPos>;

    /// Enumerate a world's players.
    fn players(&self, world: WorldId) -> Vec<PlayerView>;

    /// Enumerate a world's non-player entities.
    fn entities(&self, world: WorldId) -> Vec<EntityView>;

    /// Enumerate the non-player entities in one chunk.
    fn entities_in_chunk(&self, key: ChunkKey) -> Vec<EntityView>;

    /// Enumerate non-player entities within `radius` of a point.
    fn entities_near(&self, world: WorldId, center: Vec3, radius: f64) -> Vec<EntityView>;

    /// Re-validate a single entity; `None` if it is gone.
    fn entity(&self, id: EntityId) -> Option<EntityView>;

    /// Whether a chunk is currently loaded.
    fn chunk_is_loaded(&self, key: ChunkKey) -> bool;

    /// Capabilities probed once at startup.
    fn capabilities(&self) -> HostCapabilities;

    /// Scheduled-task counts per external plugin, for lag attribution.
    fn plugin_task_counts(&self) -> Vec<(String, u32)>;

    // ── Mutations (main thread only) ─────────────────────────────

    /// Remove an entity from the simulation.
    fn remove_entity(&self, id: EntityId) -> Result<(), MutationError>;

    /// Enable or disable an entity's AI.
    fn set_entity_aware(&self, id: EntityId, aware: bool) -> Result<(), MutationError>;

    /// Enable or disable an entity's collision.
    fn set_entity_collidable(&self, id: EntityId, collidable: bool) -> Result<(), MutationError>;

    /// Set a world's view distance, in chunks.
    fn set_view_distance(&self, world: WorldId, distance: u8) -> Result<(), MutationError>;

    /// Set a world's simulation distance, in chunks.
    fn set_simulation_distance(&self, world: WorldId, distance: u8) -> Result<(), MutationError>;

    /// Unload a chunk, saving or discarding its state.
    fn unload_chunk(&self, key: ChunkKey, save: bool) -> Result<(), MutationError>;

    /// Unload an entire world.
    fn unload_world(&self, world: WorldId, save: bool) -> Result<(), MutationError>;

    /// Teleport a player to a position in a world.
    fn teleport_player(
        &self,
        player: EntityId,
        world: WorldId,
        pos: Vec3,
    ) -> Result<(), MutationError>;

    /// Dispatch a server console command.
    fn dispatch_command(&self, command: &str) -> Result<(), MutationError>;

    /// Restore host defaults the guardian may have altered: view and
    /// simulation distances and mob AI.
    fn restore_defaults(&self) -> Result<(), MutationError>;

    // ── Notifications (thread-safe) ──────────────────────────────

    /// Send a chat message to online admins.
    fn notify_admins(&self, message: &str);

    /// Broadcast a chat message to everyone.
    fn broadcast(&self, message: &str);

    /// Show an action-bar message to online admins.
    fn send_action_bar(&self, message: &str);

    /// Play a sound for online admins.
    fn play_sound(&self, sound: &SoundSpec);
}
