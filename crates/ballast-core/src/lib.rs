//! Core types and traits for the Ballast performance guardian.
//!
//! This is the leaf crate with zero internal Ballast dependencies. It
//! defines the fundamental abstractions used throughout the workspace:
//! identifiers, the time base, the entity capability model, the host
//! adapter and runtime probe boundaries, the scheduler abstraction, and
//! the configuration model.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod entity;
pub mod host;
pub mod id;
pub mod runtime;
pub mod scheduler;
pub mod time;

// Re-export core types at crate root for convenience.
pub use config::{ActionKind, ActionList, ConfigError, GuardianConfig};
pub use entity::{EntityTag, EntityView, PlayerView, Vec3};
pub use host::{HostAdapter, HostCapabilities, MutationError, SoundSpec, WorldInfo};
pub use id::{ChunkKey, ChunkPos, EntityId, TickId, WorldId};
pub use runtime::{CollectorSample, PoolSample, RuntimeProbe};
pub use scheduler::{RepeatingTask, ScheduleError, Scheduler, Task, TimerHandle};
pub use time::{Clock, SystemClock, TimeBase};
