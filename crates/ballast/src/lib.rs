//! Ballast: an adaptive performance guardian for tick-based game
//! servers.
//!
//! Ballast watches the main simulation loop (TPS, MSPT, GC pauses,
//! heap trend), attributes load to causes (entity populations, chunk
//! residency, redstone storms), and applies graduated counter-measures
//! — AI culling, population limits, signal suppression, chunk
//! unloading, distance reduction — all dispatched through a budgeted
//! main-thread work queue so the cure never costs more than the
//! disease.
//!
//! This is the top-level facade crate re-exporting the public API from
//! the Ballast sub-crates. For most hosts, adding `ballast` as a
//! single dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use ballast::prelude::*;
//! use ballast_test_utils::{MockHost, MockProbe};
//!
//! let config = ballast::load_config_str("workload-limit-ms: 8").unwrap();
//! let host = Arc::new(MockHost::new());
//! host.add_world(WorldId(1), "world");
//! let guardian = Guardian::new(config, host, Arc::new(MockProbe::new())).unwrap();
//!
//! guardian.start();
//! // The host calls this once per simulation tick:
//! guardian.tick();
//! assert!(guardian.telemetry().tps() <= 20.0);
//! guardian.shutdown();
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in
//! the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `ballast-core` | IDs, config, host/probe/scheduler traits |
//! | [`telemetry`] | `ballast-telemetry` | Tick sampler, windows, GC, leak detection |
//! | [`engine`] | `ballast-engine` | Distributor, pipeline, thresholds, predictive |
//! | [`guards`] | `ballast-guards` | Culler, limiters, suppressor, world guard |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod config_io;
mod guardian;

/// Core types, configuration, and boundary traits (`ballast-core`).
pub use ballast_core as types;

/// Telemetry: sampling, windows, GC, and heap trends
/// (`ballast-telemetry`).
pub use ballast_telemetry as telemetry;

/// The adaptive control plane (`ballast-engine`).
pub use ballast_engine as engine;

/// Load-shedding guards (`ballast-guards`).
pub use ballast_guards as guards;

pub use config_io::{load_config_str, ConfigLoadError};
pub use guardian::Guardian;

/// The most commonly used types, re-exported in one place.
pub mod prelude {
    pub use crate::guardian::Guardian;
    pub use ballast_core::config::{ActionKind, GuardianConfig};
    pub use ballast_core::entity::{EntityTag, EntityView, PlayerView, Vec3};
    pub use ballast_core::host::{HostAdapter, HostCapabilities, MutationError, WorldInfo};
    pub use ballast_core::id::{ChunkKey, ChunkPos, EntityId, TickId, WorldId};
    pub use ballast_core::runtime::RuntimeProbe;
    pub use ballast_core::scheduler::{Scheduler, TimerHandle};
    pub use ballast_core::time::{Clock, SystemClock, TimeBase};
    pub use ballast_guards::ActivationDecision;
    pub use ballast_telemetry::{TelemetryHandle, TpsSource};
}
