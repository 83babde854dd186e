//! Load-shedding guards: the scanners and event handlers that turn
//! telemetry into concrete, revalidated host mutations.
//!
//! Every guard here either implements
//! [`Scanner`](ballast_engine::Scanner) and runs through the engine's
//! scan pipeline, or (the redstone suppressor) handles host events
//! directly on the main thread. None of them mutate the host outside a
//! workload-distributor task.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod chunk_limiter;
pub mod density;
pub mod entity_limiter;
pub mod frustum;
pub mod lag_analyzer;
pub mod redstone;
pub mod world_guard;

mod limits;

pub use chunk_limiter::ChunkLimiter;
pub use density::DensityOptimizer;
pub use entity_limiter::EntityLimiter;
pub use frustum::FrustumCuller;
pub use lag_analyzer::LagAnalyzer;
pub use redstone::{ActivationDecision, RedstoneSuppressor};
pub use world_guard::WorldChunkGuard;
