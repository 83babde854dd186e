//! The adaptive control plane: workload distribution, the generic scan
//! pipeline, the threshold state machine, and the predictive engine.
//!
//! Everything that mutates the host flows through
//! [`WorkloadDistributor`], a multi-producer single-consumer queue
//! drained on the main thread under a strict per-tick budget.
//! Scanners run the snapshot → analyze → dispatch cycle provided by
//! [`ScanPipeline`]; the [`ThresholdEngine`] and
//! [`PredictiveOptimizer`] decide when counter-measures fire and
//! [`ActionExecutor`] applies them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod actions;
pub mod distributor;
pub mod pipeline;
pub mod predictive;
pub mod scheduler;
pub mod threshold;

pub use actions::{ActionExecutor, SettingsModified};
pub use distributor::{DistributorStats, EnqueueError, WorkloadDistributor};
pub use pipeline::{ScanPipeline, Scanner};
pub use predictive::PredictiveOptimizer;
pub use scheduler::ThreadScheduler;
pub use threshold::{ThresholdEngine, ThresholdLevel};
