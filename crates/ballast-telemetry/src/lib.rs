//! Tick, GC, and heap telemetry for the Ballast performance guardian.
//!
//! Everything in this crate observes and publishes; nothing here
//! mutates the simulation. The tick sampler runs on the main thread,
//! the GC observer and memory-trend detector on their own daemon
//! timers, and every externally visible reading is a lock-free atomic
//! snapshot.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod gc;
pub mod leak;
pub mod tick_sampler;
pub mod trend;
pub mod window;

pub use gc::{GcObserver, GcStats};
pub use leak::MemoryTrendDetector;
pub use tick_sampler::{TelemetryHandle, TickSampler, TpsSource};
pub use trend::{linear_fit, weighted_fit, LineFit};
pub use window::{MetricsWindows, WindowAvg, WindowReport};
