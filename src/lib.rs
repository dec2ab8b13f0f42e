// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod buckets;
pub mod clock;
pub mod config;
pub mod energy;
pub mod meter;
pub mod metrics;
pub mod recorder;
pub mod rollup;
pub mod scheduler;
pub mod store;

pub use crate::api::router;
pub use crate::energy::{Energy, EnergySnapshot, Signal};
pub use crate::recorder::SlidingWindowRecorder;
pub use crate::rollup::HierarchicalRollup;
