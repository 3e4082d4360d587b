//! In-memory job scheduling for jobkit.
//!
//! Accepts units of deferred work, schedules them priority-then-age,
//! executes them on a bounded pool of cooperative workers, and manages the
//! job lifecycle: completion, retry on failure, per-attempt timeout, and
//! cancellation. Single process only; the job table is volatile.

pub mod config;
pub mod engine;
pub mod registry;
pub mod table;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{EngineStats, JobEngine, SubmitOptions};
pub use registry::ProcessorRegistry;
pub use table::{ClaimedJob, JobTable, NewJob};
pub use worker::Worker;
