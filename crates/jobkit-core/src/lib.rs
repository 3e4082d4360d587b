//! Core domain types and traits for the jobkit background job engine.
//!
//! This crate contains:
//! - Job identifiers
//! - The job record and its lifecycle state machine
//! - Priority classes and opaque payloads
//! - The Processor trait implemented by host-supplied handlers
//! - Error types

pub mod error;
pub mod id;
pub mod job;
pub mod processor;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{JobRecord, JobState, JobStatusView, Payload, Priority};
pub use processor::{FnProcessor, Processor};
