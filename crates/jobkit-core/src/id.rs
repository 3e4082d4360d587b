//! Job identifiers.

use chrono::Utc;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A unique identifier for a submitted job.
///
/// Ids combine the job type, the submission time, and a per-table sequence
/// number so they stay human-traceable in logs (`import-20260829143055-17`).
/// Callers treat them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Generate the id for a new submission with the given sequence number.
    pub fn new(job_type: &str, seq: u64) -> Self {
        Self(format!(
            "{}-{}-{}",
            job_type,
            Utc::now().format("%Y%m%d%H%M%S"),
            seq
        ))
    }

    /// Wrap an id string received back from a caller.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
