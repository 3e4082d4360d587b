//! Processor registry keyed by job type.

use jobkit_core::Processor;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Maps job-type names to host-supplied processors.
///
/// Registration is an idempotent upsert and is safe while the pool is
/// running, though a type should be registered before jobs of that type are
/// submitted: a claimed job whose type has no processor fails permanently.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_type: impl Into<String>, processor: Arc<dyn Processor>) {
        let job_type = job_type.into();
        debug!(job_type = %job_type, "Registering processor");
        self.processors
            .write()
            .expect("registry lock poisoned")
            .insert(job_type, processor);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors
            .read()
            .expect("registry lock poisoned")
            .get(job_type)
            .cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors
            .read()
            .expect("registry lock poisoned")
            .contains_key(job_type)
    }
}
