//! Processor trait implemented by host-supplied job handlers.

use async_trait::async_trait;
use std::future::Future;

use crate::{Payload, Result};

/// A named asynchronous handler that performs a job's actual work.
///
/// Processors receive the submitted payload unchanged and return a result
/// payload that is stored on the job record. A processor must be safe to
/// retry: the engine re-runs failed attempts without deduplicating the side
/// effects of a partially completed one.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn run(&self, payload: Payload) -> Result<Payload>;
}

/// Adapter that lets a plain async function or closure act as a [`Processor`].
pub struct FnProcessor<F>(F);

impl<F, Fut> FnProcessor<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload>> + Send,
{
    async fn run(&self, payload: Payload) -> Result<Payload> {
        (self.0)(payload).await
    }
}
