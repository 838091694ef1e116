//! Pluggable execution strategy for invocation bodies (`spec.md` §5).
//!
//! The driver never polls a body future directly; it always asks a
//! [`Scheduler`] to `spawn` it first. The default, [`InlineScheduler`],
//! hands the future straight back — the driver's own
//! `futures::stream::FuturesUnordered` is the only thing that ever polls
//! it, so nothing runs until the driver's drain loop gets around to it and
//! no thread is ever blocked. A caller may supply a scheduler backed by a
//! real thread pool instead; the driver's completion accounting is built on
//! atomics and a shared lock (see `crate::invocation`) specifically so it
//! works regardless of which thread a task resolves on.

use std::future::Future;
use std::pin::Pin;

use crate::error::CoreError;

/// A boxed, spawnable invocation body: resolves to `Ok(())` on a
/// successful body, `Err` on a failed one.
pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>>;

/// Chooses how invocation bodies are driven to completion.
pub trait Scheduler: Send + Sync {
    /// Accepts a body future and returns the future the driver should
    /// poll to observe its completion. Implementations that hand the task
    /// to another thread must return a future that resolves once that
    /// thread's work is done (e.g. a oneshot-channel receiver).
    fn spawn(&self, task: DispatchFuture) -> DispatchFuture;
}

/// Runs every invocation body on the driver's own `FuturesUnordered`,
/// cooperatively and single-threaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn spawn(&self, task: DispatchFuture) -> DispatchFuture {
        task
    }
}
