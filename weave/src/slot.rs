//! Slot storage: the record a handle resolves to (`spec.md` §3).
//!
//! A slot is one of three kinds. Source and destination slots wrap a
//! caller-owned object the core never releases; an intermediate slot is
//! core-owned and holds a one-shot thunk plus the [`DeferredRefCount`] that
//! tracks its lazily-acquired payload's lifetime.

use std::any::Any;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::disposable::ErasedDisposable;
use crate::error::CoreError;
use crate::refcount::DeferredRefCount;

/// A one-shot acquisition closure bound to an intermediate handle at
/// minting time. Consumed exactly once, by the producing invocation, at
/// dispatch.
pub type Thunk = Box<dyn FnOnce() -> BoxFuture<'static, Result<Box<dyn ErasedDisposable>, CoreError>> + Send>;

/// The storage record a [`crate::handle::Handle`] resolves to.
pub enum Slot {
    /// A caller-owned input. Read-only; never released by the core.
    Source(Arc<dyn Any + Send + Sync>),
    /// A caller-owned output. Written once, by exactly one invocation
    /// (enforced by the graph resolver's duplicate-producer check, not by
    /// this type); never released by the core.
    Destination(Arc<dyn Any + Send + Sync>),
    /// A core-owned value, acquired lazily at the producing invocation's
    /// dispatch and released when the last consumer completes.
    Intermediate(IntermediateSlot),
}

/// The core-owned half of [`Slot`]: a thunk taken exactly once, and the
/// ref-counted cell its result is installed into.
pub struct IntermediateSlot {
    thunk: Mutex<Option<Thunk>>,
    cell: DeferredRefCount<Box<dyn ErasedDisposable>>,
}

impl IntermediateSlot {
    /// Registers a fresh intermediate slot bound to `thunk`.
    pub fn new(thunk: Thunk) -> Self {
        IntermediateSlot { thunk: Mutex::new(Some(thunk)), cell: DeferredRefCount::new() }
    }

    /// The ref-counted cell backing this slot's payload.
    pub fn cell(&self) -> &DeferredRefCount<Box<dyn ErasedDisposable>> {
        &self.cell
    }

    /// Takes the acquisition thunk, if it hasn't already run.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if called more than once — the producing
    /// invocation's generic body only ever prepares a given output once.
    pub fn take_thunk(&self) -> Result<Thunk, CoreError> {
        self.thunk
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CoreError::Logic("intermediate slot's thunk already consumed".into()))
    }
}
