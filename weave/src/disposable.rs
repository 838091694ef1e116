//! Acquire/release contract for caller-managed resources (`spec.md` §4.1).
//!
//! `weave` never owns the objects bound to source, destination, or
//! intermediate slots — it only ever holds a [`DisposableWrap`] that the
//! caller's `provide` closure produced. [`Provider`] is offered purely as a
//! convenience for callers who want a uniform acquire-then-wrap shape (the
//! test pool in `tests/common` implements it); the core never calls it.

use std::any::Any;

use crate::error::CoreError;

/// A value paired with a release closure, invoked at most once.
///
/// Release runs synchronously — no `await` point may appear inside it, so a
/// panicking release can be caught with [`std::panic::catch_unwind`] and
/// turned into a [`CoreError::Reported`] instead of unwinding across the
/// driver's async dispatch loop.
pub struct DisposableWrap<T> {
    value: Option<T>,
    release: Option<Box<dyn FnOnce(T) + Send>>,
}

impl<T> DisposableWrap<T> {
    /// Wraps `value`, to be consumed by `release` on the first (and only)
    /// call to [`DisposableWrap::release`].
    pub fn new(value: T, release: impl FnOnce(T) + Send + 'static) -> Self {
        DisposableWrap { value: Some(value), release: Some(Box::new(release)) }
    }

    /// Borrows the held value.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if the wrap has already been released.
    pub fn body(&self) -> Result<&T, CoreError> {
        self.value.as_ref().ok_or_else(|| CoreError::Logic("DisposableWrap accessed after release".into()))
    }

    /// Mutably borrows the held value.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if the wrap has already been released.
    pub fn body_mut(&mut self) -> Result<&mut T, CoreError> {
        self.value.as_mut().ok_or_else(|| CoreError::Logic("DisposableWrap accessed after release".into()))
    }

    /// Runs the release closure, if it hasn't already run.
    ///
    /// Idempotent: a second call is a no-op returning `Ok(())`. A panic
    /// inside the closure is caught and reported rather than propagated.
    pub fn release(&mut self) -> Result<(), CoreError> {
        match (self.value.take(), self.release.take()) {
            (Some(value), Some(release)) => {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| release(value)))
                    .map_err(|payload| CoreError::reported_msg(panic_message(&payload)))
            }
            _ => Ok(()),
        }
    }
}

impl<T> Drop for DisposableWrap<T> {
    fn drop(&mut self) {
        // Safety net: a caller that forgets to release explicitly still
        // gets exactly one release call, just like an explicit one.
        let _ = self.release();
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "release closure panicked".to_string()
    }
}

/// A uniform acquire-then-wrap contract for caller-owned object pools.
///
/// `weave` itself never calls `acquire` — it is purely a convenience that
/// callers may implement for their own provisioning sources, so that a
/// `to_func` thunk can close over `provider.acquire(args)` instead of
/// hand-writing the wrap.
pub trait Provider<T> {
    /// Arguments needed to acquire one instance of `T`.
    type Args;

    /// Acquires a fresh `T`, wrapped with whatever release logic returns
    /// it to the provider (a pool, an allocator, or similar).
    async fn acquire(&self, args: Self::Args) -> Result<DisposableWrap<T>, CoreError>;
}

/// Type-erased storage for a `DisposableWrap<T>` of unknown `T`, used by
/// intermediate slots whose payload type varies per handle.
pub trait ErasedDisposable: Any + Send {
    /// Releases the underlying value, erased of its concrete type.
    fn release_erased(&mut self) -> Result<(), CoreError>;

    /// Upcasts to `Any` so the driver can downcast back to the concrete
    /// `DisposableWrap<T>` a consumer expects.
    fn as_any(&self) -> &dyn Any;

    /// Mutable counterpart of [`ErasedDisposable::as_any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> ErasedDisposable for DisposableWrap<T> {
    fn release_erased(&mut self) -> Result<(), CoreError> {
        self.release()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn ErasedDisposable {
    /// Downcasts to the concrete `DisposableWrap<T>`.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if `T` does not match the value's true type —
    /// this indicates a handle was paired with the wrong slot at plan
    /// construction.
    pub fn downcast_ref<T: 'static>(&self) -> Result<&DisposableWrap<T>, CoreError> {
        self.as_any()
            .downcast_ref::<DisposableWrap<T>>()
            .ok_or_else(|| CoreError::Logic("handle payload type mismatch".into()))
    }

    /// Mutable counterpart of [`<dyn ErasedDisposable>::downcast_ref`].
    pub fn downcast_mut<T: 'static>(&mut self) -> Result<&mut DisposableWrap<T>, CoreError> {
        self.as_any_mut()
            .downcast_mut::<DisposableWrap<T>>()
            .ok_or_else(|| CoreError::Logic("handle payload type mismatch".into()))
    }
}
