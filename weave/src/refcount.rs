//! `DeferredRefCount<T>`: a reference-counted cell whose managed object is
//! supplied after construction (`spec.md` §3/§4.2).
//!
//! The counter separates construction from initialization because the
//! producing invocation decides the payload at dispatch time, while
//! downstream invocations must already have called [`DeferredRefCount::inc_ref`]
//! during planning — *before* the producer has run — to reserve their
//! consumption. [`DeferredRefCount::initialize`] folds those early
//! reservations into the live count, plus one for the producer's own
//! implicit hold (released by the producer's own tail `dec_ref`, which is
//! what lets a produced-but-never-consumed output still get released; see
//! `spec.md` §8 scenario 3). No cyclic structures are ever built over these
//! cells, so (per `spec.md` §9) no weak-reference machinery is needed — a
//! plain `Mutex<RefState<T>>` suffices.

use std::sync::Mutex;

use crate::error::CoreError;

#[derive(Debug)]
enum RefState<T> {
    /// Not yet initialized; `reserved` counts `inc_ref` calls made ahead
    /// of initialization (during planning).
    Uninit { reserved: usize },
    Live { count: usize, value: T },
    Freed,
}

/// A cell whose payload is installed once, after construction, and freed
/// exactly once when its reference count reaches zero.
pub struct DeferredRefCount<T> {
    state: Mutex<RefState<T>>,
}

impl<T> Default for DeferredRefCount<T> {
    fn default() -> Self {
        DeferredRefCount { state: Mutex::new(RefState::Uninit { reserved: 0 }) }
    }
}

impl<T> DeferredRefCount<T> {
    /// Creates a cell with no payload yet (`Uninit`, no reservations).
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the payload. The live count becomes one (the producer's
    /// own implicit hold) plus however many `inc_ref` reservations were
    /// made while still uninitialized.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if the cell was already initialized or freed.
    pub fn initialize(&self, value: T) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            RefState::Uninit { reserved } => {
                *state = RefState::Live { count: reserved + 1, value };
                Ok(())
            }
            RefState::Live { .. } => {
                Err(CoreError::Logic("DeferredRefCount initialized twice".into()))
            }
            RefState::Freed => {
                Err(CoreError::Logic("DeferredRefCount initialized after free".into()))
            }
        }
    }

    /// Reserves one more consumption site. Legal both before and after
    /// initialization; only illegal once freed.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if the cell is freed.
    pub fn inc_ref(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            RefState::Uninit { reserved } => {
                *reserved += 1;
                Ok(())
            }
            RefState::Live { count, .. } => {
                *count += 1;
                Ok(())
            }
            RefState::Freed => Err(CoreError::Logic("inc_ref called after free".into())),
        }
    }

    /// Releases one reference. At count 1, frees the cell and returns the
    /// payload for the caller to release; otherwise just decrements.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if the cell is `Uninit` or already `Freed`.
    pub fn dec_ref(&self) -> Result<Option<T>, CoreError> {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            RefState::Uninit { .. } => {
                Err(CoreError::Logic("dec_ref called while uninitialized".into()))
            }
            RefState::Live { count, .. } if *count > 1 => {
                *count -= 1;
                Ok(None)
            }
            RefState::Live { .. } => {
                match std::mem::replace(&mut *state, RefState::Freed) {
                    RefState::Live { value, .. } => Ok(Some(value)),
                    _ => unreachable!("matched Live above"),
                }
            }
            RefState::Freed => Err(CoreError::Logic("dec_ref called after free".into())),
        }
    }

    /// Reads the payload, if the cell is currently live.
    ///
    /// # Errors
    /// [`CoreError::Logic`] if the cell is not yet initialized or has
    /// already been freed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, CoreError> {
        let state = self.state.lock().unwrap();
        match &*state {
            RefState::Live { value, .. } => Ok(f(value)),
            RefState::Uninit { .. } => {
                Err(CoreError::Logic("access to DeferredRefCount while uninitialized".into()))
            }
            RefState::Freed => Err(CoreError::Logic("access to DeferredRefCount after free".into())),
        }
    }

    /// Mutably reads the payload, if the cell is currently live.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, CoreError> {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            RefState::Live { value, .. } => Ok(f(value)),
            RefState::Uninit { .. } => {
                Err(CoreError::Logic("access to DeferredRefCount while uninitialized".into()))
            }
            RefState::Freed => Err(CoreError::Logic("access to DeferredRefCount after free".into())),
        }
    }

    /// True once the cell has reached zero references and been freed.
    pub fn is_freed(&self) -> bool {
        matches!(*self.state.lock().unwrap(), RefState::Freed)
    }
}
