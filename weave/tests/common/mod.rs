//! Test-only "trivial object pool" collaborator referenced by the scenario
//! tests: hands out [`DisposableWrap`] values backed by a free list, so
//! tests can assert on high-water mark and acquire/release balance without
//! the library itself depending on any pooling concept.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use weave::{CoreError, DisposableWrap, Handle, Plan};

/// A destination payload restores by cloning the `Arc`, not the `Mutex`
/// underneath, so every registered destination in these tests is an
/// `Arc<Mutex<Option<T>>>` rather than a bare `Mutex<Option<T>>` — see
/// `DESIGN.md`'s note on restoring by clone.
pub fn register_destination<T: Send + Sync + 'static>(
    plan: &Plan,
) -> Result<(Arc<Mutex<Option<T>>>, Handle<Arc<Mutex<Option<T>>>>), CoreError> {
    let slot = Arc::new(Mutex::new(None));
    let handle = plan.destination::<Arc<Mutex<Option<T>>>>(Arc::new(slot.clone()))?;
    Ok((slot, handle))
}

struct Inner<T> {
    free: Vec<T>,
    outstanding: usize,
    high_water: usize,
}

/// A pool of reusable `T` buffers. `acquire` hands out a `DisposableWrap<T>`
/// whose release closure returns the value to the free list instead of
/// dropping it.
pub struct VecPool<T> {
    inner: Mutex<Inner<T>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl<T: Default + Send + 'static> VecPool<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(VecPool {
            inner: Mutex::new(Inner { free: Vec::new(), outstanding: 0, high_water: 0 }),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    /// Acquires a buffer, either reused from the free list or freshly
    /// defaulted, wrapped so that dropping/releasing it returns it to the
    /// pool.
    pub fn acquire(self: &Arc<Self>) -> DisposableWrap<T> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let value = {
            let mut inner = self.inner.lock().unwrap();
            let value = inner.free.pop().unwrap_or_default();
            inner.outstanding += 1;
            inner.high_water = inner.high_water.max(inner.outstanding);
            value
        };
        let pool = self.clone();
        DisposableWrap::new(value, move |value| {
            pool.releases.fetch_add(1, Ordering::SeqCst);
            let mut inner = pool.inner.lock().unwrap();
            inner.outstanding -= 1;
            inner.free.push(value);
        })
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().unwrap().high_water
    }
}
