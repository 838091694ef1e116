//! The `Plan`: handle minting, slot table, and the `run` entry point
//! (`spec.md` §3, §6).

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::context::Context;
use crate::disposable::{DisposableWrap, ErasedDisposable};
use crate::error::CoreError;
use crate::graph;
use crate::handle::{Handle, HandleId, PlanId, RawHandle};
use crate::id::IdGen;
use crate::invocation::{Invocation, InvocationId};
use crate::slot::{IntermediateSlot, Slot};

/// Lifecycle state of a [`Plan`]. Only the `initial -> ...` path is legal:
/// plans are single-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Initial,
    Planning,
    Running,
    Done,
    Error,
}

/// Tracks which direction (source or destination) an external object was
/// first registered under, so the opposite direction can be rejected.
enum ExternalBinding {
    Source(RawHandle),
    Destination(RawHandle),
}

pub(crate) struct PlanInner {
    pub(crate) plan_id: PlanId,
    handle_ids: IdGen,
    invocation_ids: IdGen,
    pub(crate) slots: HashMap<HandleId, Slot>,
    pub(crate) invocations: HashMap<InvocationId, Invocation>,
    external_registry: HashMap<(TypeId, usize), ExternalBinding>,
    pub(crate) state: PlanState,
    pub(crate) first_error: Option<CoreError>,
    /// Invocations unreachable, backward through producer edges, from any
    /// invocation writing a Destination output. Populated once by
    /// [`crate::graph::resolve`]; never dispatched, never ref-counted,
    /// exempt from the leak audit (`spec.md` §4.4's "dead-code elimination
    /// falls out of reachability").
    pub(crate) dead_invocations: HashSet<InvocationId>,
}

/// A single, single-shot run's handle-minting facade and slot table.
///
/// Cloning a `Plan` is cheap and shares the same underlying state — every
/// clone refers to the same run. The indirect routine builders and the
/// driver each hold their own clone.
#[derive(Clone)]
pub struct Plan {
    pub(crate) inner: Arc<Mutex<PlanInner>>,
    pub(crate) context: Context,
}

static PLAN_IDS: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

impl Plan {
    pub(crate) fn new(context: Context) -> Self {
        let plan_id = PlanId(PLAN_IDS.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        Plan {
            inner: Arc::new(Mutex::new(PlanInner {
                plan_id,
                handle_ids: IdGen::new(),
                invocation_ids: IdGen::new(),
                slots: HashMap::new(),
                invocations: HashMap::new(),
                external_registry: HashMap::new(),
                state: PlanState::Initial,
                first_error: None,
                dead_invocations: HashSet::new(),
            })),
            context,
        }
    }

    pub(crate) fn plan_id(&self) -> PlanId {
        self.inner.lock().unwrap().plan_id
    }

    fn mint_handle(&self, slot: Slot) -> RawHandle {
        let mut inner = self.inner.lock().unwrap();
        let id = HandleId(inner.handle_ids.next());
        inner.slots.insert(id, slot);
        RawHandle { plan: inner.plan_id, id }
    }

    pub(crate) fn mint_invocation_id(&self) -> InvocationId {
        InvocationId(self.inner.lock().unwrap().invocation_ids.next())
    }

    /// Registers a caller-owned input object, de-duplicating by its
    /// identity (`Arc` pointer) within this plan.
    ///
    /// # Errors
    /// [`CoreError::Precondition`] if the same object is already
    /// registered as a destination.
    pub fn source<T: Send + Sync + 'static>(&self, object: Arc<T>) -> Result<Handle<T>, CoreError> {
        self.register_external(object, true)
    }

    /// Registers a caller-owned output object, de-duplicating by its
    /// identity (`Arc` pointer) within this plan.
    ///
    /// # Errors
    /// [`CoreError::Precondition`] if the same object is already
    /// registered as a source.
    pub fn destination<T: Send + Sync + 'static>(&self, object: Arc<T>) -> Result<Handle<T>, CoreError> {
        self.register_external(object, false)
    }

    fn register_external<T: Send + Sync + 'static>(
        &self,
        object: Arc<T>,
        as_source: bool,
    ) -> Result<Handle<T>, CoreError> {
        let key = (TypeId::of::<T>(), Arc::as_ptr(&object) as *const () as usize);
        let mut inner = self.inner.lock().unwrap();
        if let Some(binding) = inner.external_registry.get(&key) {
            return match (binding, as_source) {
                (ExternalBinding::Source(raw), true) => Ok(Handle::from_raw(*raw)),
                (ExternalBinding::Destination(raw), false) => Ok(Handle::from_raw(*raw)),
                _ => Err(CoreError::Precondition(
                    "object already registered in the opposite direction".into(),
                )),
            };
        }
        let id = HandleId(inner.handle_ids.next());
        let raw = RawHandle { plan: inner.plan_id, id };
        inner.slots.insert(id, if as_source { Slot::Source(object) } else { Slot::Destination(object) });
        inner.external_registry.insert(
            key,
            if as_source { ExternalBinding::Source(raw) } else { ExternalBinding::Destination(raw) },
        );
        Ok(Handle::from_raw(raw))
    }

    /// Mints a fresh intermediate handle whose payload is computed lazily
    /// by `provide`, at the producing invocation's dispatch time.
    pub fn intermediate<T, F>(&self, provide: F) -> Handle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> BoxFuture<'static, Result<DisposableWrap<T>, CoreError>> + Send + 'static,
    {
        let thunk: crate::slot::Thunk = Box::new(move || {
            Box::pin(async move { provide().await.map(|w| Box::new(w) as Box<dyn ErasedDisposable>) })
        });
        let raw = self.mint_handle(Slot::Intermediate(IntermediateSlot::new(thunk)));
        Handle::from_raw(raw)
    }
}

/// Clones `T` out of whichever slot `handle` resolves to.
///
/// All three slot kinds restore by cloning: source/destination slots are
/// caller-owned (commonly `T = Arc<_>`, so cloning is an `Arc` bump, not a
/// deep copy) and intermediate slots restore a snapshot of their computed
/// value without holding any lock across the invocation body's `await`.
pub(crate) fn restore<T: Clone + Send + Sync + 'static>(
    inner: &PlanInner,
    raw: RawHandle,
) -> Result<T, CoreError> {
    let slot = inner
        .slots
        .get(&raw.id)
        .ok_or_else(|| CoreError::Logic("handle has no registered slot".into()))?;
    match slot {
        Slot::Source(arc) | Slot::Destination(arc) => downcast_clone(arc),
        Slot::Intermediate(islot) => islot
            .cell()
            .with(|boxed| boxed.downcast_ref::<T>().ok().and_then(|w| w.body().ok().cloned()))?
            .ok_or_else(|| CoreError::Logic("handle payload type mismatch or already released".into())),
    }
}

fn downcast_clone<T: Clone + 'static>(arc: &Arc<dyn Any + Send + Sync>) -> Result<T, CoreError> {
    arc.downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| CoreError::Logic("handle payload type mismatch".into()))
}

/// Creates a fresh [`Plan`], hands it to `body` for synchronous
/// construction, then resolves and executes it.
///
/// Returns the first propagating error ([`CoreError::Logic`],
/// `Precondition`, or `Assertion`) raised during construction, resolution,
/// or execution. `Reported` errors never surface here — they go to the
/// context's error sink.
pub async fn run<F>(context: &Context, body: F) -> Result<(), CoreError>
where
    F: FnOnce(&Plan) -> Result<(), CoreError>,
{
    let plan = Plan::new(context.clone());
    plan.inner.lock().unwrap().state = PlanState::Planning;

    if let Err(err) = body(&plan) {
        plan.inner.lock().unwrap().state = PlanState::Error;
        return Err(err);
    }

    let ready = match graph::resolve(&plan) {
        Ok(ready) => ready,
        Err(err) => {
            plan.inner.lock().unwrap().state = PlanState::Error;
            return Err(err);
        }
    };

    prepare_slots(&plan)?;

    plan.inner.lock().unwrap().state = PlanState::Running;
    let result = crate::driver::run(&plan, ready).await;

    let mut inner = plan.inner.lock().unwrap();
    match &result {
        Ok(()) => inner.state = PlanState::Done,
        Err(_) => inner.state = PlanState::Error,
    }
    drop(inner);
    result
}

/// Pre-commits one reservation per intermediate input, per `spec.md` §4.6,
/// before any invocation has dispatched. Dead invocations (see
/// [`PlanInner::dead_invocations`]) reserve nothing — they never dispatch,
/// so a reservation on their behalf would dangle forever.
pub(crate) fn prepare_slots(plan: &Plan) -> Result<(), CoreError> {
    let inner = plan.inner.lock().unwrap();
    for invocation in inner.invocations.values() {
        if inner.dead_invocations.contains(&invocation.id) {
            continue;
        }
        for input in &invocation.inputs {
            if let Some(Slot::Intermediate(islot)) = inner.slots.get(&input.id) {
                islot.cell().inc_ref()?;
            }
        }
    }
    Ok(())
}
