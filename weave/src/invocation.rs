//! Invocation records and the indirect routine builders (`proc`, `proc_n`,
//! `to_func`, `to_func_n`) — `spec.md` §3/§4.3/§4.4.
//!
//! Every output handle restores the same way an input does (see
//! `crate::plan::restore`): a destination's caller-owned container and an
//! intermediate's freshly-acquired buffer are both handed to the user body
//! as an owned clone (typically an `Arc`-wrapped container the body writes
//! into through its own interior mutability), rather than as a borrowed
//! reference held across the body's `await` points. This keeps every
//! dispatch future `Send` without requiring unsafe code, at the cost of
//! requiring output/input payload types to be `Clone` — documented in
//! DESIGN.md as the Rust-ownership adaptation of `spec.md`'s
//! reference-passing data model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::context::{Context, DriverEvent};
use crate::disposable::DisposableWrap;
use crate::error::CoreError;
use crate::handle::{Handle, RawHandle};
use crate::middleware::{Middleware, Next};
use crate::plan::{self, Plan, PlanInner};
use crate::scheduler::DispatchFuture;
use crate::slot::Slot;

/// Identifies one recorded invocation within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId(pub(crate) u64);

/// An immutable record of one scheduled routine call.
pub(crate) struct Invocation {
    pub(crate) id: InvocationId,
    pub(crate) inputs: Vec<RawHandle>,
    pub(crate) outputs: Vec<RawHandle>,
    pub(crate) body: Mutex<Option<Next>>,
    pub(crate) next: Mutex<Vec<InvocationId>>,
    pub(crate) num_blockers: AtomicUsize,
    pub(crate) num_resolved_blockers: AtomicUsize,
}

/// Options shared by every invocation a builder subsequently records.
#[derive(Default, Clone)]
pub struct ProcOpts {
    /// Captured at builder construction; applied, outermost first, to
    /// every invocation this builder records.
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

/// A builder for single-output indirect routines.
pub struct IndirectRoutine<I, O> {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    body: Arc<dyn Fn(O, Vec<I>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>,
}

/// A builder for routines with two or more outputs.
pub struct IndirectRoutineN<I, O> {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    body: Arc<dyn Fn(Vec<O>, Vec<I>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>,
}

/// Builds a single-output indirect routine.
pub fn proc<I, O, B>(opts: ProcOpts, body: B) -> IndirectRoutine<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    B: Fn(O, Vec<I>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync + 'static,
{
    IndirectRoutine { middlewares: Arc::from(opts.middlewares), body: Arc::new(body) }
}

/// Builds a multi-output indirect routine.
pub fn proc_n<I, O, B>(opts: ProcOpts, body: B) -> IndirectRoutineN<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    B: Fn(Vec<O>, Vec<I>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync + 'static,
{
    IndirectRoutineN { middlewares: Arc::from(opts.middlewares), body: Arc::new(body) }
}

impl<I, O> IndirectRoutine<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Records one invocation of this routine against `output`/`inputs`.
    ///
    /// # Errors
    /// [`CoreError::Precondition`] if any handle belongs to a different
    /// plan than `plan`.
    pub fn call(&self, plan: &Plan, output: Handle<O>, inputs: &[Handle<I>]) -> Result<(), CoreError> {
        check_same_plan(plan, output.raw(), inputs.iter().map(|h| h.raw()))?;
        let output_raw = output.raw();
        let input_raws: Vec<RawHandle> = inputs.iter().map(|h| h.raw()).collect();
        let body = self.body.clone();
        let next = build_single_output_body(plan.clone(), output_raw, input_raws.clone(), body);
        record_invocation(plan, input_raws, vec![output_raw], self.middlewares.clone(), next)
    }
}

impl<I, O> IndirectRoutineN<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Records one invocation of this routine against `outputs`/`inputs`.
    ///
    /// # Errors
    /// [`CoreError::Precondition`] if `outputs` is empty or any handle
    /// belongs to a different plan than `plan`.
    pub fn call(&self, plan: &Plan, outputs: &[Handle<O>], inputs: &[Handle<I>]) -> Result<(), CoreError> {
        if outputs.is_empty() {
            return Err(CoreError::Precondition("proc_n requires at least one output handle".into()));
        }
        check_same_plan(plan, outputs[0].raw(), outputs.iter().map(|h| h.raw()).chain(inputs.iter().map(|h| h.raw())))?;
        let output_raws: Vec<RawHandle> = outputs.iter().map(|h| h.raw()).collect();
        let input_raws: Vec<RawHandle> = inputs.iter().map(|h| h.raw()).collect();
        let body = self.body.clone();
        let next = build_multi_output_body(plan.clone(), output_raws.clone(), input_raws.clone(), body);
        record_invocation(plan, input_raws, output_raws, self.middlewares.clone(), next)
    }
}

fn check_same_plan(
    plan: &Plan,
    first: RawHandle,
    rest: impl Iterator<Item = RawHandle>,
) -> Result<(), CoreError> {
    let plan_id = plan.plan_id();
    if first.plan != plan_id {
        return Err(CoreError::Precondition("handle belongs to a different plan".into()));
    }
    for raw in rest {
        if raw.plan != plan_id {
            return Err(CoreError::Precondition("handle belongs to a different plan".into()));
        }
    }
    Ok(())
}

fn record_invocation(
    plan: &Plan,
    inputs: Vec<RawHandle>,
    outputs: Vec<RawHandle>,
    middlewares: Arc<[Arc<dyn Middleware>]>,
    next: Next,
) -> Result<(), CoreError> {
    let id = plan.mint_invocation_id();
    let wrapped: Next = {
        let middlewares = middlewares.clone();
        Box::new(move || crate::middleware::compose(&middlewares, next))
    };
    let invocation = Invocation {
        id,
        inputs,
        outputs,
        body: Mutex::new(Some(wrapped)),
        next: Mutex::new(Vec::new()),
        num_blockers: AtomicUsize::new(0),
        num_resolved_blockers: AtomicUsize::new(0),
    };
    plan.inner.lock().unwrap().invocations.insert(id, invocation);
    Ok(())
}

fn restore_inputs<I: Clone + Send + Sync + 'static>(
    inner: &PlanInner,
    inputs: &[RawHandle],
) -> Result<Vec<I>, CoreError> {
    inputs.iter().map(|raw| plan::restore::<I>(inner, *raw)).collect()
}

/// Acquires an intermediate output's payload (no-op for a destination).
fn prepare_output(plan: &Plan, output: RawHandle) -> BoxFuture<'static, Result<(), CoreError>> {
    let plan = plan.clone();
    Box::pin(async move {
        let thunk = {
            let inner = plan.inner.lock().unwrap();
            match inner.slots.get(&output.id) {
                Some(Slot::Destination(_)) | Some(Slot::Source(_)) => None,
                Some(Slot::Intermediate(islot)) => Some(islot.take_thunk()?),
                None => return Err(CoreError::Logic("output handle has no registered slot".into())),
            }
        };
        if let Some(thunk) = thunk {
            let disposable = thunk().await?;
            let inner = plan.inner.lock().unwrap();
            if let Some(Slot::Intermediate(islot)) = inner.slots.get(&output.id) {
                islot.cell().initialize(disposable)?;
            }
        }
        Ok(())
    })
}

/// Releases one reference on `handle`, if it names an intermediate slot;
/// no-op for source/destination handles.
fn release_if_intermediate(plan: &Plan, handle: RawHandle) -> Result<(), CoreError> {
    let freed = {
        let inner = plan.inner.lock().unwrap();
        match inner.slots.get(&handle.id) {
            Some(Slot::Intermediate(islot)) => islot.cell().dec_ref()?,
            _ => None,
        }
    };
    if let Some(mut disposable) = freed {
        let result = disposable.release_erased();
        plan.context.log(DriverEvent::SlotReleased { handle: handle.id.0 });
        if let Err(err) = result {
            plan.context.report(err);
        }
    }
    Ok(())
}

fn build_single_output_body<I, O>(
    plan: Plan,
    output: RawHandle,
    inputs: Vec<RawHandle>,
    body: Arc<dyn Fn(O, Vec<I>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>,
) -> Next
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    Box::new(move || -> DispatchFuture {
        Box::pin(async move {
            prepare_output(&plan, output).await?;
            let (input_values, output_value) = {
                let inner = plan.inner.lock().unwrap();
                let input_values = restore_inputs::<I>(&inner, &inputs)?;
                let output_value = plan::restore::<O>(&inner, output)?;
                (input_values, output_value)
            };
            let result = body(output_value, input_values).await;
            for raw in &inputs {
                release_if_intermediate(&plan, *raw)?;
            }
            release_if_intermediate(&plan, output)?;
            result
        })
    })
}

fn build_multi_output_body<I, O>(
    plan: Plan,
    outputs: Vec<RawHandle>,
    inputs: Vec<RawHandle>,
    body: Arc<dyn Fn(Vec<O>, Vec<I>) -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>,
) -> Next
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    Box::new(move || -> DispatchFuture {
        Box::pin(async move {
            for &output in &outputs {
                prepare_output(&plan, output).await?;
            }
            let (input_values, output_values) = {
                let inner = plan.inner.lock().unwrap();
                let input_values = restore_inputs::<I>(&inner, &inputs)?;
                let output_values = outputs
                    .iter()
                    .map(|raw| plan::restore::<O>(&inner, *raw))
                    .collect::<Result<Vec<_>, _>>()?;
                (input_values, output_values)
            };
            let result = body(output_values, input_values).await;
            for raw in &inputs {
                release_if_intermediate(&plan, *raw)?;
            }
            for &output in &outputs {
                release_if_intermediate(&plan, output)?;
            }
            result
        })
    })
}

/// Mints an intermediate handle whose buffer `provide` acquires lazily at
/// the producing invocation's dispatch, then invokes `routine` — a
/// reusable write-style body built with [`proc`] — against that
/// self-acquired buffer exactly as `routine.call` would run it against a
/// caller-supplied destination (`spec.md` §4.4). `provide` is a pure
/// acquisition step: it never computes the routine's result, only hands
/// back a fresh buffer (per `crate::disposable::Provider`'s contract) for
/// `routine`'s body to write into.
pub fn to_func<I, O, P>(
    plan: &Plan,
    routine: &IndirectRoutine<I, O>,
    inputs: &[Handle<I>],
    provide: P,
) -> Result<Handle<O>, CoreError>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    P: Fn(Vec<I>) -> BoxFuture<'static, Result<DisposableWrap<O>, CoreError>> + Send + Sync + 'static,
{
    let input_raws: Vec<RawHandle> = inputs.iter().map(|h| h.raw()).collect();
    let plan_for_thunk = plan.clone();
    let provide = Arc::new(provide);
    let output = plan.intermediate::<O, _>(move || {
        let plan = plan_for_thunk.clone();
        let input_raws = input_raws.clone();
        let provide = provide.clone();
        Box::pin(async move {
            let values = {
                let inner = plan.inner.lock().unwrap();
                restore_inputs::<I>(&inner, &input_raws)?
            };
            provide(values).await
        })
    });
    routine.call(plan, output, inputs)?;
    Ok(output)
}

/// Multi-output counterpart of [`to_func`]: one `provide` thunk per output,
/// all driven by a single shared `routine` built with [`proc_n`]
/// (`spec.md` §4.4).
pub fn to_func_n<I, O, P>(
    plan: &Plan,
    routine: &IndirectRoutineN<I, O>,
    inputs: &[Handle<I>],
    provides: Vec<P>,
) -> Result<Vec<Handle<O>>, CoreError>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    P: Fn(Vec<I>) -> BoxFuture<'static, Result<DisposableWrap<O>, CoreError>> + Send + Sync + 'static,
{
    if provides.is_empty() {
        return Err(CoreError::Precondition("to_func_n requires at least one provide thunk".into()));
    }
    let input_raws: Vec<RawHandle> = inputs.iter().map(|h| h.raw()).collect();
    let outputs: Vec<Handle<O>> = provides
        .into_iter()
        .map(|provide| {
            let plan_for_thunk = plan.clone();
            let input_raws = input_raws.clone();
            let provide = Arc::new(provide);
            plan.intermediate::<O, _>(move || {
                let plan = plan_for_thunk.clone();
                let input_raws = input_raws.clone();
                let provide = provide.clone();
                Box::pin(async move {
                    let values = {
                        let inner = plan.inner.lock().unwrap();
                        restore_inputs::<I>(&inner, &input_raws)?
                    };
                    provide(values).await
                })
            })
        })
        .collect();
    routine.call(plan, &outputs, inputs)?;
    Ok(outputs)
}
