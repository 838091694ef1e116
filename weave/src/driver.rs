//! The fan-out/fan-in execution loop (`spec.md` §4.7) and leak audit
//! (`spec.md` §4.8).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::context::DriverEvent;
use crate::error::CoreError;
use crate::invocation::InvocationId;
use crate::plan::Plan;
use crate::slot::Slot;

type Settlement = (InvocationId, Result<(), Arc<CoreError>>);

/// Drains `ready`, dispatching each invocation through the scheduler and
/// fanning completions back in, until nothing is ready and nothing is
/// in-flight. Implements the resolved open question from `spec.md` §9:
/// a failed producer's consumers are diverted to the same error without
/// ever running their body.
///
/// A [`CoreError::Reported`] never becomes `run`'s own error: it is routed
/// to [`crate::context::Context::report`] at the invocation that actually
/// raised it and otherwise treated as a normal (if unproductive) outcome.
/// Only `Logic`/`Precondition`/`Assertion` — [`CoreError::propagates`] —
/// are captured into `first_error` and returned from `run`.
pub(crate) async fn run(plan: &Plan, mut ready: VecDeque<InvocationId>) -> Result<(), CoreError> {
    let mut inflight: FuturesUnordered<BoxFuture<'static, Settlement>> = FuturesUnordered::new();
    let mut diverted: HashMap<InvocationId, Arc<CoreError>> = HashMap::new();
    let mut first_error: Option<Arc<CoreError>> = None;

    loop {
        while let Some(id) = ready.pop_front() {
            if let Some(err) = diverted.get(&id).cloned() {
                plan.context.log(DriverEvent::Settled { invocation: id.0, failed: true });
                if err.propagates() && first_error.is_none() {
                    first_error = Some(err.clone());
                }
                settle(plan, id, Err(err), &mut ready, &mut diverted);
                continue;
            }

            let body = take_body(plan, id)?;
            let task = body();
            let spawned = plan.context.scheduler.spawn(task);
            plan.context.log(DriverEvent::Dispatched { invocation: id.0 });
            inflight.push(Box::pin(async move {
                let result = spawned.await;
                (id, result.map_err(Arc::new))
            }));
        }

        let Some((id, result)) = inflight.next().await else {
            break;
        };
        plan.context.log(DriverEvent::Settled { invocation: id.0, failed: result.is_err() });
        if let Err(err) = &result {
            if err.propagates() {
                if first_error.is_none() {
                    first_error = Some(err.clone());
                }
            } else {
                plan.context.report(reported_clone(err));
            }
        }
        settle(plan, id, result, &mut ready, &mut diverted);
    }

    check_drained(plan)?;

    if let Some(err) = first_error {
        return Err(Arc::try_unwrap(err).unwrap_or_else(|shared| CoreError::Logic(shared.to_string())));
    }

    audit_leaks(plan)
}

/// Rebuilds an owned [`CoreError::Reported`] from a shared one so it can be
/// handed to the context's error sink without disturbing the `Arc` other
/// downstream invocations may still be diverted on.
fn reported_clone(err: &CoreError) -> CoreError {
    CoreError::reported_msg(err.to_string())
}

/// Takes an invocation's one-shot body, already wrapped with its
/// middleware chain by [`crate::invocation::record_invocation`].
fn take_body(plan: &Plan, id: InvocationId) -> Result<crate::middleware::Next, CoreError> {
    let inner = plan.inner.lock().unwrap();
    let invocation = inner
        .invocations
        .get(&id)
        .ok_or_else(|| CoreError::Logic("ready queue named an unknown invocation".into()))?;
    invocation
        .body
        .lock()
        .unwrap()
        .take()
        .ok_or_else(|| CoreError::Logic("invocation dispatched more than once".into()))
}

/// Propagates one invocation's outcome to its downstream `next` list,
/// marking them diverted on failure and enqueuing any that have now had
/// every blocker resolved.
fn settle(
    plan: &Plan,
    id: InvocationId,
    outcome: Result<(), Arc<CoreError>>,
    ready: &mut VecDeque<InvocationId>,
    diverted: &mut HashMap<InvocationId, Arc<CoreError>>,
) {
    let inner = plan.inner.lock().unwrap();
    let Some(invocation) = inner.invocations.get(&id) else { return };
    let next = invocation.next.lock().unwrap().clone();
    drop(inner);

    for downstream in next {
        if let Err(err) = &outcome {
            diverted.entry(downstream).or_insert_with(|| err.clone());
        }
        let inner = plan.inner.lock().unwrap();
        let Some(downstream_invocation) = inner.invocations.get(&downstream) else { continue };
        let resolved = downstream_invocation.num_resolved_blockers.fetch_add(1, Ordering::AcqRel) + 1;
        let total = downstream_invocation.num_blockers.load(Ordering::Acquire);
        let is_dead = inner.dead_invocations.contains(&downstream);
        drop(inner);
        if resolved == total && !is_dead {
            ready.push_back(downstream);
        }
    }
}

/// Every live invocation's blockers must eventually all resolve; if the
/// drain loop above ran dry with some live invocation still short of that,
/// the plan body built a cycle (`spec.md` §4.5/§9). Dead invocations (see
/// `crate::graph::resolve`) are exempt — they were deliberately never
/// dispatched, not stuck.
fn check_drained(plan: &Plan) -> Result<(), CoreError> {
    let inner = plan.inner.lock().unwrap();
    for invocation in inner.invocations.values() {
        if inner.dead_invocations.contains(&invocation.id) {
            continue;
        }
        let resolved = invocation.num_resolved_blockers.load(Ordering::Acquire);
        let total = invocation.num_blockers.load(Ordering::Acquire);
        if resolved < total {
            return Err(CoreError::Logic("computation graph has a cycle".into()));
        }
    }
    Ok(())
}

/// Walks every intermediate slot once the drain loop has finished; only
/// active when [`crate::context::ContextOptions::assert_no_leak`] is set.
/// Slots produced only by a dead invocation were never acquired in the
/// first place and are exempt, same as source/destination slots.
fn audit_leaks(plan: &Plan) -> Result<(), CoreError> {
    if !plan.context.assert_no_leak {
        return Ok(());
    }
    let inner = plan.inner.lock().unwrap();
    let dead_outputs: std::collections::HashSet<_> = inner
        .invocations
        .values()
        .filter(|invocation| inner.dead_invocations.contains(&invocation.id))
        .flat_map(|invocation| invocation.outputs.iter().map(|raw| raw.id))
        .collect();
    let mut first: Option<CoreError> = None;
    for (handle_id, slot) in inner.slots.iter() {
        if dead_outputs.contains(handle_id) {
            continue;
        }
        if let Slot::Intermediate(islot) = slot {
            if !islot.cell().is_freed() {
                plan.context.log(DriverEvent::LeakDetected { handle: handle_id.0 });
                if first.is_none() {
                    first = Some(CoreError::Assertion(format!(
                        "intermediate slot {:?} was never freed",
                        handle_id
                    )));
                }
            }
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
