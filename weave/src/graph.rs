//! Dependency resolution: builds the producer map, links each
//! invocation's downstream `next` list, seeds the ready queue, and prunes
//! unreachable producers (`spec.md` §4.5, §4.4's dead-code elimination).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;

use crate::error::CoreError;
use crate::handle::HandleId;
use crate::invocation::InvocationId;
use crate::plan::Plan;
use crate::slot::Slot;

/// Resolves `plan`'s invocation graph, once, after the plan body has
/// finished registering every invocation.
///
/// # Errors
/// [`CoreError::Logic`] if two invocations claim the same output handle.
pub(crate) fn resolve(plan: &Plan) -> Result<VecDeque<InvocationId>, CoreError> {
    let mut inner = plan.inner.lock().unwrap();

    let mut producer: HashMap<HandleId, InvocationId> = HashMap::new();
    for invocation in inner.invocations.values() {
        for output in &invocation.outputs {
            if let Some(existing) = producer.insert(output.id, invocation.id) {
                if existing != invocation.id {
                    return Err(CoreError::Logic(format!(
                        "handle {:?} has more than one producing invocation",
                        output.id
                    )));
                }
            }
        }
    }

    for invocation in inner.invocations.values() {
        for input in &invocation.inputs {
            if let Some(&producer_id) = producer.get(&input.id) {
                let producer_invocation = inner
                    .invocations
                    .get(&producer_id)
                    .expect("producer map only ever names invocations recorded in this plan");
                producer_invocation.next.lock().unwrap().push(invocation.id);
                invocation.num_blockers.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let dead = dead_invocations(&inner, &producer);

    let ready = inner
        .invocations
        .values()
        .filter(|invocation| !dead.contains(&invocation.id))
        .filter(|invocation| invocation.num_blockers.load(Ordering::Relaxed) == 0)
        .map(|invocation| invocation.id)
        .collect();

    inner.dead_invocations = dead;

    Ok(ready)
}

/// An invocation is live if it writes a Destination output, or if any of
/// its outputs is consumed (directly or transitively) by a live
/// invocation. Everything else is dead: its thunk never runs, the pool it
/// would have drawn from never sees the acquire (`spec.md` §4.4).
fn dead_invocations(
    inner: &crate::plan::PlanInner,
    producer: &HashMap<HandleId, InvocationId>,
) -> HashSet<InvocationId> {
    let mut needed: HashSet<InvocationId> = inner
        .invocations
        .values()
        .filter(|invocation| {
            invocation.outputs.iter().any(|output| matches!(inner.slots.get(&output.id), Some(Slot::Destination(_))))
        })
        .map(|invocation| invocation.id)
        .collect();

    let mut queue: VecDeque<InvocationId> = needed.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        let Some(invocation) = inner.invocations.get(&id) else { continue };
        for input in &invocation.inputs {
            if let Some(&producer_id) = producer.get(&input.id) {
                if needed.insert(producer_id) {
                    queue.push_back(producer_id);
                }
            }
        }
    }

    inner.invocations.keys().filter(|id| !needed.contains(id)).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::disposable::DisposableWrap;
    use crate::invocation::{proc, to_func, ProcOpts};
    use std::sync::Arc;

    #[test]
    fn independent_invocations_are_all_ready() {
        let ctx = Context::default();
        let plan = Plan::new(ctx);
        let a = plan.source::<i32>(Arc::new(1)).unwrap();
        let dest1 = plan
            .destination::<Arc<std::sync::Mutex<Option<i32>>>>(Arc::new(Arc::new(std::sync::Mutex::new(None))))
            .unwrap();
        let dest2 = plan
            .destination::<Arc<std::sync::Mutex<Option<i32>>>>(Arc::new(Arc::new(std::sync::Mutex::new(None))))
            .unwrap();
        let identity = proc::<i32, Arc<std::sync::Mutex<Option<i32>>>, _>(ProcOpts::default(), |out, ins| {
            Box::pin(async move {
                *out.lock().unwrap() = Some(ins[0]);
                Ok(())
            })
        });
        identity.call(&plan, dest1, &[a]).unwrap();
        identity.call(&plan, dest2, &[a]).unwrap();
        let ready = resolve(&plan).unwrap();
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn chained_invocation_is_blocked_until_producer_resolves() {
        let ctx = Context::default();
        let plan = Plan::new(ctx);
        let a = plan.source::<i32>(Arc::new(1)).unwrap();
        let dest = plan
            .destination::<Arc<std::sync::Mutex<Option<i32>>>>(Arc::new(Arc::new(std::sync::Mutex::new(None))))
            .unwrap();
        let identity = proc::<i32, i32, _>(ProcOpts::default(), |_out, _ins| Box::pin(async { Ok(()) }));
        let doubled = to_func(&plan, &identity, &[a], |_ins: Vec<i32>| {
            Box::pin(async { Ok(DisposableWrap::new(0, |_| {})) })
        })
        .unwrap();
        let write = proc::<i32, Arc<std::sync::Mutex<Option<i32>>>, _>(ProcOpts::default(), |out, ins| {
            Box::pin(async move {
                *out.lock().unwrap() = Some(ins[0]);
                Ok(())
            })
        });
        write.call(&plan, dest, &[doubled]).unwrap();
        let ready = resolve(&plan).unwrap();
        // only the producer of `doubled` is ready initially
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn duplicate_producer_is_logic_error() {
        let ctx = Context::default();
        let plan = Plan::new(ctx);
        let a = plan.source::<i32>(Arc::new(1)).unwrap();
        let dest = plan
            .destination::<Arc<std::sync::Mutex<Option<i32>>>>(Arc::new(Arc::new(std::sync::Mutex::new(None))))
            .unwrap();
        let write = proc::<i32, Arc<std::sync::Mutex<Option<i32>>>, _>(ProcOpts::default(), |out, ins| {
            Box::pin(async move {
                *out.lock().unwrap() = Some(ins[0]);
                Ok(())
            })
        });
        write.call(&plan, dest, &[a]).unwrap();
        write.call(&plan, dest, &[a]).unwrap();
        assert!(matches!(resolve(&plan), Err(CoreError::Logic(_))));
    }
}
