//! `weave` is a dataflow execution library: callers build a [`Plan`] out of
//! declarative indirect routine calls over typed [`Handle`]s, then hand it
//! to [`run`], which resolves the invocation graph into a topological order
//! and drives it to completion through a pluggable [`Scheduler`].
//!
//! The crate is organized the way the plan it executes is: a handle and
//! slot layer for naming values, an invocation layer for recording routine
//! calls, a graph layer for resolving their dependencies, and a driver that
//! fans them out and back in.
//!
//! - [`handle`] / [`plan`] / [`slot`]: handle minting, the slot table, and
//!   the `Plan` facade that ties them together.
//! - [`invocation`]: the `proc`, `proc_n`, `to_func`, `to_func_n` builders.
//! - [`graph`]: producer map, blocker counts, ready-set seeding.
//! - [`driver`]: the fan-out/fan-in execution loop and leak audit.
//! - [`refcount`]: the deferred-initialization ref-counted cell backing
//!   every intermediate slot.
//! - [`disposable`]: the acquire/release contract for caller-managed
//!   resources.
//! - [`scheduler`]: the strategy for driving an invocation body to
//!   completion; [`scheduler::InlineScheduler`] by default.
//! - [`middleware`]: around-advice composition over an invocation's body.
//! - [`context`]: process-scoped configuration — error sink, leak-audit
//!   flag, scheduler, logging.
//! - [`error`]: the `Logic` / `Precondition` / `Assertion` / `Reported`
//!   taxonomy every fallible operation returns.
//! - [`id`]: monotonic opaque id minting shared by handles and invocations.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use weave::{run, Context, Handle, ProcOpts};
//! use weave::invocation::proc;
//!
//! futures::executor::block_on(async {
//!     let ctx = Context::default();
//!     run(&ctx, |plan| {
//!         let a = plan.source::<i32>(Arc::new(21))?;
//!         let dest = plan.destination::<Arc<Mutex<Option<i32>>>>(Arc::new(Arc::new(Mutex::new(None))))?;
//!         let double = proc::<i32, Arc<Mutex<Option<i32>>>, _>(ProcOpts::default(), |out, ins| {
//!             Box::pin(async move {
//!                 *out.lock().unwrap() = Some(ins[0] * 2);
//!                 Ok(())
//!             })
//!         });
//!         double.call(plan, dest, &[a])
//!     })
//!     .await
//! })
//! .unwrap();
//! ```

pub mod context;
pub mod disposable;
pub mod driver;
pub mod error;
pub mod graph;
pub mod handle;
pub mod id;
pub mod invocation;
pub mod middleware;
pub mod plan;
pub mod refcount;
pub mod scheduler;
pub mod slot;

pub use context::{Context, ContextOptions, DriverEvent, ReportedError};
pub use disposable::{DisposableWrap, Provider};
pub use error::CoreError;
pub use handle::{Handle, PlanId};
pub use invocation::{proc, proc_n, to_func, to_func_n, InvocationId, ProcOpts};
pub use middleware::Middleware;
pub use plan::{run, Plan, PlanState};
pub use refcount::DeferredRefCount;
pub use scheduler::{DispatchFuture, InlineScheduler, Scheduler};
