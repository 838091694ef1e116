//! Around-advice wrapping over an invocation body (`spec.md` §4.7, §9).
//!
//! A middleware is handed a `next` thunk and must produce the dispatch
//! future itself, calling `next` exactly once (a contract the core does
//! not enforce, same as the original). The chain is built right-to-left so
//! the first middleware in the list is the outermost — the one that runs
//! first and returns last.

use std::sync::Arc;

use crate::scheduler::DispatchFuture;

/// The remaining chain, as a single callable thunk: call it to obtain the
/// dispatch future for everything further in.
pub type Next = Box<dyn FnOnce() -> DispatchFuture + Send>;

/// Around-advice over an invocation body.
pub trait Middleware: Send + Sync {
    /// Wraps `next`. Must invoke `next` exactly once to let the
    /// invocation (and any inner middleware) actually run.
    fn call(&self, next: Next) -> DispatchFuture;
}

/// Right-folds `middlewares` around `body`, outermost first, and invokes
/// the result to produce the final dispatch future.
///
/// `middlewares[0]` is outermost: it is the first to run and the last to
/// see the result bubble back up.
pub fn compose(middlewares: &[Arc<dyn Middleware>], body: Next) -> DispatchFuture {
    let mut next = body;
    for mw in middlewares.iter().rev() {
        let mw = mw.clone();
        next = Box::new(move || mw.call(next));
    }
    next()
}
