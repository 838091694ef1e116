//! The error taxonomy consumed throughout the core (`spec.md` §7).
//!
//! `Logic`, `Precondition`, and `Assertion` propagate out of [`crate::run`]
//! to the caller. `Reported` never does — it is handed to the owning
//! [`crate::context::Context`]'s error sink and swallowed.

use std::fmt;

/// An error raised anywhere in the plan/invocation/driver machinery.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// An internal inconsistency: a slot was the wrong kind for the
    /// context it was accessed in, a handle had no registered slot, two
    /// invocations claimed the same output handle, or similar. Should
    /// never fire in a correct caller; if it does, it is a bug in `weave`
    /// itself or in a hand-built (non-builder) invocation graph.
    #[error("logic error: {0}")]
    Logic(String),

    /// Misuse by the caller: handles drawn from more than one plan, an
    /// empty handle list where at least one handle is required, or the
    /// same external object registered as both a source and a destination.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A leak-audit violation: an intermediate slot was not `freed` at the
    /// end of a successful run with `assert_no_leak` enabled.
    #[error("leak detected: {0}")]
    Assertion(String),

    /// An error raised by a user invocation body, a middleware, or a
    /// `DisposableWrap` release closure. Routed to the context's error
    /// sink; never propagates out of [`crate::run`].
    #[error("reported error: {source}")]
    Reported {
        /// The underlying error as the caller raised it.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CoreError {
    /// Builds a [`CoreError::Reported`] from any boxable error.
    pub fn reported(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        CoreError::Reported { source: Box::new(source) }
    }

    /// Builds a [`CoreError::Reported`] from a plain message, for user
    /// bodies and middleware that don't have a richer error type to wrap.
    pub fn reported_msg(message: impl Into<String>) -> Self {
        CoreError::Reported { source: Box::new(Message(message.into())) }
    }

    /// True for the three variants that propagate out of [`crate::run`].
    pub fn propagates(&self) -> bool {
        !matches!(self, CoreError::Reported { .. })
    }
}

#[derive(Debug)]
struct Message(String);
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl std::error::Error for Message {}
