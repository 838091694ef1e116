//! Process-scoped configuration, shared across many plan runs (`spec.md`
//! §3: "Context ... lives longer than any single plan").

use std::sync::Arc;
use std::time::Instant;

use weave_logging::{Logger, Registry};

use crate::error::CoreError;
use crate::scheduler::{InlineScheduler, Scheduler};

/// An error handed to the context's error sink: a [`CoreError::Reported`]
/// that never propagates out of [`crate::run`].
#[derive(Debug)]
pub struct ReportedError(pub CoreError);

/// Structured event emitted by the driver, for callers who bind a
/// [`weave_logging::Registry`] via [`ContextOptions::logging`].
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// An invocation was handed to the scheduler.
    Dispatched { invocation: u64 },
    /// An invocation settled, successfully or not.
    Settled { invocation: u64, failed: bool },
    /// An intermediate slot's ref-count reached zero and was released.
    SlotReleased { handle: u64 },
    /// A leak-audit violation was raised at the end of a run.
    LeakDetected { handle: u64 },
}

/// Configuration for one [`Context`]. Every field has a sensible default;
/// construct with [`ContextOptions::default`] and override selectively.
pub struct ContextOptions {
    /// Invoked for every [`CoreError::Reported`] raised during a run.
    /// Defaults to a no-op sink.
    pub report_error: Option<Box<dyn Fn(ReportedError) + Send + Sync>>,
    /// When `true`, a run whose intermediate slots are not all freed at
    /// completion fails with [`CoreError::Assertion`]. Defaults to `false`,
    /// matching the teacher's opt-in-to-strictness posture.
    pub assert_no_leak: bool,
    /// Strategy for driving invocation bodies to completion. Defaults to
    /// [`InlineScheduler`].
    pub scheduler: Option<Arc<dyn Scheduler>>,
    /// Structured event registry. When set, [`Context`] binds a
    /// [`DriverEvent`] logger under the name `"weave"`.
    pub logging: Option<Registry>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            report_error: None,
            assert_no_leak: false,
            scheduler: None,
            logging: None,
        }
    }
}

/// Process-scoped configuration: an error sink, a leak-audit flag, and a
/// scheduler. Constructed once and reused across many [`crate::plan::Plan`]
/// runs.
#[derive(Clone)]
pub struct Context {
    error_sink: Arc<dyn Fn(ReportedError) + Send + Sync>,
    pub(crate) assert_no_leak: bool,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) logger: Option<Logger<DriverEvent>>,
}

impl Context {
    /// Builds a context from the given options.
    pub fn new(options: ContextOptions) -> Self {
        let user_sink = options.report_error.unwrap_or_else(|| Box::new(|_| {}));
        // Wrapped once so a panicking sink can never take the driver down
        // with it; a sink is reporting a failure, it must not itself fail.
        let error_sink: Arc<dyn Fn(ReportedError) + Send + Sync> = Arc::new(move |err| {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| user_sink(err)));
        });
        let logger = options.logging.map(|registry| match registry.get::<DriverEvent>("weave") {
            Some(logger) => logger,
            None => {
                registry.insert::<DriverEvent>("weave", Box::new(|_elapsed, _batch| {}));
                registry.get::<DriverEvent>("weave").expect("just inserted")
            }
        });
        Context {
            error_sink,
            assert_no_leak: options.assert_no_leak,
            scheduler: options.scheduler.unwrap_or_else(|| Arc::new(InlineScheduler)),
            logger,
        }
    }

    /// Routes a [`CoreError::Reported`] to the configured sink.
    pub(crate) fn report(&self, error: CoreError) {
        (self.error_sink)(ReportedError(error));
    }

    /// Logs a driver event, if a registry was configured.
    pub(crate) fn log(&self, event: DriverEvent) {
        if let Some(logger) = &self.logger {
            logger.log(event);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(ContextOptions::default())
    }
}
