//! Typed event registry and buffering logger, used by `weave` to report
//! structured diagnostics (invocation dispatch, settlement, slot release,
//! leak-audit violations) without committing callers to any particular
//! tracing backend.
//!
//! The shape follows the teacher's own in-house logging crate: a
//! [`Registry`] binds a name to an action taken on batches of typed events,
//! and a [`Logger`] is a cheap, cloneable handle that buffers events and
//! flushes them to the bound action at capacity or on an explicit
//! [`Logger::flush`]. Unlike the single-threaded original (`Rc`/`RefCell`)
//! this registry is `Send + Sync` throughout, since `weave`'s driver may
//! dispatch invocation bodies across multiple scheduler worker threads.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A map from names to typed loggers, sharing one common time origin.
#[derive(Clone)]
pub struct Registry {
    time: Instant,
    map: Arc<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>>,
}

impl Registry {
    /// Creates a new, empty logger registry.
    pub fn new(time: Instant) -> Self {
        Registry {
            time,
            map: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Binds a log name to an action on log event batches.
    ///
    /// Returns any previously bound action for this name, rather than
    /// silently pivoting the logging destination mid-stream. Loggers
    /// retrieved with [`Registry::get`] before this call keep writing to
    /// whichever action was current when they were retrieved.
    pub fn insert<T: 'static + Send>(
        &self,
        name: impl Into<String>,
        action: Box<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>,
    ) -> Option<Box<dyn Any + Send + Sync>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.lock().unwrap().insert(name.into(), Box::new(logger))
    }

    /// Removes a bound logger, signalling end-of-stream to its action.
    pub fn remove(&self, name: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.map.lock().unwrap().remove(name)
    }

    /// Retrieves a shared logger, if one has been bound under this name.
    pub fn get<T: 'static + Send>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .lock()
            .unwrap()
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }
}

/// A buffering, cloneable handle to a named event stream.
pub struct Logger<T> {
    time: Instant,
    action: Arc<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>,
    buffer: Arc<Mutex<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: self.action.clone(),
            buffer: self.buffer.clone(),
        }
    }
}

const DEFAULT_CAPACITY: usize = 1024;

impl<T> Logger<T> {
    /// Allocates a new logger bound to a write destination.
    fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>) -> Self {
        Logger {
            time,
            action: Arc::from(action),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(DEFAULT_CAPACITY))),
        }
    }

    /// Logs an event, timestamped at the moment of the call.
    ///
    /// The event may sit in the buffer until capacity is reached or
    /// [`Logger::flush`] is called explicitly.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes any buffered events to the bound action.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn logs_flush_on_explicit_call() {
        let registry = Registry::new(Instant::now());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        registry.insert::<u32>(
            "events",
            Box::new(move |_time, batch| {
                seen2.fetch_add(batch.len(), Ordering::SeqCst);
            }),
        );
        let logger = registry.get::<u32>("events").unwrap();
        logger.log(1);
        logger.log(2);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        logger.flush();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn logs_flush_at_capacity() {
        let registry = Registry::new(Instant::now());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        registry.insert::<u32>(
            "events",
            Box::new(move |_time, batch| {
                seen2.fetch_add(batch.len(), Ordering::SeqCst);
            }),
        );
        let logger = registry.get::<u32>("events").unwrap();
        for i in 0..DEFAULT_CAPACITY {
            logger.log(i as u32);
        }
        assert_eq!(seen.load(Ordering::SeqCst), DEFAULT_CAPACITY);
    }

    #[test]
    fn missing_stream_returns_none() {
        let registry = Registry::new(Instant::now());
        assert!(registry.get::<u32>("nope").is_none());
    }

    #[test]
    fn rebinding_returns_previous_action() {
        let registry = Registry::new(Instant::now());
        registry.insert::<u32>("events", Box::new(|_, _| {}));
        let previous = registry.insert::<u32>("events", Box::new(|_, _| {}));
        assert!(previous.is_some());
    }
}
