//! Instrumentation hooks.
//!
//! The core brackets every phase and operation with `begin`/`end` calls but
//! measures nothing itself. A [`Scope`] guarantees the `end` call: it fires
//! on drop, so an early return or `?` still closes the scope, reported as a
//! failure unless [`Scope::succeed`] was called.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use medshare_core::now_millis;

/// Handle tying an `end` call to its `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken(pub u64);

/// Receiver of begin/end notifications.
pub trait Instrumentation: Send + Sync {
    /// A labeled operation is starting.
    fn begin(&self, label: &str) -> ScopeToken;

    /// The operation identified by `token` finished.
    fn end(&self, token: ScopeToken, success: bool);
}

/// Instrumentation that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn begin(&self, _label: &str) -> ScopeToken {
        ScopeToken(0)
    }

    fn end(&self, _token: ScopeToken, _success: bool) {}
}

/// An open instrumentation scope. Ends when dropped.
#[must_use = "a scope ends as soon as it is dropped"]
pub struct Scope<'a, I: Instrumentation + ?Sized> {
    instrumentation: &'a I,
    token: ScopeToken,
    success: bool,
}

impl<'a, I: Instrumentation + ?Sized> Scope<'a, I> {
    /// Begin a scope.
    pub fn enter(instrumentation: &'a I, label: &str) -> Self {
        let token = instrumentation.begin(label);
        Self {
            instrumentation,
            token,
            success: false,
        }
    }

    /// End the scope as successful.
    pub fn succeed(mut self) {
        self.success = true;
    }

    /// End the scope according to `result`, passing it through.
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        if result.is_ok() {
            self.succeed();
        }
        result
    }
}

impl<I: Instrumentation + ?Sized> Drop for Scope<'_, I> {
    fn drop(&mut self) {
        self.instrumentation.end(self.token, self.success);
    }
}

/// A finished measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub label: String,
    /// Wall-clock start (Unix ms).
    pub started_at: i64,
    /// Elapsed time in microseconds.
    pub elapsed_us: u64,
    pub success: bool,
}

/// Instrumentation that keeps every measurement in memory.
#[derive(Debug, Default)]
pub struct Recorder {
    inner: Mutex<RecorderInner>,
}

#[derive(Debug, Default)]
struct RecorderInner {
    next: u64,
    open: HashMap<u64, OpenScope>,
    finished: Vec<Measurement>,
}

#[derive(Debug)]
struct OpenScope {
    label: String,
    started_at: i64,
    started: Instant,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished measurements, in completion order.
    pub fn measurements(&self) -> Vec<Measurement> {
        self.lock().finished.clone()
    }

    /// Finished measurements with the given label.
    pub fn measurements_for(&self, label: &str) -> Vec<Measurement> {
        self.lock()
            .finished
            .iter()
            .filter(|m| m.label == label)
            .cloned()
            .collect()
    }

    /// Number of scopes begun but not yet ended.
    pub fn open_scopes(&self) -> usize {
        self.lock().open.len()
    }

    /// Export finished measurements as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.lock().finished)
    }

    // A panic while holding the lock leaves the data consistent, so recover.
    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Instrumentation for Recorder {
    fn begin(&self, label: &str) -> ScopeToken {
        let mut inner = self.lock();
        inner.next += 1;
        let id = inner.next;
        inner.open.insert(
            id,
            OpenScope {
                label: label.to_string(),
                started_at: now_millis(),
                started: Instant::now(),
            },
        );
        ScopeToken(id)
    }

    fn end(&self, token: ScopeToken, success: bool) {
        let mut inner = self.lock();
        if let Some(scope) = inner.open.remove(&token.0) {
            inner.finished.push(Measurement {
                label: scope.label,
                started_at: scope.started_at,
                elapsed_us: scope.started.elapsed().as_micros() as u64,
                success,
            });
        }
    }
}
