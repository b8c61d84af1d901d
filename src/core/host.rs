// src/core/host.rs

// Capabilities the hosting environment injects into a run. The pipeline
// never talks to a concrete event bus or clock; it only sees these traits,
// which keeps the enrichment logic testable in isolation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::models::ScanEvent;

/// Receives the findings produced by a run, in emission order.
pub trait EventSink {
    fn emit(&mut self, event: ScanEvent);
}

/// Host-provided run services: the cooperative cancellation signal and the
/// clock used for record age checks.
pub trait RunContext {
    /// Polled between per-address queries so a long netblock expansion can
    /// be aborted between addresses, but never mid-query.
    fn should_stop(&self) -> bool;

    fn now(&self) -> DateTime<Utc>;
}

/// The real-world context: wall-clock time plus a shared stop flag that a
/// signal handler can flip from another task.
#[derive(Debug, Default)]
pub struct LiveContext {
    stop: Arc<AtomicBool>,
}

impl LiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle the host can hand to a ctrl-c handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

impl RunContext for LiveContext {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A sink that simply accumulates everything emitted. Used by the CLI to
/// build the end-of-run report, and by tests to assert on event order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub events: Vec<ScanEvent>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: ScanEvent) {
        self.events.push(event);
    }
}
