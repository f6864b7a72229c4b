//! Span open/close notifications.
//!
//! Observers are the seam between the lifecycle engine and an exporter: every
//! span publishes an open notification right after creation and a close
//! notification after its end time is set (including forced closure by the
//! root). Transport, batching and retry live behind this seam and are out of
//! scope here.

use crate::span::TraceSpan;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Hooks for span open and close notifications.
///
/// Observers are registered when the tracer is built and are invoked in
/// registration order, synchronously on the calling branch. They must not
/// block and must not fail; an exporter that can fail should buffer here and
/// report problems through its own diagnostics.
///
/// Observers may re-enter the engine (tag or close spans); no engine lock is
/// held while an observer runs. Creating spans from a close notification
/// fails once the root has ended.
pub trait SpanObserver: Send + Sync + fmt::Debug {
    /// Called right after `span` is created and registered in the tree.
    fn on_open(&self, span: &TraceSpan);

    /// Called after `span`'s end time is set. Forced closures pass through
    /// here too, exactly once per span.
    fn on_close(&self, span: &TraceSpan);
}

/// Kind of a recorded span notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanEventKind {
    /// Span was opened.
    Open,
    /// Span was closed.
    Close,
}

/// One recorded notification.
#[derive(Clone, Debug)]
pub struct SpanEvent {
    /// Open or close.
    pub kind: SpanEventKind,
    /// Handle of the span the notification was published for.
    pub span: TraceSpan,
}

/// A [`SpanObserver`] that records notifications in memory.
///
/// Clones share the same buffer, so a copy can be kept for assertions while
/// the tracer owns the registered one. Intended for tests and for developing
/// exporters against the notification stream.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanObserver {
    events: Arc<Mutex<Vec<SpanEvent>>>,
}

impl InMemorySpanObserver {
    /// Creates an observer with an empty buffer.
    pub fn new() -> Self {
        InMemorySpanObserver::default()
    }

    /// Snapshot of the recorded notifications, in publication order.
    pub fn events(&self) -> Vec<SpanEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears the buffer.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, kind: SpanEventKind, span: &TraceSpan) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SpanEvent {
                kind,
                span: span.clone(),
            });
    }
}

impl SpanObserver for InMemorySpanObserver {
    fn on_open(&self, span: &TraceSpan) {
        self.record(SpanEventKind::Open, span);
    }

    fn on_close(&self, span: &TraceSpan) {
        self.record(SpanEventKind::Close, span);
    }
}
