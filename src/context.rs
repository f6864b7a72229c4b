//! Execution-scoped tracking of the current span.
//!
//! The context tracker answers one question: which span should become the
//! implicit parent of a span created with no explicit parent? The answer must
//! be scoped to the current logical branch of execution. When control forks
//! into independent continuations, each carries its own view of the current
//! span inherited at the fork point; a rebind inside one branch persists
//! across that branch's polls but never leaks into a sibling branch.
//!
//! Synchronous code scopes the current span with [`Context::attach`] guards.
//! Asynchronous branches wrap their futures with
//! [`FutureExt::with_current_context`], which snapshots the context at the
//! fork point and swaps it in around every poll.

use crate::span::TraceSpan;
use futures_core::stream::Stream;
use futures_sink::Sink;
use pin_project_lite::pin_project;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// Replaces the active branch's context, returning the previous one.
fn swap_current(cx: Context) -> Context {
    CURRENT_CONTEXT
        .try_with(|current| current.replace(cx))
        .unwrap_or_default()
}

/// An execution-scoped value carrying the current span.
///
/// Contexts are cheap to clone; cloning snapshots the view of the branch at
/// that moment.
#[derive(Clone, Default)]
pub struct Context {
    span: Option<TraceSpan>,
}

impl Context {
    /// Creates an empty context with no current span.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns a snapshot of the active branch's context.
    pub fn current() -> Self {
        Context::map_current(|cx| cx.clone())
    }

    /// Applies a function to a snapshot of the active branch's context.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        match CURRENT_CONTEXT.try_with(|cx| cx.borrow().clone()) {
            Ok(cx) => f(&cx),
            Err(_) => f(&Context::default()),
        }
    }

    /// The span carried by this context, if any.
    pub fn span(&self) -> Option<&TraceSpan> {
        self.span.as_ref()
    }

    /// Returns a copy of this context carrying `span` as current.
    pub fn with_span(&self, span: TraceSpan) -> Self {
        Context { span: Some(span) }
    }

    /// The active branch's current span, if any.
    pub fn current_span() -> Option<TraceSpan> {
        Context::map_current(|cx| cx.span.clone())
    }

    /// Rebinds the active branch's current span without a restoring guard.
    ///
    /// This is the lifecycle engine's entry point: span creation and
    /// `close_context` step the branch pointer forward and backward. Unlike
    /// [`attach`](Context::attach), the rebind persists for the rest of the
    /// branch.
    pub(crate) fn rebind_span(span: Option<TraceSpan>) {
        let _ = CURRENT_CONTEXT.try_with(|cx| cx.borrow_mut().span = span);
    }

    /// Replaces the active branch's context with this one.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previous context.
    /// Rebinds made while the guard is live are discarded with it; use
    /// [`FutureExt::with_context`] for branches that must keep their rebinds
    /// across polls.
    pub fn attach(self) -> ContextGuard {
        let previous_cx = CURRENT_CONTEXT
            .try_with(|current| current.replace(self))
            .ok();

        ContextGuard {
            previous_cx,
            _marker: PhantomData,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("span", &self.span.as_ref().map(|s| s.id()))
            .finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[allow(missing_debug_implementations)]
pub struct ContextGuard {
    previous_cx: Option<Context>,
    // ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous_cx) = self.previous_cx.take() {
            let _ = CURRENT_CONTEXT.try_with(|current| current.replace(previous_cx));
        }
    }
}

pin_project! {
    /// A future, stream, or sink carrying its branch's context.
    ///
    /// The stored context is swapped in around every poll and the (possibly
    /// rebound) context is captured back out afterwards, so the branch keeps
    /// a persistent, isolated view of the current span across polls.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T> WithContext<T> {
    fn scoped<R>(cx: &mut Context, f: impl FnOnce() -> R) -> R {
        let snapshot = swap_current(cx.clone());
        let output = f();
        *cx = swap_current(snapshot);
        output
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let inner = this.inner;
        Self::scoped(this.cx, || inner.poll(task_cx))
    }
}

impl<T: Stream> Stream for WithContext<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let inner = this.inner;
        Self::scoped(this.cx, || T::poll_next(inner, task_cx))
    }
}

impl<I, T: Sink<I>> Sink<I> for WithContext<T> {
    type Error = T::Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let inner = this.inner;
        Self::scoped(this.cx, || T::poll_ready(inner, task_cx))
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        let this = self.project();
        let inner = this.inner;
        Self::scoped(this.cx, || T::start_send(inner, item))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let inner = this.inner;
        Self::scoped(this.cx, || T::poll_flush(inner, task_cx))
    }

    fn poll_close(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let inner = this.inner;
        Self::scoped(this.cx, || T::poll_close(inner, task_cx))
    }
}

impl<T: Sized> FutureExt for T {}

/// Extension trait attaching contexts to futures, streams, and sinks.
pub trait FutureExt: Sized {
    /// Attaches the provided [`Context`] to this type, returning a
    /// [`WithContext`] wrapper.
    ///
    /// While the wrapped future, stream, or sink is being polled, the
    /// attached context is the branch's current context.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches a snapshot of the active branch's [`Context`] to this type,
    /// returning a [`WithContext`] wrapper.
    fn with_current_context(self) -> WithContext<Self> {
        let cx = Context::current();
        self.with_context(cx)
    }
}
