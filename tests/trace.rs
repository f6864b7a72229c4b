//! End-to-end lifecycle tests driving the public API the way an
//! instrumented serverless handler would.

use serverless_trace::{
    Context, FutureExt, InMemorySpanObserver, SpanBuilder, SpanEventKind, TagValue, Tracer,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Poll, RawWaker, RawWakerVTable, Waker};

fn noop_waker() -> Waker {
    const VTABLE: RawWakerVTable = RawWakerVTable::new(|_| RAW, |_| {}, |_| {}, |_| {});
    const RAW: RawWaker = RawWaker::new(std::ptr::null(), &VTABLE);
    // SAFETY: the vtable functions are all no-ops over a null pointer.
    unsafe { Waker::from_raw(RAW) }
}

/// Completes on its second poll.
struct YieldOnce {
    polled: bool,
}

impl YieldOnce {
    fn new() -> Self {
        YieldOnce { polled: false }
    }
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[test]
fn invocation_with_nested_work_serializes_a_closed_tree() {
    let observer = InMemorySpanObserver::new();
    let tracer = Tracer::builder().with_observer(observer.clone()).build();

    let invocation = tracer.start("aws.lambda.invocation").unwrap();
    invocation.set_tag("aws.lambda.outcome", "success").unwrap();

    let query = tracer.start("db.query").unwrap();
    query.set_tag("db.statement", "select 1").unwrap();
    query.close().unwrap();

    let request = tracer
        .build(SpanBuilder::new("http.request").with_tag("http.status_code", 200))
        .unwrap();
    request.close().unwrap();

    invocation.close().unwrap();

    let spans = invocation.spans();
    assert_eq!(spans.len(), 3);
    for span in &spans {
        assert!(span.is_closed());
        assert_eq!(span.trace_id(), invocation.trace_id());
    }

    let wire = invocation.wire_view().unwrap();
    assert_eq!(wire.trace_id.len(), 32);
    assert_eq!(wire.tags["aws"]["lambda"]["outcome"], serde_json::json!(1));
    let request_wire = request.wire_view().unwrap();
    assert_eq!(
        request_wire.tags["http"]["statusCode"],
        serde_json::json!(200)
    );
    assert_eq!(
        request_wire.parent_span_id,
        Some(invocation.id().to_string().into_bytes())
    );

    // Four opens, four closes... minus the span that never existed.
    let events = observer.events();
    let opens = events
        .iter()
        .filter(|e| e.kind == SpanEventKind::Open)
        .count();
    let closes = events
        .iter()
        .filter(|e| e.kind == SpanEventKind::Close)
        .count();
    assert_eq!(opens, 3);
    assert_eq!(closes, 3);
}

#[test]
fn root_closure_sweeps_open_descendants() {
    let observer = InMemorySpanObserver::new();
    let tracer = Tracer::builder().with_observer(observer.clone()).build();

    let invocation = tracer.start("aws.lambda.invocation").unwrap();
    let leftover = tracer.start("db.query").unwrap();

    invocation.close().unwrap();

    assert_eq!(leftover.end_time(), invocation.end_time());
    let closes: Vec<_> = observer
        .events()
        .into_iter()
        .filter(|e| e.kind == SpanEventKind::Close)
        .map(|e| e.span.name().to_owned())
        .collect();
    assert_eq!(closes, ["db.query", "aws.lambda.invocation"]);
}

#[test]
fn forced_close_hook_can_record_an_outcome() {
    let tracer = Tracer::new();
    let invocation = tracer.start("aws.lambda.invocation").unwrap();
    let request = tracer
        .build(
            SpanBuilder::new("http.request").with_on_forced_close(|span| {
                span.set_tag("http.aborted", true).unwrap();
            }),
        )
        .unwrap();

    invocation.close().unwrap();

    assert!(request.is_closed());
    assert_eq!(request.tag("http.aborted"), Some(TagValue::Bool(true)));
}

#[test]
fn debug_view_tracks_the_open_span() {
    let tracer = Tracer::new();
    let span = tracer.start("aws.lambda.invocation").unwrap();
    span.set_tag("aws.lambda.request_id", "r-1").unwrap();

    let open = span.debug_view().unwrap();
    assert!(open.end_time.is_none());
    assert_eq!(
        open.tags["aws.lambda.request_id"],
        serde_json::json!("r-1")
    );

    span.close().unwrap();
    let closed = span.debug_view().unwrap();
    assert!(closed.end_time.is_some());
}

#[test]
fn concurrent_branches_keep_isolated_current_spans() {
    let tracer = Tracer::new();
    let root = tracer.start("aws.lambda.invocation").unwrap();

    let seen_a = Arc::new(Mutex::new(None));
    let seen_b = Arc::new(Mutex::new(None));

    let tracer_a = tracer.clone();
    let out_a = Arc::clone(&seen_a);
    let branch_a = async move {
        let span = tracer_a.start("db.query").unwrap();
        YieldOnce::new().await;
        // The branch's current span survives the suspension.
        assert_eq!(Context::current_span(), Some(span.clone()));
        span.close().unwrap();
        *out_a.lock().unwrap() = Some(span);
    }
    .with_current_context();

    let tracer_b = tracer.clone();
    let out_b = Arc::clone(&seen_b);
    let branch_b = async move {
        let span = tracer_b.start("http.request").unwrap();
        YieldOnce::new().await;
        assert_eq!(Context::current_span(), Some(span.clone()));
        span.close().unwrap();
        *out_b.lock().unwrap() = Some(span);
    }
    .with_current_context();

    let waker = noop_waker();
    let mut task_cx = std::task::Context::from_waker(&waker);
    let mut branch_a = Box::pin(branch_a);
    let mut branch_b = Box::pin(branch_b);

    // Interleave the two branches; each suspends once mid-span.
    assert!(branch_a.as_mut().poll(&mut task_cx).is_pending());
    assert!(branch_b.as_mut().poll(&mut task_cx).is_pending());
    assert!(branch_a.as_mut().poll(&mut task_cx).is_ready());
    assert!(branch_b.as_mut().poll(&mut task_cx).is_ready());

    // Both spans parented on the root, not on each other.
    let span_a = seen_a.lock().unwrap().clone().unwrap();
    let span_b = seen_b.lock().unwrap().clone().unwrap();
    assert_eq!(span_a.parent(), Some(root.clone()));
    assert_eq!(span_b.parent(), Some(root.clone()));

    // The fork-point context on this thread is untouched.
    assert_eq!(Context::current_span(), Some(root));
}

#[test]
fn block_on_branch_inherits_and_restores_context() {
    let tracer = Tracer::new();
    let root = tracer.start("aws.lambda.invocation").unwrap();

    let tracer_inner = tracer.clone();
    let root_inner = root.clone();
    futures_executor::block_on(
        async move {
            let span = tracer_inner.start("db.query").unwrap();
            assert_eq!(span.parent(), Some(root_inner));
            span.close().unwrap();
        }
        .with_current_context(),
    );

    assert_eq!(Context::current_span(), Some(root.clone()));
    assert_eq!(root.spans().len(), 2);
}

#[test]
fn builder_seeds_lifecycle_phases() {
    let tracer = Tracer::new();
    let entry = tracer
        .build(
            SpanBuilder::new("aws.lambda")
                .with_immediate_descendants(["aws.lambda.initialization"])
                .with_tag("aws.lambda.arch", "arm64"),
        )
        .unwrap();

    let phases = entry.spans();
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[1].name(), "aws.lambda.initialization");
    assert_eq!(phases[1].start_time(), entry.start_time());

    // Follow-up work lands under the open phase.
    let work = tracer.start("db.query").unwrap();
    assert_eq!(work.parent(), Some(phases[1].clone()));

    entry.close().unwrap();
    assert!(phases[1].is_closed());
    assert!(work.is_closed());
}
