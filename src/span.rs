//! Span tree lifecycle.
//!
//! A [`Tracer`] owns one trace at a time: an arena of span records indexed by
//! id, plus the registered observers. Spans are created through a
//! [`SpanBuilder`], parented on the context tracker's current span, and closed
//! either by their owner or, as a last resort, by the root when the invocation
//! ends. Closing the root always yields a fully-closed tree: still-open
//! descendants get their forced-close hook invoked and are then closed at the
//! root's end time, trading possibly truncated durations for guaranteed
//! emission.
//!
//! [`TraceSpan`] handles are cheap clones; the records they point at are owned
//! by the tracer's arena. The parent link is an id back-reference only, the
//! children list is the sole ownership edge, so the tree cannot form an
//! ownership cycle.

use crate::context::Context;
use crate::error::{TraceError, TraceResult};
use crate::ids::{SpanId, TraceId};
use crate::name;
use crate::observer::SpanObserver;
use crate::tags::{TagValue, Tags};
use crate::time::Timestamp;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Synchronous hook run when the root is about to force-close a span.
pub type ForcedCloseHook = Box<dyn Fn(&TraceSpan) + Send + Sync>;

struct SpanRecord {
    trace_id: TraceId,
    name: Arc<str>,
    start_time: Timestamp,
    end_time: Option<Timestamp>,
    parent: Option<SpanId>,
    children: Vec<SpanId>,
    tags: Tags,
    input: Option<String>,
    output: Option<String>,
    on_forced_close: Option<ForcedCloseHook>,
}

impl fmt::Debug for SpanRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanRecord")
            .field("name", &self.name)
            .field("trace_id", &self.trace_id)
            .field("closed", &self.end_time.is_some())
            .field("children", &self.children.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Registry {
    spans: HashMap<SpanId, SpanRecord>,
    root: Option<SpanId>,
}

impl Registry {
    fn is_closed(&self, id: SpanId) -> bool {
        self.spans
            .get(&id)
            .map(|rec| rec.end_time.is_some())
            .unwrap_or(true)
    }

    /// Open descendants of `id` (excluding `id` itself), preorder.
    fn open_descendants(&self, id: SpanId) -> Vec<SpanId> {
        let mut out = Vec::new();
        let mut stack: Vec<SpanId> = self
            .spans
            .get(&id)
            .map(|rec| rec.children.iter().rev().copied().collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(rec) = self.spans.get(&next) {
                if rec.end_time.is_none() {
                    out.push(next);
                }
                stack.extend(rec.children.iter().rev().copied());
            }
        }
        out
    }
}

#[derive(Debug)]
struct TracerInner {
    registry: Mutex<Registry>,
    observers: Vec<Box<dyn SpanObserver>>,
}

/// Configures a [`Tracer`].
#[derive(Debug, Default)]
pub struct TracerBuilder {
    observers: Vec<Box<dyn SpanObserver>>,
}

impl TracerBuilder {
    /// Registers an observer; observers are notified in registration order.
    pub fn with_observer<O: SpanObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Builds the tracer. The observer set is fixed from here on.
    pub fn build(self) -> Tracer {
        Tracer {
            inner: Arc::new(TracerInner {
                registry: Mutex::new(Registry::default()),
                observers: self.observers,
            }),
        }
    }
}

/// Owns the span arena for one trace at a time and publishes span open/close
/// notifications.
///
/// Clones share the same arena. An embedder typically keeps one tracer for
/// the process and resets nothing between invocations: when the previous
/// root has fully closed, the next creation from a fresh context starts a
/// new trace.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Default for Tracer {
    fn default() -> Self {
        Tracer::builder().build()
    }
}

impl Tracer {
    /// A tracer with no observers.
    pub fn new() -> Self {
        Tracer::default()
    }

    /// Starts configuring a tracer.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn same(&self, other: &Tracer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn handle(&self, id: SpanId, record: &SpanRecord) -> TraceSpan {
        TraceSpan {
            tracer: self.clone(),
            id,
            trace_id: record.trace_id,
            name: Arc::clone(&record.name),
        }
    }

    fn notify_open(&self, span: &TraceSpan) {
        for observer in &self.inner.observers {
            observer.on_open(span);
        }
    }

    fn notify_close(&self, span: &TraceSpan) {
        for observer in &self.inner.observers {
            observer.on_close(span);
        }
    }

    /// The current trace's root span, if a trace has been started.
    pub fn root_span(&self) -> Option<TraceSpan> {
        let registry = self.registry();
        let root = registry.root?;
        registry.spans.get(&root).map(|rec| self.handle(root, rec))
    }

    /// The span that would parent a creation with no explicit context: the
    /// branch's current span if it belongs to this tracer, else the root.
    pub fn current_span(&self) -> Option<TraceSpan> {
        Context::current_span()
            .filter(|span| span.tracer.same(self))
            .or_else(|| self.root_span())
    }

    /// Creates a span named `name` with default options.
    pub fn start(&self, name: &str) -> TraceResult<TraceSpan> {
        self.build(SpanBuilder::new(name))
    }

    /// Creates a span from `builder`.
    ///
    /// The new span is parented on the branch's current span (walking up past
    /// already-closed ancestors), becomes the branch's current span itself,
    /// and is announced to observers. If the builder carries immediate
    /// descendants, the chain is created nested one-in-the-previous, all
    /// sharing this span's start time; the returned handle is the entry span
    /// and the deepest descendant is left current.
    pub fn build(&self, builder: SpanBuilder) -> TraceResult<TraceSpan> {
        let measured = Timestamp::now();
        name::ensure_span_name(&builder.name)?;
        for descendant in &builder.immediate_descendants {
            name::ensure_span_name(descendant)?;
        }

        let start_time = match builder.start_time {
            Some(time) if time > measured => return Err(TraceError::FutureStartTime),
            Some(time) => time,
            None => measured,
        };

        let mut tags = Tags::new();
        tags.set_many(builder.tags)?;

        let current = Context::current_span().filter(|span| span.tracer.same(self));

        let span = {
            let mut registry = self.registry();
            let (trace_id, parent) = match registry.root {
                None => (TraceId::random(), None),
                Some(root_id) if registry.is_closed(root_id) => {
                    if current.is_some() {
                        // A branch still holds a span of the ended trace.
                        return Err(TraceError::UnreachableTrace);
                    }
                    (TraceId::random(), None)
                }
                Some(root_id) => {
                    // Walk up past closed ancestors until an open span or the
                    // root; stale references self-heal to the root.
                    let mut candidate = current.as_ref().map(|span| span.id).unwrap_or(root_id);
                    let parent_id = loop {
                        match registry.spans.get(&candidate) {
                            None => break root_id,
                            Some(rec) if rec.end_time.is_none() => break candidate,
                            Some(rec) => candidate = rec.parent.unwrap_or(root_id),
                        }
                    };
                    let trace_id = registry
                        .spans
                        .get(&root_id)
                        .map(|rec| rec.trace_id)
                        .unwrap_or(TraceId::INVALID);
                    (trace_id, Some(parent_id))
                }
            };

            let mut id = SpanId::random();
            while registry.spans.contains_key(&id) {
                id = SpanId::random();
            }

            let record = SpanRecord {
                trace_id,
                name: Arc::from(builder.name.as_str()),
                start_time,
                end_time: None,
                parent,
                children: Vec::new(),
                tags,
                input: builder.input,
                output: builder.output,
                on_forced_close: builder.on_forced_close,
            };
            let span = self.handle(id, &record);
            registry.spans.insert(id, record);
            match parent {
                Some(parent_id) => {
                    if let Some(parent_rec) = registry.spans.get_mut(&parent_id) {
                        parent_rec.children.push(id);
                    }
                }
                None => registry.root = Some(id),
            }
            span
        };

        Context::rebind_span(Some(span.clone()));
        self.notify_open(&span);

        for descendant in builder.immediate_descendants {
            self.build(SpanBuilder::new(&descendant).with_start_time(start_time))?;
        }

        Ok(span)
    }

    /// Force-closes every still-open descendant of the root at `end_time`,
    /// invoking forced-close hooks first, and emits one diagnostic naming the
    /// spans that had to be closed on the owner's behalf. The root's end time
    /// is already set when this runs, so the open set cannot grow: creating
    /// spans of the ended trace fails, and one pass suffices.
    fn close_leftovers(&self, root: &TraceSpan, end_time: Timestamp) {
        let mut leftovers: Vec<Arc<str>> = Vec::new();
        let open = self.registry().open_descendants(root.id);
        for id in open {
            let (span, hook) = {
                let mut registry = self.registry();
                let Some(rec) = registry.spans.get_mut(&id) else {
                    continue;
                };
                if rec.end_time.is_some() {
                    continue;
                }
                let hook = rec.on_forced_close.take();
                let span = self.handle(id, rec);
                (span, hook)
            };

            // Give the owner one chance to end the span itself, then
            // re-check: the hook runs without any engine lock held.
            if let Some(hook) = hook {
                hook(&span);
            }

            {
                let mut registry = self.registry();
                let Some(rec) = registry.spans.get_mut(&id) else {
                    continue;
                };
                if rec.end_time.is_some() {
                    continue;
                }
                rec.end_time = Some(end_time);
                if rec.start_time > end_time {
                    // Root was closed with a backdated end time; keep the
                    // closed-span invariants intact.
                    rec.start_time = end_time;
                }
                leftovers.push(Arc::clone(&rec.name));
            }
            span.close_context();
            self.notify_close(&span);
        }

        if !leftovers.is_empty() {
            let names = leftovers
                .iter()
                .map(|name| name.as_ref())
                .collect::<Vec<_>>()
                .join(", ");
            crate::sdk_warn!(name: "TraceSpan.Close.Leftovers", spans = names.as_str());
        }
    }
}

/// Configures a span before creation.
///
/// ```
/// use serverless_trace::{SpanBuilder, Tracer};
///
/// let tracer = Tracer::new();
/// let span = tracer
///     .build(
///         SpanBuilder::new("aws.lambda")
///             .with_tag("aws.lambda.name", "my_function")
///             .with_immediate_descendants(["aws.lambda.initialization"]),
///     )
///     .unwrap();
/// assert_eq!(span.name(), "aws.lambda");
/// ```
pub struct SpanBuilder {
    name: String,
    start_time: Option<Timestamp>,
    tags: Vec<(String, TagValue)>,
    input: Option<String>,
    output: Option<String>,
    immediate_descendants: Vec<String>,
    on_forced_close: Option<ForcedCloseHook>,
}

impl SpanBuilder {
    /// Starts a builder for a span named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        SpanBuilder {
            name: name.into(),
            start_time: None,
            tags: Vec::new(),
            input: None,
            output: None,
            immediate_descendants: Vec::new(),
            on_forced_close: None,
        }
    }

    /// Backdates the span's start. Rejected at build time if in the future.
    pub fn with_start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Adds one tag; validated at build time.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Adds many tags; validated at build time.
    pub fn with_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<TagValue>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Records the operation's input body.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Records the operation's output body.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Synthesizes a call-level chain under the new span: each name is nested
    /// one inside the previous as a single-child span sharing the entry
    /// span's start time.
    pub fn with_immediate_descendants<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.immediate_descendants = names.into_iter().map(Into::into).collect();
        self
    }

    /// Registers a hook the root invokes before force-closing this span,
    /// giving the owner a chance to end it itself. Must complete
    /// synchronously; it runs with no engine lock held and may tag the span
    /// or close it. The trace has already ended when the hook runs, so
    /// attempts to create new spans fail.
    pub fn with_on_forced_close(mut self, hook: impl Fn(&TraceSpan) + Send + Sync + 'static) -> Self {
        self.on_forced_close = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for SpanBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanBuilder")
            .field("name", &self.name)
            .field("start_time", &self.start_time)
            .field("tags", &self.tags.len())
            .field("immediate_descendants", &self.immediate_descendants)
            .finish()
    }
}

/// Handle to one timed node of work in the trace tree.
///
/// Handles are cheap clones; identity (`id`, `trace_id`, `name`) is carried
/// inline and stays readable even after [`destroy`](TraceSpan::destroy)
/// detaches the span from the tree.
#[derive(Clone)]
pub struct TraceSpan {
    tracer: Tracer,
    id: SpanId,
    trace_id: TraceId,
    name: Arc<str>,
}

impl PartialEq for TraceSpan {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.tracer.same(&other.tracer)
    }
}

impl Eq for TraceSpan {}

impl fmt::Debug for TraceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSpan")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("trace_id", &self.trace_id)
            .finish()
    }
}

/// Owned copy of everything a span carries, for serialization and export.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// The span's own id.
    pub id: SpanId,
    /// Parent span id; `None` on the root and on detached spans.
    pub parent_span_id: Option<SpanId>,
    /// Resource name.
    pub name: Arc<str>,
    /// Monotonic start time.
    pub start_time: Timestamp,
    /// Monotonic end time; `None` while the span is open.
    pub end_time: Option<Timestamp>,
    /// The span's tags.
    pub tags: Tags,
    /// Recorded input body.
    pub input: Option<String>,
    /// Recorded output body.
    pub output: Option<String>,
}

impl TraceSpan {
    /// The span's unique id.
    pub fn id(&self) -> SpanId {
        self.id
    }

    /// Id of the trace this span belongs to, inherited from the root.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span's resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_record<T>(&self, f: impl FnOnce(&SpanRecord) -> T) -> Option<T> {
        let registry = self.tracer.registry();
        registry.spans.get(&self.id).map(f)
    }

    fn with_record_mut<T>(&self, f: impl FnOnce(&mut SpanRecord) -> T) -> Option<T> {
        let mut registry = self.tracer.registry();
        registry.spans.get_mut(&self.id).map(f)
    }

    /// Monotonic start time.
    pub fn start_time(&self) -> Option<Timestamp> {
        self.with_record(|rec| rec.start_time)
    }

    /// Monotonic end time; `None` while the span is open.
    pub fn end_time(&self) -> Option<Timestamp> {
        self.with_record(|rec| rec.end_time).flatten()
    }

    /// Whether the span has been closed.
    pub fn is_closed(&self) -> bool {
        self.end_time().is_some()
    }

    /// The parent span; `None` for the root and for detached spans.
    pub fn parent(&self) -> Option<TraceSpan> {
        let registry = self.tracer.registry();
        let parent_id = registry.spans.get(&self.id)?.parent?;
        registry
            .spans
            .get(&parent_id)
            .map(|rec| self.tracer.handle(parent_id, rec))
    }

    /// Sets one tag. Validation failures propagate; setting a tag on a
    /// closed span is a silent no-op.
    pub fn set_tag(&self, key: &str, value: impl Into<TagValue>) -> TraceResult<()> {
        self.with_record_mut(|rec| {
            if rec.end_time.is_some() {
                return Ok(());
            }
            rec.tags.set(key, value)
        })
        .unwrap_or(Ok(()))
    }

    /// Sets many tags at once. Stops at the first invalid entry.
    pub fn set_tags<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>) -> TraceResult<()>
    where
        K: AsRef<str>,
        V: Into<TagValue>,
    {
        for (key, value) in tags {
            self.set_tag(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Looks up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<TagValue> {
        self.with_record(|rec| rec.tags.get(key).cloned()).flatten()
    }

    /// Recorded input body.
    pub fn input(&self) -> Option<String> {
        self.with_record(|rec| rec.input.clone()).flatten()
    }

    /// Records the operation's input body. No-op once closed.
    pub fn set_input(&self, input: impl Into<String>) {
        let input = input.into();
        self.with_record_mut(|rec| {
            if rec.end_time.is_none() {
                rec.input = Some(input);
            }
        });
    }

    /// Clears the recorded input body. No-op once closed.
    pub fn clear_input(&self) {
        self.with_record_mut(|rec| {
            if rec.end_time.is_none() {
                rec.input = None;
            }
        });
    }

    /// Recorded output body.
    pub fn output(&self) -> Option<String> {
        self.with_record(|rec| rec.output.clone()).flatten()
    }

    /// Records the operation's output body. No-op once closed.
    pub fn set_output(&self, output: impl Into<String>) {
        let output = output.into();
        self.with_record_mut(|rec| {
            if rec.end_time.is_none() {
                rec.output = Some(output);
            }
        });
    }

    /// Clears the recorded output body. No-op once closed.
    pub fn clear_output(&self) {
        self.with_record_mut(|rec| {
            if rec.end_time.is_none() {
                rec.output = None;
            }
        });
    }

    /// Closes the span at the current time.
    ///
    /// On the root this force-closes every still-open descendant (see module
    /// docs) and leaves the root as the branch's current span; on any other
    /// span the context steps back out to the nearest open ancestor.
    pub fn close(&self) -> TraceResult<()> {
        self.close_inner(None)
    }

    /// Closes the span at an explicit end time, which must not precede the
    /// span's start nor lie in the future.
    pub fn close_with_timestamp(&self, end_time: Timestamp) -> TraceResult<()> {
        self.close_inner(Some(end_time))
    }

    fn close_inner(&self, explicit: Option<Timestamp>) -> TraceResult<()> {
        let measured = Timestamp::now();

        let (end_time, is_root) = {
            let mut registry = self.tracer.registry();
            let rec = registry
                .spans
                .get_mut(&self.id)
                .ok_or(TraceError::AlreadyClosed)?;
            if rec.end_time.is_some() {
                return Err(TraceError::AlreadyClosed);
            }
            let end_time = match explicit {
                Some(time) if time < rec.start_time => return Err(TraceError::PastEndTime),
                Some(time) if time > measured => return Err(TraceError::FutureEndTime),
                Some(time) => time,
                None => measured,
            };
            rec.end_time = Some(end_time);
            (end_time, registry.root == Some(self.id))
        };

        if is_root {
            self.tracer.close_leftovers(self, end_time);
            // The root stays current so late captured events can still be
            // correlated to the invocation.
            Context::rebind_span(Some(self.clone()));
        } else {
            self.close_context();
        }
        self.tracer.notify_close(self);
        Ok(())
    }

    /// Steps the branch's context back out of this span without closing
    /// anything: no-op unless this span is the branch's current span; the
    /// root keeps itself current; otherwise the nearest still-open ancestor
    /// (defaulting to the root) becomes current.
    pub fn close_context(&self) {
        match Context::current_span() {
            Some(current) if current == *self => {}
            _ => return,
        }

        let target = {
            let registry = self.tracer.registry();
            if registry.root == Some(self.id) {
                Some(self.clone())
            } else {
                let root = registry.root;
                let mut candidate = registry.spans.get(&self.id).and_then(|rec| rec.parent);
                let target_id = loop {
                    match candidate {
                        None => break root,
                        Some(id) => match registry.spans.get(&id) {
                            None => break root,
                            Some(rec) if rec.end_time.is_none() => break Some(id),
                            Some(rec) => candidate = rec.parent,
                        },
                    }
                };
                target_id.and_then(|id| {
                    registry
                        .spans
                        .get(&id)
                        .map(|rec| self.tracer.handle(id, rec))
                })
            }
        };
        Context::rebind_span(target);
    }

    /// Detaches the span from the tree without requiring it to be closed,
    /// for discarding a speculative span that should never be reported. The
    /// span's own identity stays readable, but it is unreachable from the
    /// tree and excluded from [`spans`](TraceSpan::spans) aggregates.
    /// Destroying the root discards the whole trace.
    pub fn destroy(&self) {
        self.close_context();
        let mut registry = self.tracer.registry();
        let parent = registry
            .spans
            .get_mut(&self.id)
            .and_then(|rec| rec.parent.take());
        if let Some(parent_id) = parent {
            if let Some(parent_rec) = registry.spans.get_mut(&parent_id) {
                parent_rec.children.retain(|child| *child != self.id);
            }
        }
        if registry.root == Some(self.id) {
            registry.root = None;
        }
    }

    /// This span plus the full transitive set of descendants, flattened,
    /// deduplicated and in deterministic depth-first preorder. Exporters use
    /// this to linearize the tree into a list-of-spans payload.
    pub fn spans(&self) -> Vec<TraceSpan> {
        let registry = self.tracer.registry();
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![self.id];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(rec) = registry.spans.get(&id) {
                out.push(self.tracer.handle(id, rec));
                stack.extend(rec.children.iter().rev().copied());
            }
        }
        out
    }

    /// Owned copy of the span's data for serialization; `None` only if the
    /// handle outlived its tracer arena entry.
    pub fn exported_data(&self) -> Option<SpanData> {
        self.with_record(|rec| SpanData {
            trace_id: rec.trace_id,
            id: self.id,
            parent_span_id: rec.parent,
            name: Arc::clone(&rec.name),
            start_time: rec.start_time,
            end_time: rec.end_time,
            tags: rec.tags.clone(),
            input: rec.input.clone(),
            output: rec.output.clone(),
        })
    }
}
