//! Span-tree lifecycle engine for tracing short-lived serverless
//! invocations.
//!
//! The crate records a hierarchical trace of timed work units ("spans") —
//! the invocation itself, nested library calls, outbound requests — and
//! produces a compact, wire-ready representation of the tree. Its core
//! concerns are:
//!
//! - **Context tracking** ([`Context`]): resolving the span that should
//!   parent a newly created span, correctly scoped per asynchronous branch.
//! - **Lifecycle** ([`Tracer`], [`TraceSpan`], [`SpanBuilder`]):
//!   create/close/close-context/destroy with tree invariants, and forced
//!   root closure guaranteeing a fully-closed tree at the end of every
//!   invocation.
//! - **Tags** ([`Tags`]): ordered, validated, dotted-key attributes.
//! - **Serialization** ([`DebugSpan`], [`WireSpan`]): a flat debug JSON view
//!   and a nested, enum-coded wire view.
//! - **Eventing** ([`SpanObserver`]): span-open/span-close notifications an
//!   external exporter consumes.
//!
//! Instrumentation adapters, transport of the serialized tree off-process,
//! and sampling are deliberately out of scope; adapters call into the
//! lifecycle API around intercepted operations and an exporter subscribes to
//! the notifications.
//!
//! # Example
//!
//! ```
//! use serverless_trace::Tracer;
//!
//! let tracer = Tracer::new();
//! let invocation = tracer.start("aws.lambda.invocation").unwrap();
//!
//! // Nested work picks up the invocation as its parent from the context.
//! let query = tracer.start("db.query").unwrap();
//! query.set_tag("db.statement", "select 1").unwrap();
//! query.close().unwrap();
//!
//! invocation.close().unwrap();
//!
//! let wire = invocation.wire_view().unwrap();
//! assert!(wire.end_time_unix_nano.is_some());
//! assert_eq!(invocation.spans().len(), 2);
//! ```
#![warn(missing_docs, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod context;
mod error;
mod ids;
mod internal_logging;
pub mod name;
mod observer;
mod serialize;
mod span;
mod tags;
mod time;

pub use context::{Context, ContextGuard, FutureExt, WithContext};
pub use error::{TraceError, TraceResult};
pub use ids::{SpanId, TraceId};
pub use observer::{InMemorySpanObserver, SpanEvent, SpanEventKind, SpanObserver};
pub use serialize::{DebugSpan, WireSpan};
pub use span::{ForcedCloseHook, SpanBuilder, SpanData, TraceSpan, Tracer, TracerBuilder};
pub use tags::{TagArray, TagValue, Tags};
pub use time::Timestamp;

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, info, warn};
}
