use thiserror::Error;

/// A specialized `Result` type for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned by the span lifecycle engine.
///
/// These indicate instrumentation bugs (bad names, time ordering violations,
/// closing a span twice, creating spans after the trace ended) and are
/// surfaced to the caller. Runtime anomalies that must not crash the host
/// invocation, such as leftover open spans at root closure, are reported
/// through the diagnostic channel instead and never through this type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// Span or resource name does not match the resource-name grammar.
    #[error(
        "invalid trace span name: name should contain dot separated tokens \
         that follow \"[a-z][a-z0-9_]*\" pattern, received `{0}`"
    )]
    InvalidName(String),

    /// Explicit start time is later than the time of measurement.
    #[error("cannot initialize span: start time cannot be set in the future")]
    FutureStartTime,

    /// Explicit end time is earlier than the span's start time.
    #[error("cannot close span: end time cannot be earlier than start time")]
    PastEndTime,

    /// Explicit end time is later than the time of measurement.
    #[error("cannot close span: end time cannot be set in the future")]
    FutureEndTime,

    /// The span has already been closed.
    #[error("cannot close span: span already closed")]
    AlreadyClosed,

    /// The current trace has ended; no new spans can be attached to it.
    #[error("cannot initialize span: trace is closed")]
    UnreachableTrace,

    /// Tag key does not match the resource-name grammar.
    #[error(
        "invalid trace span tag name: name should contain dot separated tokens \
         that follow \"[a-z][a-z0-9_]*\" pattern, received `{0}`"
    )]
    InvalidTagName(String),

    /// Tag value is not representable (e.g. a non-finite number).
    #[error("invalid trace span tag value for `{key}`: {reason}")]
    InvalidTagValue {
        /// Tag key the value was destined for.
        key: String,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

impl TraceError {
    /// Stable machine-readable code identifying the failure kind.
    ///
    /// Codes are part of the public contract and match the wire-level error
    /// codes reported by the other SDK runtimes.
    pub fn code(&self) -> &'static str {
        match self {
            TraceError::InvalidName(_) => "INVALID_TRACE_SPAN_NAME",
            TraceError::FutureStartTime => "FUTURE_SPAN_START_TIME",
            TraceError::PastEndTime => "PAST_SPAN_END_TIME",
            TraceError::FutureEndTime => "FUTURE_SPAN_END_TIME",
            TraceError::AlreadyClosed => "CLOSURE_ON_CLOSED_SPAN",
            TraceError::UnreachableTrace => "UNREACHABLE_TRACE",
            TraceError::InvalidTagName(_) => "INVALID_TRACE_SPAN_TAG_NAME",
            TraceError::InvalidTagValue { .. } => "INVALID_TRACE_SPAN_TAG_VALUE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            TraceError::InvalidName("A".into()).code(),
            "INVALID_TRACE_SPAN_NAME"
        );
        assert_eq!(TraceError::FutureStartTime.code(), "FUTURE_SPAN_START_TIME");
        assert_eq!(TraceError::AlreadyClosed.code(), "CLOSURE_ON_CLOSED_SPAN");
        assert_eq!(TraceError::UnreachableTrace.code(), "UNREACHABLE_TRACE");
    }

    #[test]
    fn messages_name_the_offender() {
        let err = TraceError::InvalidTagValue {
            key: "aws.lambda.duration".into(),
            reason: "number must be finite",
        };
        assert!(err.to_string().contains("aws.lambda.duration"));
    }
}
