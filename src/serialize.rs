//! Debug and wire views of spans.
//!
//! Two serialized shapes exist for every span. The debug view is a flat
//! object with human-oriented identifiers and dotted tag keys, meant for
//! logs and local inspection. The wire view is the compact nested form an
//! exporter ships off-process: ids as byte sequences, epoch-nanosecond
//! timestamps, tag keys exploded into a camel-cased object tree, and known
//! enum-valued tags coded to small integers.

use crate::span::{SpanData, TraceSpan};
use crate::tags::{TagArray, TagValue, Tags};
use serde::Serialize;
use serde_json::{Map, Value};

/// Flat debug representation of a span.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSpan {
    /// Trace id as 32 hex chars.
    pub trace_id: String,
    /// Span id as 16 hex chars.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Absolute start time, decimal epoch nanoseconds.
    pub start_time: String,
    /// Absolute end time, decimal epoch nanoseconds; absent while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Recorded input body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Recorded output body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Tags as a flat dotted-key object, insertion order preserved.
    pub tags: Map<String, Value>,
}

impl From<&SpanData> for DebugSpan {
    fn from(data: &SpanData) -> Self {
        let mut tags = Map::new();
        for (key, value) in data.tags.iter() {
            tags.insert(key.to_owned(), plain_tag_value(value));
        }
        DebugSpan {
            trace_id: data.trace_id.to_string(),
            id: data.id.to_string(),
            name: data.name.to_string(),
            start_time: data.start_time.epoch_nanos().to_string(),
            end_time: data.end_time.map(|t| t.epoch_nanos().to_string()),
            input: data.input.clone(),
            output: data.output.clone(),
            tags,
        }
    }
}

/// Compact nested representation of a span, ready for the export payload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSpan {
    /// Span id bytes.
    pub id: Vec<u8>,
    /// Trace id bytes.
    pub trace_id: Vec<u8>,
    /// Parent span id bytes; present only if the span has a parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<Vec<u8>>,
    /// Resource name.
    pub name: String,
    /// Absolute start time in epoch nanoseconds.
    pub start_time_unix_nano: u64,
    /// Absolute end time in epoch nanoseconds; absent while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time_unix_nano: Option<u64>,
    /// Recorded input body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Recorded output body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Nested camel-cased tag tree.
    pub tags: Value,
}

impl From<&SpanData> for WireSpan {
    fn from(data: &SpanData) -> Self {
        WireSpan {
            id: data.id.to_string().into_bytes(),
            trace_id: data.trace_id.to_string().into_bytes(),
            parent_span_id: data.parent_span_id.map(|id| id.to_string().into_bytes()),
            name: data.name.to_string(),
            start_time_unix_nano: data.start_time.epoch_nanos(),
            end_time_unix_nano: data.end_time.map(|t| t.epoch_nanos()),
            input: data.input.clone(),
            output: data.output.clone(),
            tags: nest_tags(&data.tags),
        }
    }
}

impl TraceSpan {
    /// Flat debug view; `None` only if the handle outlived its arena entry.
    pub fn debug_view(&self) -> Option<DebugSpan> {
        self.exported_data().map(|data| DebugSpan::from(&data))
    }

    /// Compact wire view; `None` only if the handle outlived its arena entry.
    pub fn wire_view(&self) -> Option<WireSpan> {
        self.exported_data().map(|data| WireSpan::from(&data))
    }
}

/// Camel-cases one underscore-delimited key segment: `request_id` →
/// `requestId`.
fn snake_to_camel(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper_next = false;
    for ch in segment.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Tag value as-is, for the flat debug view.
fn plain_tag_value(value: &TagValue) -> Value {
    match value {
        TagValue::Bool(v) => Value::from(*v),
        TagValue::I64(v) => Value::from(*v),
        TagValue::F64(v) => Value::from(*v),
        TagValue::Str(v) => Value::from(v.as_str()),
        TagValue::Array(array) => match array {
            TagArray::Bool(values) => Value::from(values.clone()),
            TagArray::I64(values) => Value::from(values.clone()),
            TagArray::F64(values) => Value::from(values.clone()),
            TagArray::Str(values) => Value::from(values.clone()),
        },
    }
}

/// Tag value for the wire view: enum-coded keys map known string values to
/// small integer codes and anything unrecognized to the invalid `null`
/// sentinel, which downstream validation rejects instead of silently
/// coercing. Everything else passes through with numerics widened to 64-bit.
fn wire_tag_value(key: &str, value: &TagValue) -> Value {
    match key {
        "aws.lambda.outcome" => match value.as_str() {
            Some("success") => Value::from(1),
            Some("error:handled") => Value::from(5),
            _ => Value::Null,
        },
        _ => plain_tag_value(value),
    }
}

/// Explodes dotted tag keys into a nested object tree, camel-casing every
/// underscore-delimited segment: `aws.sdk.request_id` becomes
/// `{"aws": {"sdk": {"requestId": ...}}}`.
fn nest_tags(tags: &Tags) -> Value {
    let mut root = Map::new();
    for (key, value) in tags.iter() {
        let wire_value = wire_tag_value(key, value);
        let tokens: Vec<String> = key.split('.').map(snake_to_camel).collect();
        let Some((last, path)) = tokens.split_last() else {
            continue;
        };
        let mut cursor = &mut root;
        for token in path {
            let entry = cursor
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                // A scalar was previously written at an interior path
                // segment; the deeper key wins.
                *entry = Value::Object(Map::new());
            }
            cursor = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just made an object"),
            };
        }
        cursor.insert(last.clone(), wire_value);
    }
    Value::Object(root)
}
