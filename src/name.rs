//! Resource-name grammar validation.
//!
//! Span names and tag keys share one grammar: dot separated tokens, each
//! token made of lowercase alphanumeric words joined by single underscores,
//! e.g. `aws.lambda.request_id`. Formally:
//!
//! ```text
//! name  := token ("." token)*
//! token := word ("_" word)*
//! word  := [a-z][a-z0-9]*
//! ```

use crate::error::{TraceError, TraceResult};

/// Returns `true` if `name` matches the resource-name grammar.
pub fn is_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // Each byte is checked against what the previous separator allows; a
    // separator must be followed by a fresh lowercase letter and the name
    // must not end on a separator.
    let mut word_start = true;
    for &b in name.as_bytes() {
        match b {
            b'a'..=b'z' => word_start = false,
            b'0'..=b'9' => {
                if word_start {
                    return false;
                }
            }
            b'_' | b'.' => {
                if word_start {
                    return false;
                }
                word_start = true;
            }
            _ => return false,
        }
    }

    !word_start
}

/// Validates a span name, returning it on success.
pub fn ensure_span_name(name: &str) -> TraceResult<&str> {
    if is_valid(name) {
        Ok(name)
    } else {
        Err(TraceError::InvalidName(name.to_owned()))
    }
}

/// Validates a tag key, returning it on success.
pub fn ensure_tag_name(name: &str) -> TraceResult<&str> {
    if is_valid(name) {
        Ok(name)
    } else {
        Err(TraceError::InvalidTagName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dotted_snake_case_tokens() {
        for name in [
            "aws",
            "aws.lambda",
            "aws.lambda.request_id",
            "aws.sdk.s3.get_object",
            "db.query2",
            "a1_b2.c3",
        ] {
            assert!(is_valid(name), "expected `{name}` to be valid");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "",
            "Aws.lambda",
            "aws..lambda",
            "aws.lambda.",
            ".aws",
            "aws_",
            "_aws",
            "aws.1lambda",
            "aws.lambda.request__id",
            "aws lambda",
            "aws.λ",
            "1st",
        ] {
            assert!(!is_valid(name), "expected `{name}` to be invalid");
        }
    }

    #[test]
    fn ensure_reports_kind_per_use() {
        let err = ensure_span_name("Bad").unwrap_err();
        assert_eq!(err.code(), "INVALID_TRACE_SPAN_NAME");
        let err = ensure_tag_name("Bad").unwrap_err();
        assert_eq!(err.code(), "INVALID_TRACE_SPAN_TAG_NAME");
    }
}
