// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error type shared across the tracer.
//!
//! Every fallible operation in this crate returns [`Error`]: a kind drawn
//! from a closed set, plus a human-readable message. Callers that add
//! context as an error travels up (e.g. which header a parse failure came
//! from) do so with [`Error::with_prefix`], which keeps the kind intact.
//!
//! Errors here are never fatal to the tracer itself. Extraction and
//! span-local errors are returned to the caller; collector and flush errors
//! are logged and the affected batch is dropped.

use thiserror::Error as ThisError;

/// The closed set of failure categories used by the tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A header or config value that must be an integer is not one.
    InvalidInteger,
    /// An integer field exceeds the range of its target type.
    OutOfRangeInteger,
    /// Extraction found neither a trace ID nor a parent span ID.
    NoSpanToExtract,
    /// Extraction found a trace ID but no parent span ID and no origin.
    MissingParentSpanId,
    /// Two enabled extraction styles produced different trace contexts.
    InconsistentExtractionStyles,
    /// The propagated trace tags header could not be decoded.
    MalformedTraceTags,
    /// The propagated trace tags header exceeds the size limit.
    TraceTagsExceedMaximumLength,
    /// A sampling rate is outside [0, 1].
    RateOutOfRange,
    /// An HTTP request to the agent failed after dispatch.
    HttpRequestFailure,
    /// The HTTP client could not be set up or the request could not be built.
    HttpClientSetupFailed,
}

/// An error produced by the tracer: a category plus a diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Prepends context to the message, preserving the kind.
    ///
    /// Used while an error propagates outward, e.g. to name the header that
    /// a parse failure came from.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.message.insert_str(0, prefix.as_ref());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let error = Error::new(ErrorKind::InvalidInteger, "not a number: \"abc\"");
        assert_eq!(
            error.to_string(),
            "InvalidInteger: not a number: \"abc\""
        );
    }

    #[test]
    fn with_prefix_chains_context() {
        let error = Error::new(ErrorKind::InvalidInteger, "not a number: \"abc\"")
            .with_prefix("could not extract x-datadog-trace-id: ");
        assert_eq!(error.kind, ErrorKind::InvalidInteger);
        assert!(error.message.starts_with("could not extract x-datadog-trace-id: "));
        assert!(error.message.ends_with("not a number: \"abc\""));
    }
}
