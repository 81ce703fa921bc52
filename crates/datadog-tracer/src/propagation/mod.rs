// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace context propagation across process boundaries.
//!
//! This module encodes and decodes trace context through opaque key/value
//! headers. Three styles are supported, and more than one may be enabled at
//! a time:
//!
//! - **Datadog**: the native headers (`x-datadog-trace-id`,
//!   `x-datadog-parent-id`, `x-datadog-sampling-priority`,
//!   `x-datadog-origin`, `x-datadog-tags`)
//! - **B3**: Zipkin's multi-header format (`x-b3-traceid`, `x-b3-spanid`,
//!   `x-b3-sampled`)
//! - **TraceContext**: the W3C recommendation (`traceparent`, `tracestate`
//!   with a `dd=` vendor entry)
//!
//! Extraction of a single style produces an [`ExtractedData`]: every field
//! is optional, and an absent header is an absent field, never an error. A
//! header that is present but malformed is an error, annotated with which
//! header failed. When several styles are enabled the tracer extracts all
//! of them and requires the non-empty results to agree field-wise.

use std::collections::HashMap;
use std::fmt;
use std::num::IntErrorKind;
use std::str::FromStr;

use tracing::error;

use crate::error::{Error, ErrorKind};

pub mod carrier;
pub mod text_map_propagator;
pub mod trace_tags;

use carrier::{Extractor, Injector};

/// A propagation header encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationStyle {
    /// Datadog's native `x-datadog-*` headers.
    Datadog,
    /// Zipkin B3 multi-header format.
    B3,
    /// W3C Trace Context (`traceparent` / `tracestate`).
    TraceContext,
}

impl FromStr for PropagationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "datadog" => Ok(PropagationStyle::Datadog),
            "b3" | "b3multi" => Ok(PropagationStyle::B3),
            "tracecontext" | "w3c" => Ok(PropagationStyle::TraceContext),
            other => Err(format!("unknown propagation style: {other:?}")),
        }
    }
}

impl fmt::Display for PropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = match self {
            PropagationStyle::Datadog => "datadog",
            PropagationStyle::B3 => "b3",
            PropagationStyle::TraceContext => "tracecontext",
        };
        write!(f, "{style}")
    }
}

/// Parses a comma-separated list of styles, e.g. `"datadog,tracecontext"`.
///
/// Invalid entries are logged and skipped rather than failing the whole
/// list, so a typo in one style does not disable propagation entirely.
/// Duplicates are dropped.
pub fn parse_styles(input: &str) -> Vec<PropagationStyle> {
    let mut styles = Vec::new();
    for entry in input.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match PropagationStyle::from_str(entry) {
            Ok(style) => {
                if !styles.contains(&style) {
                    styles.push(style);
                }
            }
            Err(message) => error!("ignoring propagation style: {message}"),
        }
    }
    styles
}

/// Trace context read from carrier headers by one propagation style.
///
/// Field-wise equality is what extraction-style reconciliation compares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedData {
    pub trace_id: Option<u64>,
    pub parent_id: Option<u64>,
    pub origin: Option<String>,
    pub trace_tags: HashMap<String, String>,
    pub sampling_priority: Option<i32>,
}

impl ExtractedData {
    /// True when the style found none of its headers.
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none()
            && self.parent_id.is_none()
            && self.origin.is_none()
            && self.trace_tags.is_empty()
            && self.sampling_priority.is_none()
    }
}

/// The result of running one style's extraction: the data it found, plus an
/// optional recoverable diagnostic for the root span's
/// `_dd.propagation_error` tag.
#[derive(Debug, Clone, Default)]
pub(crate) struct Extraction {
    pub data: ExtractedData,
    pub propagation_error: Option<&'static str>,
}

/// Everything a style needs to write its headers for one span.
pub(crate) struct InjectionContext<'a> {
    pub trace_id: u64,
    /// The injecting span's own ID: the downstream service's parent.
    pub span_id: u64,
    pub sampling_priority: i32,
    pub origin: Option<&'a str>,
    pub trace_tags: &'a HashMap<String, String>,
}

pub(crate) fn extract(
    style: PropagationStyle,
    carrier: &dyn Extractor,
) -> Result<Extraction, Error> {
    match style {
        PropagationStyle::Datadog => text_map_propagator::datadog_extract(carrier),
        PropagationStyle::B3 => text_map_propagator::b3_extract(carrier),
        PropagationStyle::TraceContext => text_map_propagator::w3c_extract(carrier),
    }
}

pub(crate) fn inject(
    style: PropagationStyle,
    injector: &mut dyn Injector,
    context: &InjectionContext<'_>,
) {
    match style {
        PropagationStyle::Datadog => text_map_propagator::datadog_inject(injector, context),
        PropagationStyle::B3 => text_map_propagator::b3_inject(injector, context),
        PropagationStyle::TraceContext => text_map_propagator::w3c_inject(injector, context),
    }
}

/// Parses an unsigned 64-bit integer, tolerating surrounding whitespace and
/// rejecting trailing characters.
pub(crate) fn parse_u64(input: &str, base: u32) -> Result<u64, Error> {
    let trimmed = input.trim();
    u64::from_str_radix(trimmed, base).map_err(|parse_error| match parse_error.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => Error::new(
            ErrorKind::OutOfRangeInteger,
            format!("integer is not within the range of 64-bit unsigned: \"{trimmed}\""),
        ),
        _ => Error::new(
            ErrorKind::InvalidInteger,
            format!("is not a valid integer: \"{trimmed}\""),
        ),
    })
}

/// Parses a signed 32-bit integer with the same lexical rules as
/// [`parse_u64`].
pub(crate) fn parse_i32(input: &str) -> Result<i32, Error> {
    let trimmed = input.trim();
    trimmed
        .parse::<i32>()
        .map_err(|parse_error| match parse_error.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => Error::new(
                ErrorKind::OutOfRangeInteger,
                format!("integer is not within the range of int: \"{trimmed}\""),
            ),
            _ => Error::new(
                ErrorKind::InvalidInteger,
                format!("is not a valid integer: \"{trimmed}\""),
            ),
        })
}
