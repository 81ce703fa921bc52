// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Header codecs for the Datadog, B3, and W3C propagation styles.
//!
//! Each style has an `extract` that reads every field it recognizes (absent
//! headers become absent fields) and an `inject` that writes the context of
//! one span. Malformed present values fail extraction with an error whose
//! message names the offending header.
//!
//! # 128-bit trace IDs
//!
//! This tracer's trace IDs are 64-bit. When a W3C `traceparent` carries a
//! 128-bit ID, the low 64 bits become the trace ID and the high bits are
//! preserved in the `_dd.p.tid` trace tag (lowercase hex), so they survive
//! re-injection.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, warn};

use crate::error::{Error, ErrorKind};
use crate::propagation::carrier::{Extractor, Injector};
use crate::propagation::{parse_i32, parse_u64, trace_tags, Extraction, InjectionContext};

pub const DATADOG_TRACE_ID_KEY: &str = "x-datadog-trace-id";
pub const DATADOG_PARENT_ID_KEY: &str = "x-datadog-parent-id";
pub const DATADOG_SAMPLING_PRIORITY_KEY: &str = "x-datadog-sampling-priority";
pub const DATADOG_ORIGIN_KEY: &str = "x-datadog-origin";
pub const DATADOG_TAGS_KEY: &str = "x-datadog-tags";

pub const B3_TRACE_ID_KEY: &str = "x-b3-traceid";
pub const B3_SPAN_ID_KEY: &str = "x-b3-spanid";
pub const B3_SAMPLED_KEY: &str = "x-b3-sampled";

pub const TRACEPARENT_KEY: &str = "traceparent";
pub const TRACESTATE_KEY: &str = "tracestate";

/// Trace tag carrying the high 64 bits of a 128-bit trace ID.
pub const HIGHER_ORDER_TRACE_ID_BITS_KEY: &str = "_dd.p.tid";

lazy_static! {
    /// `version-traceId-spanId-flags`, with an optional vendor tail.
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"(?i)^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
            .expect("failed creating regex");

    /// All-zero ID segments are invalid in both B3 and W3C.
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
}

// ---------------------------------------------------------------------------
// Datadog style
// ---------------------------------------------------------------------------

pub(crate) fn datadog_extract(carrier: &dyn Extractor) -> Result<Extraction, Error> {
    let mut extraction = Extraction::default();
    let data = &mut extraction.data;

    if let Some(value) = carrier.get(DATADOG_TRACE_ID_KEY) {
        let trace_id = parse_u64(value, 10).map_err(|parse_error| {
            parse_error.with_prefix(format!(
                "could not extract Datadog-style trace ID from {DATADOG_TRACE_ID_KEY}: "
            ))
        })?;
        data.trace_id = Some(trace_id);
    }

    if let Some(value) = carrier.get(DATADOG_PARENT_ID_KEY) {
        let parent_id = parse_u64(value, 10).map_err(|parse_error| {
            parse_error.with_prefix(format!(
                "could not extract Datadog-style parent span ID from {DATADOG_PARENT_ID_KEY}: "
            ))
        })?;
        data.parent_id = Some(parent_id);
    }

    if let Some(value) = carrier.get(DATADOG_SAMPLING_PRIORITY_KEY) {
        let priority = parse_i32(value).map_err(|parse_error| {
            parse_error.with_prefix(format!(
                "could not extract Datadog-style sampling priority from {DATADOG_SAMPLING_PRIORITY_KEY}: "
            ))
        })?;
        data.sampling_priority = Some(priority);
    }

    data.origin = carrier.get(DATADOG_ORIGIN_KEY).map(str::to_string);

    if let Some(value) = carrier.get(DATADOG_TAGS_KEY) {
        // Trace tag failures are recoverable: extraction continues and the
        // tracer records a diagnostic on the root span instead.
        match trace_tags::decode(value) {
            Ok(tags) => data.trace_tags = tags,
            Err(decode_error) => {
                error!("failed to decode {DATADOG_TAGS_KEY}: {decode_error}");
                extraction.propagation_error =
                    Some(match decode_error.kind {
                        ErrorKind::TraceTagsExceedMaximumLength => "extract_max_size",
                        _ => "decoding_error",
                    });
            }
        }
    }

    Ok(extraction)
}

pub(crate) fn datadog_inject(injector: &mut dyn Injector, context: &InjectionContext<'_>) {
    injector.set(DATADOG_TRACE_ID_KEY, context.trace_id.to_string());
    injector.set(DATADOG_PARENT_ID_KEY, context.span_id.to_string());
    injector.set(
        DATADOG_SAMPLING_PRIORITY_KEY,
        context.sampling_priority.to_string(),
    );
    if let Some(origin) = context.origin {
        injector.set(DATADOG_ORIGIN_KEY, origin.to_string());
    }
    if !context.trace_tags.is_empty() {
        injector.set(DATADOG_TAGS_KEY, trace_tags::encode(context.trace_tags));
    }
}

// ---------------------------------------------------------------------------
// B3 style (multi-header)
// ---------------------------------------------------------------------------

pub(crate) fn b3_extract(carrier: &dyn Extractor) -> Result<Extraction, Error> {
    let mut extraction = Extraction::default();
    let data = &mut extraction.data;

    if let Some(value) = carrier.get(B3_TRACE_ID_KEY) {
        let trace_id = parse_b3_trace_id(value).map_err(|parse_error| {
            parse_error
                .with_prefix(format!("could not extract B3-style trace ID from {B3_TRACE_ID_KEY}: "))
        })?;
        data.trace_id = Some(trace_id);
    }

    if let Some(value) = carrier.get(B3_SPAN_ID_KEY) {
        let parent_id = parse_u64(value, 16).map_err(|parse_error| {
            parse_error
                .with_prefix(format!("could not extract B3-style span ID from {B3_SPAN_ID_KEY}: "))
        })?;
        data.parent_id = Some(parent_id);
    }

    if let Some(value) = carrier.get(B3_SAMPLED_KEY) {
        let sampled = parse_i32(value).map_err(|parse_error| {
            parse_error.with_prefix(format!(
                "could not extract B3-style sampling decision from {B3_SAMPLED_KEY}: "
            ))
        })?;
        data.sampling_priority = Some(sampled);
    }

    Ok(extraction)
}

/// B3 trace IDs are hex, and may be 128 bits wide. Only the low 64 bits are
/// kept.
fn parse_b3_trace_id(value: &str) -> Result<u64, Error> {
    let trimmed = value.trim();
    match u128::from_str_radix(trimmed, 16) {
        #[allow(clippy::cast_possible_truncation)]
        Ok(id) => Ok(id as u64),
        Err(parse_error) => match parse_error.kind() {
            std::num::IntErrorKind::PosOverflow => Err(Error::new(
                ErrorKind::OutOfRangeInteger,
                format!("integer is not within the range of 128-bit unsigned: \"{trimmed}\""),
            )),
            _ => Err(Error::new(
                ErrorKind::InvalidInteger,
                format!("is not a valid hexadecimal integer: \"{trimmed}\""),
            )),
        },
    }
}

pub(crate) fn b3_inject(injector: &mut dyn Injector, context: &InjectionContext<'_>) {
    injector.set(B3_TRACE_ID_KEY, format!("{:016x}", context.trace_id));
    injector.set(B3_SPAN_ID_KEY, format!("{:016x}", context.span_id));
    let sampled = if context.sampling_priority > 0 { "1" } else { "0" };
    injector.set(B3_SAMPLED_KEY, sampled.to_string());
}

// ---------------------------------------------------------------------------
// W3C Trace Context style
// ---------------------------------------------------------------------------

struct Traceparent {
    trace_id: u128,
    parent_id: u64,
    sampled: bool,
}

#[derive(Default)]
struct TracestateData {
    sampling_priority: Option<i32>,
    origin: Option<String>,
    trace_tags: Vec<(String, String)>,
}

pub(crate) fn w3c_extract(carrier: &dyn Extractor) -> Result<Extraction, Error> {
    let Some(raw) = carrier.get(TRACEPARENT_KEY) else {
        return Ok(Extraction::default());
    };

    let traceparent = parse_traceparent(raw.trim())?;

    let mut extraction = Extraction::default();
    let data = &mut extraction.data;
    #[allow(clippy::cast_possible_truncation)]
    {
        data.trace_id = Some(traceparent.trace_id as u64);
    }
    data.parent_id = Some(traceparent.parent_id);
    data.sampling_priority = Some(i32::from(traceparent.sampled));

    let higher_order_bits = (traceparent.trace_id >> 64) as u64;
    if higher_order_bits != 0 {
        data.trace_tags.insert(
            HIGHER_ORDER_TRACE_ID_BITS_KEY.to_string(),
            format!("{higher_order_bits:016x}"),
        );
    }

    if let Some(tracestate) = carrier.get(TRACESTATE_KEY) {
        if let Some(dd) = parse_tracestate(tracestate) {
            data.origin = dd.origin;
            for (key, value) in dd.trace_tags {
                data.trace_tags.insert(key, value);
            }
            data.sampling_priority = Some(reconcile_sampling_priority(
                i32::from(traceparent.sampled),
                dd.sampling_priority,
            ));
        }
    }

    Ok(extraction)
}

fn parse_traceparent(traceparent: &str) -> Result<Traceparent, Error> {
    let invalid = |message: String| Error::new(ErrorKind::InvalidInteger, message);

    let captures = TRACEPARENT_REGEX
        .captures(traceparent)
        .ok_or_else(|| invalid(format!("malformed {TRACEPARENT_KEY}: \"{traceparent}\"")))?;

    let version = &captures[1];
    let trace_id = &captures[2];
    let parent_id = &captures[3];
    let flags = &captures[4];
    let tail = captures.get(5).map_or("", |capture| capture.as_str());

    match version {
        "ff" => {
            return Err(invalid(format!(
                "\"ff\" is an invalid {TRACEPARENT_KEY} version"
            )));
        }
        "00" => {
            if !tail.is_empty() {
                return Err(invalid(format!(
                    "{TRACEPARENT_KEY} with version \"00\" must contain exactly 4 values delimited by \"-\""
                )));
            }
        }
        other => {
            warn!("unsupported {TRACEPARENT_KEY} version {other}, attempting to parse anyway");
        }
    }

    if INVALID_SEGMENT_REGEX.is_match(trace_id) {
        return Err(invalid(format!(
            "an all-zero trace ID in {TRACEPARENT_KEY} is invalid"
        )));
    }
    if INVALID_SEGMENT_REGEX.is_match(parent_id) {
        return Err(invalid(format!(
            "an all-zero parent ID in {TRACEPARENT_KEY} is invalid"
        )));
    }

    // The regex already constrains these to hex of the right width.
    let trace_id = u128::from_str_radix(trace_id, 16)
        .map_err(|_| invalid(format!("failed to decode trace ID in {TRACEPARENT_KEY}")))?;
    let parent_id = parse_u64(parent_id, 16)
        .map_err(|parse_error| parse_error.with_prefix(format!("in {TRACEPARENT_KEY}: ")))?;
    let flags = u8::from_str_radix(flags, 16)
        .map_err(|_| invalid(format!("failed to decode trace flags in {TRACEPARENT_KEY}")))?;

    Ok(Traceparent {
        trace_id,
        parent_id,
        sampled: flags & 0x1 != 0,
    })
}

/// Pulls the Datadog vendor entry (`dd=...`) out of a tracestate header.
///
/// Returns `None` when there is no `dd=` entry. Within the entry,
/// `s:` carries the sampling priority, `o:` the origin, and `t.<key>:`
/// entries map to `_dd.p.<key>` trace tags. Values encode `=` as `~`.
fn parse_tracestate(tracestate: &str) -> Option<TracestateData> {
    let dd_entry = tracestate
        .split(',')
        .map(str::trim)
        .find_map(|entry| entry.strip_prefix("dd="))?;

    let mut parsed = TracestateData::default();
    for item in dd_entry.split(';') {
        let Some((key, value)) = item.split_once(':') else {
            continue;
        };
        match key {
            "s" => {
                if let Ok(priority) = value.parse::<i32>() {
                    parsed.sampling_priority = Some(priority);
                }
            }
            "o" => parsed.origin = Some(decode_tag_value(value)),
            _ => {
                if let Some(suffix) = key.strip_prefix("t.") {
                    parsed
                        .trace_tags
                        .push((format!("_dd.p.{suffix}"), decode_tag_value(value)));
                }
            }
        }
    }

    Some(parsed)
}

fn decode_tag_value(value: &str) -> String {
    value.replace('~', "=")
}

fn encode_tag_value(value: &str) -> String {
    value.replace('=', "~")
}

/// The tracestate priority wins only when it agrees with the traceparent
/// sampled flag in direction: a positive priority may refine "sampled", a
/// negative one may refine "not sampled".
fn reconcile_sampling_priority(
    traceparent_priority: i32,
    tracestate_priority: Option<i32>,
) -> i32 {
    if let Some(tracestate_priority) = tracestate_priority {
        if (traceparent_priority == 1 && tracestate_priority > 0)
            || (traceparent_priority == 0 && tracestate_priority < 0)
        {
            return tracestate_priority;
        }
    }
    traceparent_priority
}

pub(crate) fn w3c_inject(injector: &mut dyn Injector, context: &InjectionContext<'_>) {
    // Rebuild a 128-bit trace ID when the segment carries high-order bits
    // extracted from an upstream W3C context.
    let higher_order_bits = context
        .trace_tags
        .get(HIGHER_ORDER_TRACE_ID_BITS_KEY)
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .unwrap_or(0);
    let trace_id = (u128::from(higher_order_bits) << 64) | u128::from(context.trace_id);

    let flags: u8 = u8::from(context.sampling_priority > 0);
    injector.set(
        TRACEPARENT_KEY,
        format!("00-{trace_id:032x}-{:016x}-{flags:02x}", context.span_id),
    );

    let mut dd_entry = format!("s:{}", context.sampling_priority);
    if let Some(origin) = context.origin {
        dd_entry.push_str(";o:");
        dd_entry.push_str(&encode_tag_value(origin));
    }
    // Sorted for deterministic output; the high-order bits already travel in
    // the traceparent.
    let sorted: BTreeMap<&str, &str> = context
        .trace_tags
        .iter()
        .filter(|(key, _)| key.as_str() != HIGHER_ORDER_TRACE_ID_BITS_KEY)
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    for (key, value) in sorted {
        if let Some(suffix) = key.strip_prefix(trace_tags::PROPAGATED_TAG_PREFIX) {
            dd_entry.push_str(";t.");
            dd_entry.push_str(suffix);
            dd_entry.push(':');
            dd_entry.push_str(&encode_tag_value(value));
        }
    }
    injector.set(TRACESTATE_KEY, format!("dd={dd_entry}"));
}
