// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The leaf record for one span, and the config layering that fills it in.
//!
//! A [`SpanData`] is uniquely owned by its trace segment once created; the
//! application mutates it through a [`crate::span::Span`] handle while the
//! span is open. Fields map onto the agent's v0.4 span encoding via
//! [`SpanData::to_wire`].

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

use crate::clock::{wall_nanos, Clock, TimePoint};

/// Default span attributes, fixed at tracer construction.
#[derive(Debug, Clone, Default)]
pub struct SpanDefaults {
    pub service: String,
    pub service_type: String,
    pub environment: Option<String>,
    pub version: Option<String>,
    pub name: String,
    pub tags: HashMap<String, String>,
}

/// Per-call overrides applied on top of [`SpanDefaults`] when a span is
/// created or extracted.
#[derive(Debug, Clone, Default)]
pub struct SpanConfig {
    pub service: Option<String>,
    pub service_type: Option<String>,
    pub environment: Option<String>,
    pub version: Option<String>,
    pub name: Option<String>,
    pub resource: Option<String>,
    /// Explicit start time; the current clock reading otherwise.
    pub start: Option<TimePoint>,
    pub tags: HashMap<String, String>,
}

/// All recorded state for a single span.
#[derive(Debug, Clone)]
pub struct SpanData {
    pub trace_id: u64,
    pub span_id: u64,
    /// Zero for the root span of a segment.
    pub parent_id: u64,
    pub service: String,
    pub service_type: String,
    pub environment: Option<String>,
    pub version: Option<String>,
    /// Operation name.
    pub name: String,
    pub resource: String,
    /// Wall-clock start, in nanoseconds since the Unix epoch.
    pub start: u64,
    /// Monotonic duration in nanoseconds, set exactly once at finish.
    pub duration: u64,
    pub error: bool,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub error_stack: Option<String>,
    pub tags: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
    /// Monotonic counterpart of `start`, used to compute `duration`.
    pub(crate) start_tick: Instant,
}

impl SpanData {
    /// Builds a span record from defaults and per-call config.
    ///
    /// Identifiers are left zeroed; the tracer assigns them afterwards.
    /// Config values win over defaults, and config tags are merged over
    /// default tags key by key.
    pub(crate) fn with_config(defaults: &SpanDefaults, config: SpanConfig, clock: &Clock) -> Self {
        let start = config.start.unwrap_or_else(|| clock());
        let name = config.name.unwrap_or_else(|| defaults.name.clone());
        let resource = config.resource.unwrap_or_else(|| name.clone());

        let mut tags = defaults.tags.clone();
        tags.extend(config.tags);

        SpanData {
            trace_id: 0,
            span_id: 0,
            parent_id: 0,
            service: config.service.unwrap_or_else(|| defaults.service.clone()),
            service_type: config
                .service_type
                .unwrap_or_else(|| defaults.service_type.clone()),
            environment: config.environment.or_else(|| defaults.environment.clone()),
            version: config.version.or_else(|| defaults.version.clone()),
            name,
            resource,
            start: wall_nanos(start.wall),
            duration: 0,
            error: false,
            error_message: None,
            error_type: None,
            error_stack: None,
            tags,
            metrics: HashMap::new(),
            start_tick: start.tick,
        }
    }

    /// The span as the agent's v0.4 encoding expects it.
    ///
    /// Environment, version, and the error details have no dedicated wire
    /// fields; they travel inside `meta`.
    pub(crate) fn to_wire(&self) -> WireSpan<'_> {
        let mut meta: HashMap<&str, &str> = self
            .tags
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        if let Some(environment) = &self.environment {
            meta.insert("env", environment);
        }
        if let Some(version) = &self.version {
            meta.insert("version", version);
        }
        if let Some(message) = &self.error_message {
            meta.insert("error.message", message);
        }
        if let Some(error_type) = &self.error_type {
            meta.insert("error.type", error_type);
        }
        if let Some(stack) = &self.error_stack {
            meta.insert("error.stack", stack);
        }

        WireSpan {
            service: &self.service,
            name: &self.name,
            resource: &self.resource,
            span_type: &self.service_type,
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_id: self.parent_id,
            start: i64::try_from(self.start).unwrap_or(i64::MAX),
            duration: i64::try_from(self.duration).unwrap_or(i64::MAX),
            error: i32::from(self.error),
            meta,
            metrics: &self.metrics,
        }
    }
}

/// Serialized form of one span in the MessagePack trace payload.
#[derive(Serialize)]
pub(crate) struct WireSpan<'a> {
    pub service: &'a str,
    pub name: &'a str,
    pub resource: &'a str,
    #[serde(rename = "type")]
    pub span_type: &'a str,
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    pub start: i64,
    pub duration: i64,
    pub error: i32,
    pub meta: HashMap<&'a str, &'a str>,
    pub metrics: &'a HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::default_clock;

    fn defaults() -> SpanDefaults {
        SpanDefaults {
            service: "svc".into(),
            service_type: "web".into(),
            environment: Some("prod".into()),
            version: Some("1.2.3".into()),
            name: "handle.request".into(),
            tags: HashMap::from([("team".to_string(), "traces".to_string())]),
        }
    }

    #[test]
    fn config_overrides_defaults() {
        let config = SpanConfig {
            service: Some("other".into()),
            name: Some("db.query".into()),
            tags: HashMap::from([("team".to_string(), "db".to_string())]),
            ..SpanConfig::default()
        };
        let data = SpanData::with_config(&defaults(), config, &default_clock());

        assert_eq!(data.service, "other");
        assert_eq!(data.service_type, "web");
        assert_eq!(data.name, "db.query");
        // Resource falls back to the operation name.
        assert_eq!(data.resource, "db.query");
        assert_eq!(data.tags["team"], "db");
        assert_eq!(data.environment.as_deref(), Some("prod"));
    }

    #[test]
    fn wire_meta_carries_env_version_and_error_details() {
        let mut data = SpanData::with_config(&defaults(), SpanConfig::default(), &default_clock());
        data.error = true;
        data.error_message = Some("boom".into());
        data.error_type = Some("std::io::Error".into());

        let wire = data.to_wire();
        assert_eq!(wire.error, 1);
        assert_eq!(wire.meta["env"], "prod");
        assert_eq!(wire.meta["version"], "1.2.3");
        assert_eq!(wire.meta["error.message"], "boom");
        assert_eq!(wire.meta["error.type"], "std::io::Error");
        assert_eq!(wire.span_type, "web");
    }

    #[test]
    fn wire_span_serializes_type_field_name() {
        let data = SpanData::with_config(&defaults(), SpanConfig::default(), &default_clock());
        let bytes = rmp_serde::to_vec_named(&data.to_wire()).expect("serializes");
        let value: serde_json::Value = rmp_serde::from_slice(&bytes).expect("decodes");
        assert_eq!(value["type"], "web");
        assert_eq!(value["service"], "svc");
    }
}
