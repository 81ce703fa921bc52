// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The span handle handed to application code.
//!
//! A [`Span`] is a lightweight handle: the record itself lives in the trace
//! segment, and every mutation goes through the segment's lock. A handle is
//! not `Clone`, so two threads may not mutate the same span, but different
//! handles of the same segment may be used concurrently.
//!
//! Dropping a handle finishes its span if `finish` was never called, so
//! spans terminate on every exit path, including panics unwinding through
//! application code.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::propagation::carrier::Injector;
use crate::span_data::SpanConfig;
use crate::trace_segment::TraceSegment;

pub struct Span {
    segment: Arc<TraceSegment>,
    span_id: u64,
    parent_id: u64,
    finished: bool,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("span_id", &self.span_id)
            .field("parent_id", &self.parent_id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Span {
    pub(crate) fn new(segment: Arc<TraceSegment>, span_id: u64, parent_id: u64) -> Self {
        Span {
            segment,
            span_id,
            parent_id,
            finished: false,
        }
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    pub fn trace_id(&self) -> u64 {
        self.segment.trace_id()
    }

    /// Zero when this span is the root of its segment.
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    pub fn segment(&self) -> &Arc<TraceSegment> {
        &self.segment
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.mutate(move |span_data| {
            span_data.tags.insert(key, value);
        });
    }

    pub fn set_metric(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        self.mutate(move |span_data| {
            span_data.metrics.insert(key, value);
        });
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.mutate(move |span_data| span_data.name = name);
    }

    pub fn set_resource(&mut self, resource: impl Into<String>) {
        let resource = resource.into();
        self.mutate(move |span_data| span_data.resource = resource);
    }

    pub fn set_service(&mut self, service: impl Into<String>) {
        let service = service.into();
        self.mutate(move |span_data| span_data.service = service);
    }

    pub fn set_error(&mut self, error: bool) {
        self.mutate(move |span_data| span_data.error = error);
    }

    /// Records an error message and flags the span as errored.
    pub fn set_error_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.mutate(move |span_data| {
            span_data.error = true;
            span_data.error_message = Some(message);
        });
    }

    pub fn set_error_type(&mut self, error_type: impl Into<String>) {
        let error_type = error_type.into();
        self.mutate(move |span_data| {
            span_data.error = true;
            span_data.error_type = Some(error_type);
        });
    }

    pub fn set_error_stack(&mut self, stack: impl Into<String>) {
        let stack = stack.into();
        self.mutate(move |span_data| {
            span_data.error = true;
            span_data.error_stack = Some(stack);
        });
    }

    /// Creates a child span in the same segment.
    ///
    /// The child shares this span's trace ID, names this span as its
    /// parent, and keeps the segment open until it finishes too.
    pub fn create_child(&self, config: SpanConfig) -> Span {
        let child_id = self.segment.create_child(self.span_id, config);
        Span::new(Arc::clone(&self.segment), child_id, self.span_id)
    }

    /// Writes propagation headers naming this span as the remote parent.
    ///
    /// Forces the segment's sampling decision to resolve, since the
    /// priority is part of the propagated context.
    pub fn inject(&self, injector: &mut dyn Injector) {
        self.segment.inject(injector, self.span_id);
    }

    /// Convenience for injecting into a fresh header map.
    pub fn inject_into_map(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        self.inject(&mut headers);
        headers
    }

    /// Manually overrides the trace-level sampling decision.
    pub fn override_sampling_priority(&self, priority: i32) {
        self.segment.override_sampling_priority(priority);
    }

    /// Records the span's duration and releases it to the segment.
    ///
    /// Consumes the handle; the `Drop` impl covers spans that are never
    /// finished explicitly.
    pub fn finish(mut self) {
        self.finish_once();
    }

    fn finish_once(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.segment.finish_span(self.span_id);
    }

    fn mutate(&mut self, mutation: impl FnOnce(&mut crate::span_data::SpanData)) {
        if self.finished || !self.segment.with_span_data(self.span_id, mutation) {
            debug!("ignoring mutation of finished span {}", self.span_id);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.finish_once();
    }
}
