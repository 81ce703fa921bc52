// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The sink that finalized trace segments are handed to.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::span_data::SpanData;
use crate::trace_sampler::TraceSampler;

/// The payload unit produced by one finalized trace segment: its spans, in
/// finish order, plus the sampler that should receive the agent's rate
/// feedback for this trace.
pub struct TraceChunk {
    pub spans: Vec<SpanData>,
    pub sampler: Arc<TraceSampler>,
}

/// Destination for finalized trace chunks.
///
/// `send` is called from whichever application thread finishes the last
/// span of a segment, so implementations must hand off quickly and must not
/// block on I/O.
pub trait Collector: Send + Sync {
    fn send(&self, chunk: TraceChunk) -> Result<(), Error>;

    /// Stops background work. Pending chunks are flushed synchronously and
    /// in-flight submissions are awaited up to `deadline`; whatever is
    /// still outstanding afterwards is abandoned.
    fn shutdown(&self, deadline: Duration);
}
