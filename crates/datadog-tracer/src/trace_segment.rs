// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The state shared by all spans of one local trace.
//!
//! Every span handle holds an `Arc` to its [`TraceSegment`]; the segment
//! owns the span records themselves. Nothing in the segment points back at
//! live handles, so ownership flows strictly handle → segment.
//!
//! A single mutex guards all mutable state. The linearization point for
//! finalization is the open-span count reaching zero inside `finish_span`:
//! the chunk is extracted and stamped while still under the lock, the lock
//! is released, and only then is the collector called. After finalization
//! the mutable state is never touched again.
//!
//! The sampling decision is pinned once set. Extraction seeds it and local
//! resolution fills it in lazily; only a manual override may replace an
//! existing decision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use crate::clock::Clock;
use crate::collector::{Collector, TraceChunk};
use crate::id::IdGenerator;
use crate::propagation::carrier::Injector;
use crate::propagation::{self, InjectionContext, PropagationStyle};
use crate::sampling::{priority, SamplingDecision, SamplingMechanism, SamplingOrigin};
use crate::span_data::{SpanConfig, SpanData, SpanDefaults};
use crate::span_sampler::SpanSampler;
use crate::trace_sampler::TraceSampler;

/// Root span metric carrying the resolved sampling priority.
const SAMPLING_PRIORITY_METRIC: &str = "_sampling_priority_v1";
/// Trace tag carrying the sampling decision mechanism.
const SAMPLING_DECISION_TAG: &str = "_dd.p.dm";
/// Tag carrying the extracted origin on every span of the chunk.
const ORIGIN_TAG: &str = "_dd.origin";
/// Root span tag carrying the reporting host's name.
const HOSTNAME_TAG: &str = "_dd.hostname";

struct SegmentState {
    open_spans: HashMap<u64, SpanData>,
    /// Finished records, in the order their `finish` completed.
    spans_finished: Vec<SpanData>,
    num_open_spans: usize,
    sampling_decision: Option<SamplingDecision>,
    finalized: bool,
}

pub struct TraceSegment {
    state: Mutex<SegmentState>,
    collector: Arc<dyn Collector>,
    trace_sampler: Arc<TraceSampler>,
    span_sampler: Arc<SpanSampler>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Clock,
    defaults: Arc<SpanDefaults>,
    injection_styles: Vec<PropagationStyle>,
    hostname: Option<String>,
    trace_id: u64,
    /// ID of the span the segment was created with; its attributes drive
    /// the trace sampler.
    first_span_id: u64,
    origin: Option<String>,
    trace_tags: HashMap<String, String>,
}

pub(crate) struct SegmentCollaborators {
    pub collector: Arc<dyn Collector>,
    pub trace_sampler: Arc<TraceSampler>,
    pub span_sampler: Arc<SpanSampler>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub clock: Clock,
    pub defaults: Arc<SpanDefaults>,
    pub injection_styles: Vec<PropagationStyle>,
    pub hostname: Option<String>,
}

impl TraceSegment {
    /// Creates a segment around its first span. `num_open_spans` starts at
    /// one, for the handle the caller is about to hand out.
    pub(crate) fn new(
        collaborators: SegmentCollaborators,
        origin: Option<String>,
        trace_tags: HashMap<String, String>,
        sampling_decision: Option<SamplingDecision>,
        first_span: SpanData,
    ) -> Arc<Self> {
        let first_span_id = first_span.span_id;
        let trace_id = first_span.trace_id;
        Arc::new(TraceSegment {
            state: Mutex::new(SegmentState {
                open_spans: HashMap::from([(first_span_id, first_span)]),
                spans_finished: Vec::new(),
                num_open_spans: 1,
                sampling_decision,
                finalized: false,
            }),
            collector: collaborators.collector,
            trace_sampler: collaborators.trace_sampler,
            span_sampler: collaborators.span_sampler,
            id_generator: collaborators.id_generator,
            clock: collaborators.clock,
            defaults: collaborators.defaults,
            injection_styles: collaborators.injection_styles,
            hostname: collaborators.hostname,
            trace_id,
            first_span_id,
            origin,
            trace_tags,
        })
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SegmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds and registers a child span record, returning its fresh ID.
    pub(crate) fn create_child(&self, parent_id: u64, config: SpanConfig) -> u64 {
        let mut span_data = SpanData::with_config(&self.defaults, config, &self.clock);
        span_data.trace_id = self.trace_id;
        span_data.parent_id = parent_id;
        self.register_span(span_data)
    }

    fn register_span(&self, mut span_data: SpanData) -> u64 {
        let span_id = self.id_generator.generate();
        span_data.span_id = span_id;

        let mut state = self.lock();
        state.open_spans.insert(span_id, span_data);
        state.num_open_spans += 1;
        span_id
    }

    /// Runs `mutate` against an open span's record under the segment lock.
    ///
    /// Returns false when the span is no longer open (already finished),
    /// which callers diagnose rather than treat as fatal.
    pub(crate) fn with_span_data(
        &self,
        span_id: u64,
        mutate: impl FnOnce(&mut SpanData),
    ) -> bool {
        let mut state = self.lock();
        match state.open_spans.get_mut(&span_id) {
            Some(span_data) => {
                mutate(span_data);
                true
            }
            None => false,
        }
    }

    /// Records a span's duration and retires it.
    ///
    /// The last span to finish triggers finalization: the sampling decision
    /// is resolved if still absent, chunk-level tags are stamped, and the
    /// chunk goes to the collector after the lock is released.
    pub(crate) fn finish_span(&self, span_id: u64) {
        let now = (self.clock)();

        let mut state = self.lock();
        let Some(mut span_data) = state.open_spans.remove(&span_id) else {
            debug!("span {span_id} was already finished; ignoring duplicate finish");
            return;
        };
        #[allow(clippy::cast_possible_truncation)]
        {
            span_data.duration = now
                .tick
                .saturating_duration_since(span_data.start_tick)
                .as_nanos() as u64;
        }
        state.spans_finished.push(span_data);
        state.num_open_spans -= 1;

        if state.num_open_spans > 0 || state.finalized {
            return;
        }
        state.finalized = true;

        let decision = self.resolve_decision_locked(&mut state);
        let mut spans = std::mem::take(&mut state.spans_finished);
        self.stamp_chunk(&mut spans, decision);
        drop(state);

        if !decision.keeps() && !self.span_sampler.is_empty() {
            self.span_sampler.sample(&mut spans);
        }

        let chunk = TraceChunk {
            spans,
            sampler: Arc::clone(&self.trace_sampler),
        };
        if let Err(send_error) = self.collector.send(chunk) {
            error!("failed to hand finalized trace to the collector: {send_error}");
        }
    }

    /// Sets or replaces the sampling decision with a manual one.
    ///
    /// Manual is the only origin that may overwrite; calls after
    /// finalization are ignored.
    pub fn override_sampling_priority(&self, priority: i32) {
        let mut state = self.lock();
        if state.finalized {
            debug!("ignoring sampling override on a finalized trace segment");
            return;
        }
        state.sampling_decision = Some(SamplingDecision {
            priority,
            mechanism: Some(SamplingMechanism::Manual),
            origin: SamplingOrigin::Manual,
        });
    }

    /// Returns the segment's decision, computing and pinning it on first
    /// call.
    pub fn resolve_sampling_decision(&self) -> SamplingDecision {
        let mut state = self.lock();
        self.resolve_decision_locked(&mut state)
    }

    fn resolve_decision_locked(&self, state: &mut SegmentState) -> SamplingDecision {
        if let Some(decision) = state.sampling_decision {
            return decision;
        }
        let first_span = state
            .open_spans
            .get(&self.first_span_id)
            .or_else(|| {
                state
                    .spans_finished
                    .iter()
                    .find(|span| span.span_id == self.first_span_id)
            });
        let decision = match first_span {
            Some(span) => self.trace_sampler.decide(span),
            // The first span exists for the whole segment lifetime; this
            // arm is unreachable but must still produce a decision.
            None => SamplingDecision {
                priority: priority::AUTO_KEEP,
                mechanism: Some(SamplingMechanism::Default),
                origin: SamplingOrigin::Local,
            },
        };
        state.sampling_decision = Some(decision);
        decision
    }

    /// Writes propagation headers on behalf of the span `span_id`.
    ///
    /// Resolving the sampling decision first is what pins it: once a trace
    /// context leaves this process, the decision must not change.
    pub(crate) fn inject(&self, injector: &mut dyn Injector, span_id: u64) {
        if self.injection_styles.is_empty() {
            return;
        }
        let decision = self.resolve_sampling_decision();

        let mut trace_tags = self.trace_tags.clone();
        if let Some(mechanism) = decision.mechanism {
            trace_tags
                .entry(SAMPLING_DECISION_TAG.to_string())
                .or_insert_with(|| format!("-{}", mechanism.value()));
        }

        let context = InjectionContext {
            trace_id: self.trace_id,
            span_id,
            sampling_priority: decision.priority,
            origin: self.origin.as_deref(),
            trace_tags: &trace_tags,
        };
        for style in &self.injection_styles {
            propagation::inject(*style, injector, &context);
        }
    }

    /// Chunk-level stamps: the sampling priority metric and trace tags on
    /// the local root, the origin on every span, the hostname on the root.
    fn stamp_chunk(&self, spans: &mut [SpanData], decision: SamplingDecision) {
        if let Some(origin) = &self.origin {
            for span in spans.iter_mut() {
                span.tags.insert(ORIGIN_TAG.to_string(), origin.clone());
            }
        }

        let span_ids: std::collections::HashSet<u64> =
            spans.iter().map(|span| span.span_id).collect();
        let Some(root) = spans
            .iter_mut()
            .find(|span| span.parent_id == 0 || !span_ids.contains(&span.parent_id))
        else {
            return;
        };

        root.metrics.insert(
            SAMPLING_PRIORITY_METRIC.to_string(),
            f64::from(decision.priority),
        );
        if let Some(hostname) = &self.hostname {
            root.tags.insert(HOSTNAME_TAG.to_string(), hostname.clone());
        }
        for (key, value) in &self.trace_tags {
            root.tags.insert(key.clone(), value.clone());
        }
        if let Some(mechanism) = decision.mechanism {
            root.tags
                .entry(SAMPLING_DECISION_TAG.to_string())
                .or_insert_with(|| format!("-{}", mechanism.value()));
        }
    }
}
