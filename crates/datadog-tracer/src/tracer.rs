// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The tracer: the application's entry point into this crate.
//!
//! A [`Tracer`] creates root spans, continues traces extracted from
//! incoming request headers, and owns the collaborators every trace segment
//! shares: the collector, the samplers, the ID generator, and the clock.
//!
//! ```rust,ignore
//! let mut config = Config::new("my-service");
//! config.apply_env();
//! let tracer = Tracer::new(config)?;
//!
//! let mut span = tracer.create_span(SpanConfig {
//!     name: Some("handle.request".to_string()),
//!     ..SpanConfig::default()
//! });
//! span.set_tag("http.method", "GET");
//! span.finish();
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::clock::{default_clock, Clock};
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::hostname::get_hostname;
use crate::http::HyperClient;
use crate::id::{default_id_generator, IdGenerator};
use crate::propagation::carrier::Extractor;
use crate::propagation::{self, ExtractedData, PropagationStyle};
use crate::sampling::{SamplingDecision, SamplingOrigin};
use crate::span::Span;
use crate::span_data::{SpanConfig, SpanData, SpanDefaults};
use crate::span_sampler::SpanSampler;
use crate::trace_segment::{SegmentCollaborators, TraceSegment};
use crate::trace_sampler::TraceSampler;
use crate::agent::DatadogAgent;

/// Root span tag recording recoverable propagation decode failures.
const PROPAGATION_ERROR_TAG: &str = "_dd.propagation_error";

pub struct Tracer {
    collector: Arc<dyn Collector>,
    trace_sampler: Arc<TraceSampler>,
    span_sampler: Arc<SpanSampler>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Clock,
    defaults: Arc<SpanDefaults>,
    injection_styles: Vec<PropagationStyle>,
    extraction_styles: Vec<PropagationStyle>,
    hostname: Option<String>,
}

impl Tracer {
    /// Builds a tracer that ships traces to a Datadog agent.
    ///
    /// Fails when the sampler configuration or the agent URL is invalid.
    pub fn new(config: Config) -> Result<Self, Error> {
        let collector = Arc::new(DatadogAgent::new(
            &config.agent_url,
            config.flush_interval,
            Arc::new(HyperClient::default()),
        )?);
        Self::with_collaborators(config, collector, default_id_generator(), default_clock())
    }

    /// Builds a tracer around explicit collaborators.
    ///
    /// This is how tests substitute a capturing collector, a deterministic
    /// ID source, or a frozen clock; `Tracer::new` delegates here.
    pub fn with_collaborators(
        mut config: Config,
        collector: Arc<dyn Collector>,
        id_generator: Arc<dyn IdGenerator>,
        clock: Clock,
    ) -> Result<Self, Error> {
        if config.service.trim().is_empty() {
            error!("config.service is required; continuing with a placeholder service name");
            config.service = "unnamed-rust-service".to_string();
        }

        let trace_sampler = Arc::new(TraceSampler::new(&config.trace_sampler)?);
        let span_sampler = Arc::new(SpanSampler::new(&config.span_sampler)?);

        let defaults = Arc::new(SpanDefaults {
            service: config.service,
            service_type: config.service_type,
            environment: config.environment,
            version: config.version,
            name: config.name.unwrap_or_default(),
            tags: config.tags,
        });

        Ok(Tracer {
            collector,
            trace_sampler,
            span_sampler,
            id_generator,
            clock,
            defaults,
            injection_styles: config.injection_styles,
            extraction_styles: config.extraction_styles,
            hostname: config.report_hostname.then(get_hostname).flatten(),
        })
    }

    fn collaborators(&self) -> SegmentCollaborators {
        SegmentCollaborators {
            collector: Arc::clone(&self.collector),
            trace_sampler: Arc::clone(&self.trace_sampler),
            span_sampler: Arc::clone(&self.span_sampler),
            id_generator: Arc::clone(&self.id_generator),
            clock: Arc::clone(&self.clock),
            defaults: Arc::clone(&self.defaults),
            injection_styles: self.injection_styles.clone(),
            hostname: self.hostname.clone(),
        }
    }

    /// Starts a new local trace with a root span.
    pub fn create_span(&self, config: SpanConfig) -> Span {
        let mut span_data = SpanData::with_config(&self.defaults, config, &self.clock);
        span_data.span_id = self.id_generator.generate();
        span_data.trace_id = span_data.span_id;
        span_data.parent_id = 0;
        let span_id = span_data.span_id;

        let segment = TraceSegment::new(
            self.collaborators(),
            None,
            HashMap::new(),
            None,
            span_data,
        );
        Span::new(segment, span_id, 0)
    }

    /// Continues a trace from propagation headers.
    ///
    /// Every enabled extraction style runs, in the fixed order Datadog, B3,
    /// W3C. Styles whose headers are absent contribute nothing; the first
    /// style that finds anything becomes the reference, and any later style
    /// that disagrees with it fails the extraction with
    /// [`ErrorKind::InconsistentExtractionStyles`].
    pub fn extract_span(
        &self,
        headers: &dyn Extractor,
        config: SpanConfig,
    ) -> Result<Span, Error> {
        let mut reference: Option<(PropagationStyle, ExtractedData)> = None;
        let mut propagation_error = None;

        for style in ordered(&self.extraction_styles) {
            let extraction = propagation::extract(style, headers)?;
            if extraction.propagation_error.is_some() {
                propagation_error = extraction.propagation_error;
            }
            if extraction.data.is_empty() {
                continue;
            }
            match &reference {
                None => reference = Some((style, extraction.data)),
                Some((reference_style, reference_data)) => {
                    if extraction.data != *reference_data {
                        return Err(Error::new(
                            ErrorKind::InconsistentExtractionStyles,
                            format!(
                                "{style} extracted different data than {reference_style} did"
                            ),
                        ));
                    }
                }
            }
        }

        let Some((_, extracted)) = reference else {
            return Err(Error::new(
                ErrorKind::NoSpanToExtract,
                "There is no trace ID and no parent span ID to extract.",
            ));
        };

        // The combinations considered:
        //
        // - no trace ID and no parent ID: nothing to extract
        // - trace ID without parent ID:
        //     - with an origin, the trace was started upstream without a
        //       root span (e.g. synthetics); we become the root
        //     - without an origin, the headers are incomplete
        // - trace ID and parent ID: we continue as a child of the remote
        //   parent
        // - parent ID without trace ID: incomplete headers
        let (trace_id, parent_id) = match (extracted.trace_id, extracted.parent_id) {
            (None, None) => {
                return Err(Error::new(
                    ErrorKind::NoSpanToExtract,
                    "There is no trace ID and no parent span ID to extract.",
                ));
            }
            (None, Some(_)) => {
                return Err(Error::new(
                    ErrorKind::NoSpanToExtract,
                    "A parent span ID was extracted without a trace ID.",
                ));
            }
            (Some(trace_id), None) => {
                if extracted.origin.is_none() {
                    return Err(Error::new(
                        ErrorKind::MissingParentSpanId,
                        "There is no parent span ID to extract.",
                    ));
                }
                (trace_id, 0)
            }
            (Some(trace_id), Some(parent_id)) => (trace_id, parent_id),
        };

        let mut span_data = SpanData::with_config(&self.defaults, config, &self.clock);
        span_data.span_id = self.id_generator.generate();
        span_data.trace_id = trace_id;
        span_data.parent_id = parent_id;
        if let Some(diagnostic) = propagation_error {
            span_data
                .tags
                .insert(PROPAGATION_ERROR_TAG.to_string(), diagnostic.to_string());
        }
        let span_id = span_data.span_id;

        let sampling_decision = extracted.sampling_priority.map(|priority| SamplingDecision {
            priority,
            // The upstream process does not say how it decided.
            mechanism: None,
            origin: SamplingOrigin::Extracted,
        });

        let segment = TraceSegment::new(
            self.collaborators(),
            extracted.origin,
            extracted.trace_tags,
            sampling_decision,
            span_data,
        );
        Ok(Span::new(segment, span_id, parent_id))
    }

    /// Extracts a span, or starts a new trace when there is nothing to
    /// extract. Extraction errors other than [`ErrorKind::NoSpanToExtract`]
    /// propagate.
    pub fn extract_or_create_span(
        &self,
        headers: &dyn Extractor,
        config: SpanConfig,
    ) -> Result<Span, Error> {
        match self.extract_span(headers, config.clone()) {
            Ok(span) => Ok(span),
            Err(extract_error) if extract_error.kind == ErrorKind::NoSpanToExtract => {
                Ok(self.create_span(config))
            }
            Err(extract_error) => Err(extract_error),
        }
    }

    /// Cancels scheduled flushes, flushes pending traces, and waits for
    /// in-flight submissions up to `deadline`.
    pub fn shutdown(&self, deadline: Duration) {
        self.collector.shutdown(deadline);
    }
}

/// Extraction always runs in the fixed order Datadog, B3, W3C, regardless
/// of the order styles were configured in.
fn ordered(styles: &[PropagationStyle]) -> Vec<PropagationStyle> {
    let mut ordered = Vec::with_capacity(styles.len());
    for style in [
        PropagationStyle::Datadog,
        PropagationStyle::B3,
        PropagationStyle::TraceContext,
    ] {
        if styles.contains(&style) {
            ordered.push(style);
        }
    }
    ordered
}
