// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span-level sampling for traces the trace sampler dropped.
//!
//! When a trace is dropped, span sampling rules can still retain individual
//! spans (e.g. keep all `db.query` spans regardless of trace sampling).
//! Retained spans are marked with the span-sampling metrics the agent
//! expects; the chunk is then shipped even though its trace priority is
//! non-positive.

use crate::error::Error;
use crate::rate::Rate;
use crate::sampling::SamplingMechanism;
use crate::span_data::SpanData;
use crate::trace_sampler::knuth_keeps;

/// Metric marking a span kept by a span sampling rule.
const SPAN_SAMPLING_MECHANISM_METRIC: &str = "_dd.span_sampling.mechanism";
/// Metric recording the rate of the rule that kept the span.
const SPAN_SAMPLING_RULE_RATE_METRIC: &str = "_dd.span_sampling.rule_rate";

/// One span sampling rule.
#[derive(Debug, Clone, Default)]
pub struct SpanSamplingRuleConfig {
    /// Matches any service when absent.
    pub service: Option<String>,
    /// Matches any operation name when absent.
    pub name: Option<String>,
    pub rate: f64,
}

/// Configuration for [`SpanSampler`]. With no rules, dropped traces keep no
/// spans.
#[derive(Debug, Clone, Default)]
pub struct SpanSamplerConfig {
    pub rules: Vec<SpanSamplingRuleConfig>,
}

#[derive(Debug)]
struct SpanSamplingRule {
    service: Option<String>,
    name: Option<String>,
    rate: Rate,
}

impl SpanSamplingRule {
    fn matches(&self, span: &SpanData) -> bool {
        self.service.as_ref().is_none_or(|service| *service == span.service)
            && self.name.as_ref().is_none_or(|name| *name == span.name)
    }
}

/// Applies span sampling rules to the spans of a dropped trace.
#[derive(Debug)]
pub struct SpanSampler {
    rules: Vec<SpanSamplingRule>,
}

impl SpanSampler {
    pub fn new(config: &SpanSamplerConfig) -> Result<Self, Error> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            rules.push(SpanSamplingRule {
                service: rule.service.clone(),
                name: rule.name.clone(),
                rate: Rate::try_from(rule.rate)
                    .map_err(|error| error.with_prefix("invalid span_sampler rule rate: "))?,
            });
        }
        Ok(SpanSampler { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Marks spans retained by the first matching rule.
    ///
    /// The keep decision is deterministic in the span ID, the span-level
    /// analogue of the trace sampler's hash.
    pub fn sample(&self, spans: &mut [SpanData]) {
        for span in spans {
            let Some(rule) = self.rules.iter().find(|rule| rule.matches(span)) else {
                continue;
            };
            if knuth_keeps(span.span_id, rule.rate) {
                span.metrics.insert(
                    SPAN_SAMPLING_MECHANISM_METRIC.to_string(),
                    f64::from(SamplingMechanism::SpanRule.value()),
                );
                span.metrics
                    .insert(SPAN_SAMPLING_RULE_RATE_METRIC.to_string(), rule.rate.value());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::default_clock;
    use crate::span_data::{SpanConfig, SpanDefaults};

    fn span(service: &str, name: &str, span_id: u64) -> SpanData {
        let defaults = SpanDefaults {
            service: service.to_string(),
            name: name.to_string(),
            ..SpanDefaults::default()
        };
        let mut span = SpanData::with_config(&defaults, SpanConfig::default(), &default_clock());
        span.span_id = span_id;
        span
    }

    #[test]
    fn matching_rule_marks_kept_spans() {
        let sampler = SpanSampler::new(&SpanSamplerConfig {
            rules: vec![SpanSamplingRuleConfig {
                service: None,
                name: Some("db.query".to_string()),
                rate: 1.0,
            }],
        })
        .unwrap();

        let mut spans = vec![span("svc", "db.query", 10), span("svc", "http.request", 11)];
        sampler.sample(&mut spans);

        assert_eq!(spans[0].metrics["_dd.span_sampling.mechanism"], 8.0);
        assert_eq!(spans[0].metrics["_dd.span_sampling.rule_rate"], 1.0);
        assert!(spans[1].metrics.is_empty());
    }

    #[test]
    fn zero_rate_rule_keeps_nothing() {
        let sampler = SpanSampler::new(&SpanSamplerConfig {
            rules: vec![SpanSamplingRuleConfig {
                service: None,
                name: None,
                rate: 0.0,
            }],
        })
        .unwrap();

        let mut spans = vec![span("svc", "op", 10)];
        sampler.sample(&mut spans);
        assert!(spans[0].metrics.is_empty());
    }

    #[test]
    fn invalid_rule_rate_is_rejected() {
        let error = SpanSampler::new(&SpanSamplerConfig {
            rules: vec![SpanSamplingRuleConfig {
                service: None,
                name: None,
                rate: -0.5,
            }],
        })
        .unwrap_err();
        assert_eq!(error.kind, crate::error::ErrorKind::RateOutOfRange);
    }
}
