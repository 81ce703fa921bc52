// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace-level sampling.
//!
//! The sampler turns the root span of a segment into a [`SamplingDecision`].
//! Decisions are deterministic in the trace ID: a fixed rate always produces
//! the same verdict for the same trace, so every service in a distributed
//! trace that applies the same rate agrees without coordination.
//!
//! Rates come from three places, in precedence order: user-configured rules
//! (first match wins), per-service rates published by the agent in flush
//! responses, and the configured default. The agent rate table is read on
//! every local root span and replaced wholesale when the agent responds, so
//! it is published through an `Arc` swap rather than mutated in place.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::rate::Rate;
use crate::sampling::{priority, SamplingDecision, SamplingMechanism, SamplingOrigin};
use crate::span_data::SpanData;

/// Multiplier for the deterministic keep/drop hash, from Knuth's
/// multiplicative hashing scheme. Shared across Datadog tracers so that
/// they agree on the same trace IDs.
const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

/// Deterministic keep decision: hash the ID and compare against the rate's
/// share of the 64-bit space.
pub(crate) fn knuth_keeps(id: u64, rate: Rate) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let threshold = rate.value() * u64::MAX as f64;
    #[allow(clippy::cast_precision_loss)]
    let hashed = id.wrapping_mul(KNUTH_FACTOR) as f64;
    hashed <= threshold
}

/// One user-configured sampling override.
#[derive(Debug, Clone, Default)]
pub struct SamplingRuleConfig {
    /// Matches any service when absent.
    pub service: Option<String>,
    /// Matches any operation name when absent.
    pub name: Option<String>,
    pub rate: f64,
}

/// Configuration for [`TraceSampler`].
#[derive(Debug, Clone, Default)]
pub struct TraceSamplerConfig {
    /// Rate applied when no rule matches and the agent has not published a
    /// rate for the service. Keeps everything when absent.
    pub sample_rate: Option<f64>,
    /// Prioritized overrides; the first matching rule wins.
    pub rules: Vec<SamplingRuleConfig>,
}

#[derive(Debug)]
struct SamplingRule {
    service: Option<String>,
    name: Option<String>,
    rate: Rate,
}

impl SamplingRule {
    fn matches(&self, span: &SpanData) -> bool {
        self.service.as_ref().is_none_or(|service| *service == span.service)
            && self.name.as_ref().is_none_or(|name| *name == span.name)
    }
}

/// Converts a trace into a sampling decision, and receives rate feedback
/// from the agent.
#[derive(Debug)]
pub struct TraceSampler {
    rules: Vec<SamplingRule>,
    default_rate: Rate,
    /// Keyed `"service:{service},env:{environment}"`, the agent's own key
    /// format. Replaced wholesale on feedback, hence the pointer swap.
    agent_rates: RwLock<Arc<HashMap<String, Rate>>>,
}

impl TraceSampler {
    pub fn new(config: &TraceSamplerConfig) -> Result<Self, Error> {
        let default_rate = match config.sample_rate {
            Some(rate) => Rate::try_from(rate)
                .map_err(|error| error.with_prefix("invalid trace_sampler.sample_rate: "))?,
            None => Rate::one(),
        };

        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            rules.push(SamplingRule {
                service: rule.service.clone(),
                name: rule.name.clone(),
                rate: Rate::try_from(rule.rate)
                    .map_err(|error| error.with_prefix("invalid trace_sampler rule rate: "))?,
            });
        }

        Ok(TraceSampler {
            rules,
            default_rate,
            agent_rates: RwLock::new(Arc::new(HashMap::new())),
        })
    }

    /// Decides retention for the trace rooted at `root`.
    ///
    /// Rules give user-level priorities, rate sources give automatic ones,
    /// so the agent can tell which decisions it may revise through rate
    /// feedback.
    pub fn decide(&self, root: &SpanData) -> SamplingDecision {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(root)) {
            let keep = knuth_keeps(root.trace_id, rule.rate);
            return SamplingDecision {
                priority: if keep {
                    priority::USER_KEEP
                } else {
                    priority::USER_REJECT
                },
                mechanism: Some(SamplingMechanism::Rule),
                origin: SamplingOrigin::Local,
            };
        }

        let (rate, mechanism) = {
            let rates = self
                .agent_rates
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match rates.get(&agent_rate_key(root)) {
                Some(rate) => (*rate, SamplingMechanism::AgentRate),
                None => (self.default_rate, SamplingMechanism::Default),
            }
        };

        let keep = knuth_keeps(root.trace_id, rate);
        SamplingDecision {
            priority: if keep {
                priority::AUTO_KEEP
            } else {
                priority::AUTO_REJECT
            },
            mechanism: Some(mechanism),
            origin: SamplingOrigin::Local,
        }
    }

    /// Atomically publishes a new agent rate table.
    pub fn update_rates(&self, rates: HashMap<String, Rate>) {
        let mut guard = self
            .agent_rates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Arc::new(rates);
    }
}

fn agent_rate_key(span: &SpanData) -> String {
    format!(
        "service:{},env:{}",
        span.service,
        span.environment.as_deref().unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::default_clock;
    use crate::span_data::{SpanConfig, SpanDefaults};

    fn root_span(service: &str, name: &str, trace_id: u64) -> SpanData {
        let defaults = SpanDefaults {
            service: service.to_string(),
            service_type: "web".to_string(),
            environment: Some("prod".to_string()),
            name: name.to_string(),
            ..SpanDefaults::default()
        };
        let mut span = SpanData::with_config(&defaults, SpanConfig::default(), &default_clock());
        span.trace_id = trace_id;
        span.span_id = trace_id;
        span
    }

    #[test]
    fn knuth_is_deterministic_and_respects_bounds() {
        for trace_id in [1, 42, u64::MAX, 0x80f1_98ee_5634_3ba8] {
            assert!(knuth_keeps(trace_id, Rate::one()));
            assert!(!knuth_keeps(trace_id, Rate::zero()));
            let rate = Rate::try_from(0.5).unwrap();
            assert_eq!(knuth_keeps(trace_id, rate), knuth_keeps(trace_id, rate));
        }
    }

    #[test]
    fn default_rate_keeps_with_auto_priority() {
        let sampler = TraceSampler::new(&TraceSamplerConfig::default()).unwrap();
        let decision = sampler.decide(&root_span("svc", "op", 7));
        assert_eq!(decision.priority, priority::AUTO_KEEP);
        assert_eq!(decision.mechanism, Some(SamplingMechanism::Default));
        assert_eq!(decision.origin, SamplingOrigin::Local);
    }

    #[test]
    fn matching_rule_gives_user_priority() {
        let config = TraceSamplerConfig {
            sample_rate: Some(1.0),
            rules: vec![SamplingRuleConfig {
                service: Some("svc".to_string()),
                name: None,
                rate: 0.0,
            }],
        };
        let sampler = TraceSampler::new(&config).unwrap();

        let decision = sampler.decide(&root_span("svc", "op", 7));
        assert_eq!(decision.priority, priority::USER_REJECT);
        assert_eq!(decision.mechanism, Some(SamplingMechanism::Rule));

        // A non-matching service falls through to the default rate.
        let decision = sampler.decide(&root_span("other", "op", 7));
        assert_eq!(decision.priority, priority::AUTO_KEEP);
    }

    #[test]
    fn agent_rates_override_the_default() {
        let config = TraceSamplerConfig {
            sample_rate: Some(1.0),
            rules: Vec::new(),
        };
        let sampler = TraceSampler::new(&config).unwrap();
        sampler.update_rates(HashMap::from([(
            "service:svc,env:prod".to_string(),
            Rate::zero(),
        )]));

        let decision = sampler.decide(&root_span("svc", "op", 7));
        assert_eq!(decision.priority, priority::AUTO_REJECT);
        assert_eq!(decision.mechanism, Some(SamplingMechanism::AgentRate));
    }

    #[test]
    fn invalid_rates_are_rejected_at_construction() {
        let config = TraceSamplerConfig {
            sample_rate: Some(1.5),
            rules: Vec::new(),
        };
        let error = TraceSampler::new(&config).unwrap_err();
        assert_eq!(error.kind, crate::error::ErrorKind::RateOutOfRange);
        assert!(error.message.contains("sample_rate"));
    }
}
