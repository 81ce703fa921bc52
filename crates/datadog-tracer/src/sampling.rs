// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling decision types.
//!
//! A trace-level sampling decision is a priority (positive keeps the trace,
//! non-positive drops it), the mechanism that produced it, and where the
//! decision came from. The origin drives the overwrite rules on a trace
//! segment: only a manual decision may replace an existing one.

/// Standard sampling priority values.
///
/// Any `i32` is accepted on the wire; these four are the values the tracer
/// itself produces.
pub mod priority {
    /// Explicitly dropped by the user.
    pub const USER_REJECT: i32 = -1;
    /// Dropped by automatic sampling.
    pub const AUTO_REJECT: i32 = 0;
    /// Kept by automatic sampling.
    pub const AUTO_KEEP: i32 = 1;
    /// Explicitly kept by the user.
    pub const USER_KEEP: i32 = 2;
}

/// How a sampling decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMechanism {
    /// The tracer's configured default rate.
    Default,
    /// A per-service rate published by the agent.
    AgentRate,
    /// A user-configured sampling rule matched.
    Rule,
    /// The application overrode the decision.
    Manual,
    /// A span-level sampling rule kept an individual span.
    SpanRule,
}

impl SamplingMechanism {
    /// Numeric encoding used in tags and agent payloads.
    pub fn value(self) -> i32 {
        match self {
            SamplingMechanism::Default => 0,
            SamplingMechanism::AgentRate => 1,
            SamplingMechanism::Rule => 3,
            SamplingMechanism::Manual => 4,
            SamplingMechanism::SpanRule => 8,
        }
    }
}

/// Where a segment's sampling decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingOrigin {
    /// Carried in from another process during extraction.
    Extracted,
    /// Computed locally by the trace sampler.
    Local,
    /// Set by the application through an override.
    Manual,
}

/// A resolved trace-level sampling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingDecision {
    pub priority: i32,
    /// Absent for extracted decisions: the upstream process does not
    /// propagate how it decided.
    pub mechanism: Option<SamplingMechanism>,
    pub origin: SamplingOrigin,
}

impl SamplingDecision {
    /// Whether this decision retains the trace.
    pub fn keeps(&self) -> bool {
        self.priority > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_priorities_keep() {
        let decision = SamplingDecision {
            priority: priority::AUTO_KEEP,
            mechanism: Some(SamplingMechanism::Default),
            origin: SamplingOrigin::Local,
        };
        assert!(decision.keeps());
    }

    #[test]
    fn non_positive_priorities_drop() {
        for p in [priority::USER_REJECT, priority::AUTO_REJECT] {
            let decision = SamplingDecision {
                priority: p,
                mechanism: None,
                origin: SamplingOrigin::Extracted,
            };
            assert!(!decision.keeps());
        }
    }
}
