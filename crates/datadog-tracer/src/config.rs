// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracer configuration.
//!
//! Configuration is layered: hard-coded defaults, then programmatic values,
//! then environment variables, with later layers winning on conflict.
//! [`Config::apply_env`] applies the environment layer explicitly, so
//! construction order makes the precedence visible at the call site:
//!
//! ```rust,ignore
//! let mut config = Config::new("my-service");
//! config.environment = Some("prod".to_string());
//! config.apply_env(); // DD_* variables override the above
//! let tracer = Tracer::new(config)?;
//! ```
//!
//! Invalid environment values are logged and ignored rather than failing
//! startup, matching how the agent treats its own configuration. Validation
//! that must fail (rate bounds, the agent URL) happens in `Tracer::new`.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use tracing::error;

use crate::propagation::{parse_styles, PropagationStyle};
use crate::span_sampler::SpanSamplerConfig;
use crate::trace_sampler::TraceSamplerConfig;

/// Default agent endpoint, the trace agent's conventional local port.
pub const DEFAULT_AGENT_URL: &str = "http://localhost:8126";

/// How often the agent collector flushes batched traces.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Config {
    /// Default service tag on spans. Required; an empty value is replaced
    /// with a placeholder and logged.
    pub service: String,
    /// Default `env` tag on spans.
    pub environment: Option<String>,
    /// Default `version` tag on spans.
    pub version: Option<String>,
    /// Default span type.
    pub service_type: String,
    /// Default operation name for spans created without one.
    pub name: Option<String>,
    /// Tags applied to every span.
    pub tags: HashMap<String, String>,
    /// Trace submission endpoint. Supports `http://host:port` and the unix
    /// socket forms `unix://`, `http+unix://`, `https+unix://`.
    pub agent_url: String,
    /// Styles written by `Span::inject`, in order. Empty disables
    /// injection.
    pub injection_styles: Vec<PropagationStyle>,
    /// Styles consulted by `Tracer::extract_span`, in order.
    pub extraction_styles: Vec<PropagationStyle>,
    /// Include the hostname on local root spans.
    pub report_hostname: bool,
    pub trace_sampler: TraceSamplerConfig,
    pub span_sampler: SpanSamplerConfig,
    /// Period of the agent collector's flush tick.
    pub flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service: String::new(),
            environment: None,
            version: None,
            service_type: "web".to_string(),
            name: None,
            tags: HashMap::new(),
            agent_url: DEFAULT_AGENT_URL.to_string(),
            injection_styles: vec![PropagationStyle::Datadog],
            extraction_styles: vec![PropagationStyle::Datadog],
            report_hostname: false,
            trace_sampler: TraceSamplerConfig::default(),
            span_sampler: SpanSamplerConfig::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl Config {
    pub fn new(service: impl Into<String>) -> Self {
        Config {
            service: service.into(),
            ..Config::default()
        }
    }

    /// Applies `DD_*` environment variables on top of the current values.
    ///
    /// Environment wins over programmatic configuration on conflict. Unset
    /// and empty variables leave the current value in place; unparseable
    /// values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Some(service) = non_empty_var("DD_SERVICE") {
            self.service = service;
        }
        if let Some(environment) = non_empty_var("DD_ENV") {
            self.environment = Some(environment);
        }
        if let Some(version) = non_empty_var("DD_VERSION") {
            self.version = Some(version);
        }

        // DD_TRACE_AGENT_URL names the full endpoint and takes precedence
        // over the host-only DD_AGENT_HOST.
        if let Some(url) = non_empty_var("DD_TRACE_AGENT_URL") {
            self.agent_url = url;
        } else if let Some(host) = non_empty_var("DD_AGENT_HOST") {
            self.agent_url = format!("http://{host}:8126");
        }

        if let Some(rate) = non_empty_var("DD_TRACE_SAMPLE_RATE") {
            match rate.parse::<f64>() {
                Ok(rate) => self.trace_sampler.sample_rate = Some(rate),
                Err(parse_error) => {
                    error!("ignoring DD_TRACE_SAMPLE_RATE {rate:?}: {parse_error}");
                }
            }
        }

        if let Some(styles) = non_empty_var("DD_PROPAGATION_STYLE_INJECT") {
            self.injection_styles = parse_styles(&styles);
        }
        if let Some(styles) = non_empty_var("DD_PROPAGATION_STYLE_EXTRACT") {
            self.extraction_styles = parse_styles(&styles);
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}
