// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Tracer
//!
//! An in-process distributed-tracing client that produces trace data for a
//! Datadog-compatible agent.
//!
//! Application code obtains spans from a [`Tracer`], annotates them with
//! tags and timing, nests children to form a tree, and releases them. All
//! spans of one local trace share a trace segment; when the last one
//! finishes, the segment resolves its sampling decision and hands the
//! finished trace to a collector. The default collector batches traces and
//! ships them to the agent over HTTP in the background.
//!
//! ## Modules
//!
//! - [`tracer`]: span creation and context extraction
//! - [`span`]: the span handle given to applications
//! - [`trace_segment`]: shared per-trace state and finalization
//! - [`propagation`]: Datadog, B3, and W3C header codecs
//! - [`trace_sampler`] / [`span_sampler`]: the sampling pipeline
//! - [`agent`]: batching and HTTP submission to the agent
//! - [`http`]: the transport seam, including unix socket support
//!
//! ## Example
//!
//! ```rust,ignore
//! use datadog_tracer::{Config, SpanConfig, Tracer};
//!
//! let mut config = Config::new("my-service");
//! config.apply_env();
//! let tracer = Tracer::new(config)?;
//!
//! let mut request_span = tracer.create_span(SpanConfig {
//!     name: Some("handle.request".to_string()),
//!     ..SpanConfig::default()
//! });
//! request_span.set_tag("http.method", "GET");
//!
//! let child = request_span.create_child(SpanConfig {
//!     name: Some("db.query".to_string()),
//!     ..SpanConfig::default()
//! });
//! child.finish();
//! request_span.finish();
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod id;
pub mod propagation;
pub mod rate;
pub mod sampling;
pub mod span;
pub mod span_data;
pub mod span_sampler;
pub mod trace_sampler;
pub mod trace_segment;
pub mod tracer;

mod hostname;

pub use collector::{Collector, TraceChunk};
pub use config::Config;
pub use error::{Error, ErrorKind};
pub use propagation::carrier::{Extractor, Injector};
pub use propagation::PropagationStyle;
pub use rate::Rate;
pub use sampling::{SamplingDecision, SamplingMechanism, SamplingOrigin};
pub use span::Span;
pub use span_data::{SpanConfig, SpanData};
pub use tracer::Tracer;
