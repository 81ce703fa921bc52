// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The agent collector: batches finished traces and ships them over HTTP.
//!
//! `send` only appends to an in-memory vector under a short lock, so the
//! application thread that finishes the last span of a trace never touches
//! the network. A background tick (default every 2 seconds) swaps the
//! vector out, serializes the batch to MessagePack, and POSTs it to the
//! agent's traces endpoint on a runtime owned by the collector.
//!
//! The agent's response to a successful submission carries updated
//! per-service sampling rates; they are handed back to each chunk's trace
//! sampler. Failed submissions are logged and their batch is dropped:
//! there is no retry queue, and nothing is persisted.
//!
//! On shutdown the scheduled flush is cancelled, one final flush runs
//! synchronously, and in-flight requests are awaited up to the caller's
//! deadline. Whatever has not completed by then is abandoned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::collector::{Collector, TraceChunk};
use crate::error::{Error, ErrorKind};
use crate::http::{AgentUrl, HttpClient};
use crate::rate::Rate;
use crate::span_data::{SpanData, WireSpan};

/// Path of the traces endpoint, appended to the configured agent URL.
pub const TRACES_PATH: &str = "/v0.4/traces";

const LANG_VERSION: &str = match option_env!("CARGO_PKG_RUST_VERSION") {
    Some(version) => version,
    None => "unknown",
};

struct FlushShared {
    http_client: Arc<dyn HttpClient>,
    url: AgentUrl,
}

/// Collector that batches trace chunks and submits them to a
/// Datadog-compatible agent.
pub struct DatadogAgent {
    incoming: Arc<Mutex<Vec<TraceChunk>>>,
    shared: Arc<FlushShared>,
    cancel: CancellationToken,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    runtime: tokio::runtime::Runtime,
}

impl DatadogAgent {
    /// Starts the collector's flush loop on its own single-threaded
    /// runtime.
    pub fn new(
        agent_url: &str,
        flush_interval: Duration,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, Error> {
        let url = AgentUrl::parse(agent_url)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dd-trace-flush")
            .enable_all()
            .build()
            .map_err(|io_error| {
                Error::new(
                    ErrorKind::HttpClientSetupFailed,
                    format!("failed to start the flush runtime: {io_error}"),
                )
            })?;

        let incoming = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(FlushShared { http_client, url });
        let cancel = CancellationToken::new();

        let flush_task = runtime.spawn(flush_loop(
            Arc::clone(&incoming),
            Arc::clone(&shared),
            cancel.clone(),
            flush_interval,
        ));

        Ok(DatadogAgent {
            incoming,
            shared,
            cancel,
            flush_task: Mutex::new(Some(flush_task)),
            runtime,
        })
    }
}

impl Collector for DatadogAgent {
    fn send(&self, chunk: TraceChunk) -> Result<(), Error> {
        let mut incoming = self
            .incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        incoming.push(chunk);
        Ok(())
    }

    /// Must not be called from within an async context: the final flush
    /// blocks the calling thread.
    fn shutdown(&self, deadline: Duration) {
        self.cancel.cancel();
        let flush_task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.runtime.block_on(async {
            let deadline_at = tokio::time::Instant::now() + deadline;
            // A tick-triggered flush may still be mid-request; wait for the
            // loop to wind down before the final drain.
            if let Some(flush_task) = flush_task {
                if tokio::time::timeout_at(deadline_at, flush_task).await.is_err() {
                    warn!("shutdown deadline elapsed waiting for the scheduled flush");
                    return;
                }
            }
            if tokio::time::timeout_at(deadline_at, flush(&self.incoming, &self.shared))
                .await
                .is_err()
            {
                warn!("shutdown deadline elapsed with a final flush in flight; abandoning it");
            }
        });
    }
}

async fn flush_loop(
    incoming: Arc<Mutex<Vec<TraceChunk>>>,
    shared: Arc<FlushShared>,
    cancel: CancellationToken,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; consume it so
    // the first real flush happens one interval from now.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => flush(&incoming, &shared).await,
            () = cancel.cancelled() => return,
        }
    }
}

async fn flush(incoming: &Mutex<Vec<TraceChunk>>, shared: &FlushShared) {
    // Hold the lock only to swap the batch out; serialization and the
    // request happen outside it.
    let chunks = {
        let mut guard = incoming.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard)
    };
    if chunks.is_empty() {
        return;
    }

    let trace_count = chunks.len();
    let payload = match encode_payload(&chunks) {
        Ok(payload) => payload,
        Err(encode_error) => {
            error!("dropping {trace_count} trace chunks that failed to serialize: {encode_error}");
            return;
        }
    };

    let headers = request_headers(trace_count);
    match shared
        .http_client
        .post(&shared.url, TRACES_PATH, &headers, payload)
        .await
    {
        Ok(response) if response.is_success() => {
            debug!("flushed {trace_count} trace chunks");
            apply_rate_feedback(&chunks, &response.body);
        }
        Ok(response) => {
            error!(
                "agent rejected a batch of {trace_count} trace chunks with status {}: {}",
                response.status,
                String::from_utf8_lossy(&response.body)
            );
        }
        Err(request_error) => {
            error!("dropping a batch of {trace_count} trace chunks: {request_error}");
        }
    }
}

/// The payload is an array of chunks, each chunk an array of span maps.
fn encode_payload(chunks: &[TraceChunk]) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let wire: Vec<Vec<WireSpan<'_>>> = chunks
        .iter()
        .map(|chunk| chunk.spans.iter().map(SpanData::to_wire).collect())
        .collect();
    rmp_serde::to_vec_named(&wire)
}

fn request_headers(trace_count: usize) -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "application/msgpack".to_string()),
        ("Datadog-Meta-Lang".to_string(), "rust".to_string()),
        (
            "Datadog-Meta-Lang-Version".to_string(),
            LANG_VERSION.to_string(),
        ),
        (
            "Datadog-Meta-Tracer-Version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        ("X-Datadog-Trace-Count".to_string(), trace_count.to_string()),
    ]
}

#[derive(Deserialize)]
struct RatesResponse {
    #[serde(default)]
    rate_by_service: HashMap<String, f64>,
}

/// Publishes the agent's per-service rates to each chunk's sampler.
fn apply_rate_feedback(chunks: &[TraceChunk], body: &[u8]) {
    let response: RatesResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(parse_error) => {
            debug!("could not parse sampling rates from the agent response: {parse_error}");
            return;
        }
    };
    if response.rate_by_service.is_empty() {
        return;
    }

    let mut rates = HashMap::with_capacity(response.rate_by_service.len());
    for (key, value) in response.rate_by_service {
        match Rate::try_from(value) {
            Ok(rate) => {
                rates.insert(key, rate);
            }
            Err(rate_error) => warn!("ignoring agent rate for {key:?}: {rate_error}"),
        }
    }

    // Chunks usually share one sampler; update each distinct one once.
    let mut updated: Vec<&Arc<crate::trace_sampler::TraceSampler>> = Vec::new();
    for chunk in chunks {
        if updated
            .iter()
            .any(|sampler| Arc::ptr_eq(sampler, &chunk.sampler))
        {
            continue;
        }
        chunk.sampler.update_rates(rates.clone());
        updated.push(&chunk.sampler);
    }
}
