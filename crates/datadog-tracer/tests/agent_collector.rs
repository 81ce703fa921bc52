// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end flow through the agent collector: tracer → finished span →
//! batched flush → MessagePack POST → sampling-rate feedback.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::SequentialIds;
use datadog_tracer::agent::{DatadogAgent, TRACES_PATH};
use datadog_tracer::clock::default_clock;
use datadog_tracer::http::{AgentUrl, HttpClient, HttpResponse};
use datadog_tracer::{Config, Error, SpanConfig, Tracer};

struct RecordedRequest {
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// HTTP client double that records requests and serves a canned response.
struct RecordingClient {
    requests: Mutex<Vec<RecordedRequest>>,
    response_body: String,
}

impl RecordingClient {
    fn with_response_body(body: &str) -> Arc<Self> {
        Arc::new(RecordingClient {
            requests: Mutex::new(Vec::new()),
            response_body: body.to_string(),
        })
    }
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn post(
        &self,
        _url: &AgentUrl,
        path: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, Error> {
        self.requests.lock().unwrap().push(RecordedRequest {
            path: path.to_string(),
            headers: headers.to_vec(),
            body,
        });
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: self.response_body.as_bytes().to_vec(),
        })
    }
}

fn tracer_with_agent(client: Arc<RecordingClient>) -> Tracer {
    // A long interval: flushing is driven by shutdown, keeping the tests
    // deterministic.
    let agent = DatadogAgent::new(
        "http://localhost:8126",
        Duration::from_secs(3600),
        client as Arc<dyn HttpClient>,
    )
    .expect("agent collector starts");
    Tracer::with_collaborators(
        Config::new("svc"),
        Arc::new(agent),
        SequentialIds::starting_at(1),
        default_clock(),
    )
    .expect("tracer config is valid")
}

#[test]
fn root_span_reaches_the_agent_as_one_chunk_of_one_span() {
    let client = RecordingClient::with_response_body("{}");
    let tracer = tracer_with_agent(Arc::clone(&client));

    let mut span = tracer.create_span(SpanConfig {
        name: Some("handle.request".to_string()),
        ..SpanConfig::default()
    });
    span.set_tag("k", "v");
    span.finish();
    tracer.shutdown(Duration::from_secs(5));

    let requests = client.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.path, TRACES_PATH);

    let header = |name: &str| {
        request
            .headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };
    assert_eq!(header("Content-Type"), Some("application/msgpack"));
    assert_eq!(header("Datadog-Meta-Lang"), Some("rust"));
    assert_eq!(header("X-Datadog-Trace-Count"), Some("1"));
    assert!(header("Datadog-Meta-Tracer-Version").is_some());
    assert!(header("Datadog-Meta-Lang-Version").is_some());

    let decoded: Vec<Vec<serde_json::Value>> =
        rmp_serde::from_slice(&request.body).expect("payload is valid msgpack");
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].len(), 1);

    let wire_span = &decoded[0][0];
    assert_eq!(wire_span["service"], "svc");
    assert_eq!(wire_span["name"], "handle.request");
    assert_eq!(wire_span["parent_id"], 0);
    assert_eq!(wire_span["meta"]["k"], "v");
    assert!(wire_span["duration"].as_i64().unwrap() >= 0);
    assert_eq!(wire_span["metrics"]["_sampling_priority_v1"], 1.0);
}

#[test]
fn agent_rate_feedback_drives_later_sampling_decisions() {
    let client = RecordingClient::with_response_body(
        r#"{"rate_by_service":{"service:svc,env:":0.0}}"#,
    );
    let tracer = tracer_with_agent(Arc::clone(&client));

    let first = tracer.create_span(SpanConfig::default());
    first.finish();
    tracer.shutdown(Duration::from_secs(5));
    assert_eq!(client.requests.lock().unwrap().len(), 1);

    // The published zero rate now auto-rejects new local traces, which is
    // visible in the injected priority.
    let second = tracer.create_span(SpanConfig::default());
    let headers = second.inject_into_map();
    assert_eq!(headers["x-datadog-sampling-priority"], "0");
}

#[test]
fn traces_finished_after_shutdown_are_not_lost_silently() {
    // They accumulate in the collector queue; nothing panics and sends
    // still succeed.
    let client = RecordingClient::with_response_body("{}");
    let tracer = tracer_with_agent(Arc::clone(&client));
    tracer.shutdown(Duration::from_secs(5));

    let span = tracer.create_span(SpanConfig::default());
    span.finish();
}
