// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use datadog_tracer::clock::default_clock;
use datadog_tracer::id::IdGenerator;
use datadog_tracer::{Collector, Config, Error, TraceChunk, Tracer};

/// Collector that records every chunk it is handed.
pub struct CapturingCollector {
    chunks: Mutex<Vec<TraceChunk>>,
}

impl CapturingCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(CapturingCollector {
            chunks: Mutex::new(Vec::new()),
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn take_chunks(&self) -> Vec<TraceChunk> {
        std::mem::take(&mut self.chunks.lock().unwrap())
    }
}

impl Collector for CapturingCollector {
    fn send(&self, chunk: TraceChunk) -> Result<(), Error> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }

    fn shutdown(&self, _deadline: Duration) {}
}

/// Deterministic ID source: 1, 2, 3, ...
pub struct SequentialIds(AtomicU64);

impl SequentialIds {
    pub fn starting_at(first: u64) -> Arc<Self> {
        Arc::new(SequentialIds(AtomicU64::new(first)))
    }
}

impl IdGenerator for SequentialIds {
    fn generate(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// A tracer wired to a capturing collector and sequential IDs.
pub fn test_tracer(config: Config, collector: Arc<CapturingCollector>) -> Tracer {
    Tracer::with_collaborators(
        config,
        collector,
        SequentialIds::starting_at(1),
        default_clock(),
    )
    .expect("test tracer config is valid")
}
