// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span and trace ID generation.

use std::sync::Arc;

/// Source of 64-bit span identifiers.
///
/// Implementations must never return zero: zero is reserved to mean
/// "no parent". Tests substitute deterministic generators through this
/// trait.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> u64;
}

/// Uniformly random IDs from the thread-local generator.
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> u64 {
        // The range excludes zero, which marks a root span's parent.
        fastrand::u64(1..)
    }
}

pub fn default_id_generator() -> Arc<dyn IdGenerator> {
    Arc::new(RandomIdGenerator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_generates_zero() {
        let generator = RandomIdGenerator;
        for _ in 0..10_000 {
            assert_ne!(generator.generate(), 0);
        }
    }
}
