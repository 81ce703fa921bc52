// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carrier traits for trace context propagation.
//!
//! Carriers abstract over the transport that headers travel in (HTTP
//! headers, message metadata, a plain map in tests). All implementations
//! are case-insensitive, since HTTP intermediaries may change header
//! casing.
//!
//! Inspired by the propagation API of the OpenTelemetry Rust project:
//! <https://github.com/open-telemetry/opentelemetry-rust/blob/main/opentelemetry/src/propagation/mod.rs>

use std::collections::HashMap;

/// Writes propagation headers into a carrier.
///
/// Keys are normalized to lowercase so that lookups through [`Extractor`]
/// are case-insensitive.
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

/// Reads propagation headers from a carrier.
pub trait Extractor {
    /// Looks up a header value by case-insensitive key.
    fn get(&self, key: &str) -> Option<&str>;

    /// All keys present in the carrier, in their stored (lowercase) form.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_get_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.set("X-Datadog-Trace-Id", "123".to_string());

        assert_eq!(Extractor::get(&carrier, "x-datadog-trace-id"), Some("123"));
        assert_eq!(Extractor::get(&carrier, "X-DATADOG-TRACE-ID"), Some("123"));
    }

    #[test]
    fn hash_map_keys_are_lowercased() {
        let mut carrier = HashMap::new();
        carrier.set("TraceParent", "value".to_string());

        assert_eq!(Extractor::keys(&carrier), vec!["traceparent"]);
    }
}
