// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Codec for the `x-datadog-tags` header.
//!
//! The header is a comma-separated list of `key=value` pairs. Only keys
//! under the `_dd.p.` namespace are propagated; anything else in the header
//! is dropped on decode. Decode failures are recoverable at the tracer
//! level: the caller records a diagnostic on the root span and continues.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, ErrorKind};

/// Maximum accepted length of the encoded header, in bytes.
pub const MAX_ENCODED_LENGTH: usize = 512;

/// Prefix of tag keys that participate in propagation.
pub(crate) const PROPAGATED_TAG_PREFIX: &str = "_dd.p.";

/// Decodes the header into a tag map.
///
/// An empty header decodes to an empty map. Pairs without a `=` fail with
/// [`ErrorKind::MalformedTraceTags`]; input longer than
/// [`MAX_ENCODED_LENGTH`] fails with
/// [`ErrorKind::TraceTagsExceedMaximumLength`].
pub fn decode(header: &str) -> Result<HashMap<String, String>, Error> {
    if header.len() > MAX_ENCODED_LENGTH {
        return Err(Error::new(
            ErrorKind::TraceTagsExceedMaximumLength,
            format!(
                "x-datadog-tags header is {} bytes long, above the maximum of {MAX_ENCODED_LENGTH}",
                header.len()
            ),
        ));
    }

    let mut tags = HashMap::new();
    if header.is_empty() {
        return Ok(tags);
    }

    for pair in header.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::new(
                ErrorKind::MalformedTraceTags,
                format!("expected key=value pair in x-datadog-tags, found \"{pair}\""),
            ));
        };
        if key.starts_with(PROPAGATED_TAG_PREFIX) {
            tags.insert(key.to_string(), value.to_string());
        }
    }

    Ok(tags)
}

/// Encodes a tag map into the header value, keys in sorted order so the
/// output is deterministic.
pub fn encode(tags: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&str, &str> = tags
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_propagated_tags_only() {
        let tags = decode("_dd.p.dm=-4,_dd.p.usr.id=baz64,other=dropped").unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["_dd.p.dm"], "-4");
        assert_eq!(tags["_dd.p.usr.id"], "baz64");
    }

    #[test]
    fn decode_empty_header_is_empty_map() {
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_pair_without_separator() {
        let error = decode("_dd.p.dm-4").unwrap_err();
        assert_eq!(error.kind, ErrorKind::MalformedTraceTags);
    }

    #[test]
    fn decode_rejects_oversized_header() {
        let oversized = format!("_dd.p.big={}", "x".repeat(MAX_ENCODED_LENGTH));
        let error = decode(&oversized).unwrap_err();
        assert_eq!(error.kind, ErrorKind::TraceTagsExceedMaximumLength);
    }

    #[test]
    fn encode_decode_round_trip() {
        let tags = HashMap::from([
            ("_dd.p.dm".to_string(), "-4".to_string()),
            ("_dd.p.usr.id".to_string(), "baz64".to_string()),
        ]);
        assert_eq!(decode(&encode(&tags)).unwrap(), tags);
    }

    #[test]
    fn encode_is_deterministic() {
        let tags = HashMap::from([
            ("_dd.p.b".to_string(), "2".to_string()),
            ("_dd.p.a".to_string(), "1".to_string()),
        ]);
        assert_eq!(encode(&tags), "_dd.p.a=1,_dd.p.b=2");
    }
}
