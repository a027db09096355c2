// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON document transformer
//!
//! Turns an object payload, or an array of objects, into flattened
//! [`JsonRecord`]s. Nested objects collapse into `/`-joined keys:
//!
//! ```text
//! {"a": {"b": 1, "c": [1, 2]}}  -->  {"a/b": 1, "a/c": [1, 2]}
//! ```
//!
//! Arrays are leaves and never expanded.

use crate::error::{SchemaError, TransformError};
use crate::filter::KeyFilter;
use crate::message::RawMessage;
use crate::record::{Batch, JsonBatch, JsonRecord, RecordKind};
use crate::value::{Map, Value};
use crate::Transformer;
use std::collections::btree_map::Entry;

/// Path separator of flattened keys.
pub const SEPARATOR: char = '/';

/// Keys that would shadow record metadata.
pub const RESERVED_KEYS: [&str; 4] = ["publisher", "protocol", "channel", "subtopic"];

/// Format tag used when the message has no subtopic.
pub const DEFAULT_FORMAT: &str = "messages";

/// Transformer for plain JSON payloads.
#[derive(Debug, Clone, Default)]
pub struct JsonTransformer {
    keys: KeyFilter,
}

impl JsonTransformer {
    /// `keys` restricts which top-level keys of each object are kept.
    pub fn new(keys: KeyFilter) -> Self {
        Self { keys }
    }

    fn normalize(&self, object: Map) -> Result<Map, TransformError> {
        let mut flat = flatten(object)?;
        if !self.keys.is_wildcard() {
            flat.retain(|key, _| self.keys.permits(top_segment(key)));
        }
        Ok(flat)
    }
}

impl Transformer for JsonTransformer {
    fn transform(&self, msg: &RawMessage) -> Result<Batch, TransformError> {
        let root = Value::from_json_slice(&msg.payload)?;

        let payloads = match root {
            Value::Mapping(object) => vec![self.normalize(object)?],
            Value::Sequence(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::Mapping(object) => self.normalize(object),
                    _ => Err(SchemaError::NonObjectElement(index).into()),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(SchemaError::UnknownFormat(other.kind_name()).into()),
        };

        let records = payloads
            .into_iter()
            .map(|payload| JsonRecord {
                channel: msg.channel.clone(),
                subtopic: msg.subtopic.clone(),
                publisher: msg.publisher.clone(),
                protocol: msg.protocol.clone(),
                created: msg.created,
                payload,
            })
            .collect();

        Ok(Batch::Json(JsonBatch {
            format: format_from_subtopic(&msg.subtopic),
            records,
        }))
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Json
    }
}

/// Flatten nested objects into one level of `/`-joined keys.
///
/// Fails on the first reserved key or key containing the separator, at any
/// depth; nothing of the partial result is returned.
pub fn flatten(object: Map) -> Result<Map, SchemaError> {
    let mut out = Map::new();
    flatten_into("", object, &mut out)?;
    Ok(out)
}

fn flatten_into(prefix: &str, object: Map, out: &mut Map) -> Result<(), SchemaError> {
    for (key, value) in object {
        if RESERVED_KEYS.contains(&key.as_str()) || key.contains(SEPARATOR) {
            return Err(SchemaError::InvalidKey(key));
        }

        match value {
            Value::Mapping(inner) => {
                let nested = format!("{prefix}{key}{SEPARATOR}");
                flatten_into(&nested, inner, out)?;
            }
            leaf => match out.entry(format!("{prefix}{key}")) {
                Entry::Vacant(slot) => {
                    slot.insert(leaf);
                }
                Entry::Occupied(slot) => return Err(SchemaError::KeyCollision(slot.key().clone())),
            },
        }
    }

    Ok(())
}

/// Last `.`-separated segment of the subtopic.
fn format_from_subtopic(subtopic: &str) -> String {
    if subtopic.is_empty() {
        return DEFAULT_FORMAT.to_string();
    }
    subtopic.rsplit('.').next().unwrap_or(subtopic).to_string()
}

fn top_segment(key: &str) -> &str {
    key.split(SEPARATOR).next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Number;
    use serde_json::json;

    fn message(payload: serde_json::Value) -> RawMessage {
        RawMessage::new("channel-1", serde_json::to_vec(&payload).unwrap())
            .with_subtopic("subtopic.json")
            .with_publisher("publisher-1")
            .with_protocol("mqtt")
            .with_created(1_700_000_000_123_456_789)
    }

    fn object(value: serde_json::Value) -> Map {
        match Value::from(value) {
            Value::Mapping(map) => map,
            other => panic!("expected object, got {}", other.kind_name()),
        }
    }

    fn expect_json(batch: Batch) -> JsonBatch {
        match batch {
            Batch::Json(batch) => batch,
            other => panic!("expected JSON batch, got {}", other.kind()),
        }
    }

    #[test]
    fn test_flatten_nested_paths() {
        let flat = flatten(object(json!({
            "a": 1,
            "b": {"c": "x", "d": {"e": true, "f": [1, {"g": 2}]}},
            "h": null,
            "empty": {}
        })))
        .unwrap();

        let keys: Vec<_> = flat.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b/c", "b/d/e", "b/d/f", "h"]);
        assert_eq!(flat["b/d/e"], Value::Bool(true));
        // Arrays stay opaque, even when they hold objects
        assert!(matches!(flat["b/d/f"], Value::Sequence(ref items) if items.len() == 2));
    }

    #[test]
    fn test_flatten_split_recovers_nesting() {
        let source = object(json!({"x": {"y": {"z": 3}}, "w": 4}));
        let flat = flatten(source.clone()).unwrap();

        for (key, leaf) in &flat {
            let mut cursor = &source;
            let segments: Vec<_> = key.split(SEPARATOR).collect();
            for segment in &segments[..segments.len() - 1] {
                cursor = cursor[*segment].as_mapping().unwrap();
            }
            assert_eq!(&cursor[*segments.last().unwrap()], leaf);
        }
    }

    #[test]
    fn test_flatten_rejects_reserved_keys_at_any_depth() {
        for reserved in RESERVED_KEYS {
            let top = object(json!({ reserved: 1 }));
            assert!(matches!(flatten(top), Err(SchemaError::InvalidKey(k)) if k == reserved));

            let deep = object(json!({"a": {"b": { reserved: "x" }}}));
            assert!(matches!(flatten(deep), Err(SchemaError::InvalidKey(k)) if k == reserved));
        }
    }

    #[test]
    fn test_flatten_rejects_separator_in_key() {
        let err = flatten(object(json!({"a": {"b/c": 1}}))).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidKey(k) if k == "b/c"));
    }

    #[test]
    fn test_transform_object() {
        let tr = JsonTransformer::default();
        let batch = expect_json(tr.transform(&message(json!({"temp": {"in": 21, "out": 3.5}}))).unwrap());

        assert_eq!(batch.format, "json");
        assert_eq!(batch.records.len(), 1);
        let record = &batch.records[0];
        assert_eq!(record.channel, "channel-1");
        assert_eq!(record.publisher, "publisher-1");
        assert_eq!(record.created, 1_700_000_000_123_456_789);
        assert_eq!(record.payload["temp/in"], Value::Number(Number::Integer(21)));
        assert_eq!(record.payload["temp/out"], Value::Number(Number::Float(3.5)));
    }

    #[test]
    fn test_transform_array_of_objects() {
        let tr = JsonTransformer::default();
        let batch = expect_json(tr.transform(&message(json!([{"a": 1}, {"b": 2}]))).unwrap());

        assert_eq!(batch.format, "json");
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].payload, object(json!({"a": 1})));
        assert_eq!(batch.records[1].payload, object(json!({"b": 2})));
        for record in &batch.records {
            assert_eq!(record.channel, "channel-1");
            assert_eq!(record.publisher, "publisher-1");
            assert_eq!(record.protocol, "mqtt");
            assert_eq!(record.created, 1_700_000_000_123_456_789);
        }
    }

    #[test]
    fn test_transform_array_with_scalar_fails_whole_batch() {
        let tr = JsonTransformer::default();
        let err = tr.transform(&message(json!([{"a": 1}, 2, {"b": 3}]))).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Schema(SchemaError::NonObjectElement(1))
        ));
    }

    #[test]
    fn test_transform_array_with_invalid_key_fails_whole_batch() {
        let tr = JsonTransformer::default();
        let err = tr
            .transform(&message(json!([{"a": 1}, {"channel": "x"}])))
            .unwrap_err();
        assert!(matches!(err, TransformError::Schema(SchemaError::InvalidKey(_))));
    }

    #[test]
    fn test_transform_root_scalar_fails() {
        let tr = JsonTransformer::default();
        for payload in [json!("hello"), json!(42), json!(true), json!(null)] {
            let err = tr.transform(&message(payload)).unwrap_err();
            assert!(matches!(
                err,
                TransformError::Schema(SchemaError::UnknownFormat(_))
            ));
        }
    }

    #[test]
    fn test_transform_malformed_payload() {
        let tr = JsonTransformer::default();
        let msg = RawMessage::new("c", b"{\"a\":".to_vec());
        assert!(tr.transform(&msg).unwrap_err().is_decode());
    }

    #[test]
    fn test_format_from_subtopic() {
        assert_eq!(format_from_subtopic(""), DEFAULT_FORMAT);
        assert_eq!(format_from_subtopic("engine.temperature.json"), "json");
        assert_eq!(format_from_subtopic("plain"), "plain");
    }

    #[test]
    fn test_key_filter_keeps_permitted_subtrees() {
        let tr = JsonTransformer::new(KeyFilter::from_list(["temp"]));
        let batch = expect_json(
            tr.transform(&message(json!({"temp": {"in": 1}, "hum": 40})))
                .unwrap(),
        );
        let keys: Vec<_> = batch.records[0].payload.keys().cloned().collect();
        assert_eq!(keys, vec!["temp/in"]);
    }

    #[test]
    fn test_key_filter_does_not_hide_invalid_keys() {
        let tr = JsonTransformer::new(KeyFilter::from_list(["temp"]));
        let err = tr
            .transform(&message(json!({"temp": 1, "other": {"protocol": 2}})))
            .unwrap_err();
        assert!(matches!(err, TransformError::Schema(SchemaError::InvalidKey(_))));
    }
}
