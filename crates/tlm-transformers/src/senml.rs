// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key-filter (SenML-style) transformer
//!
//! Emits one [`SenmlRecord`] per permitted payload leaf. Nested objects are
//! walked and their leaves named by the `/`-joined path from the top-level
//! key; an object never yields a record for itself.

use crate::error::{SchemaError, TransformError};
use crate::filter::KeyFilter;
use crate::message::RawMessage;
use crate::record::{Batch, RecordKind, RecordValue, SenmlRecord};
use crate::value::Value;
use crate::Transformer;

/// Payload encoding accepted by [`KeyFilterTransformer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Cbor,
}

/// Transformer producing SenML-like key/value records.
#[derive(Debug, Clone, Default)]
pub struct KeyFilterTransformer {
    encoding: Encoding,
    keys: KeyFilter,
}

impl KeyFilterTransformer {
    pub fn new(encoding: Encoding, keys: KeyFilter) -> Self {
        Self { encoding, keys }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn decode(&self, payload: &[u8]) -> Result<Value, TransformError> {
        match self.encoding {
            Encoding::Json => Value::from_json_slice(payload),
            Encoding::Cbor => Value::from_cbor_slice(payload),
        }
    }
}

impl Transformer for KeyFilterTransformer {
    fn transform(&self, msg: &RawMessage) -> Result<Batch, TransformError> {
        let root = match self.decode(&msg.payload)? {
            Value::Mapping(map) => map,
            other => return Err(SchemaError::UnknownFormat(other.kind_name()).into()),
        };

        let time = msg.created as f64 / 1e9;
        let mut records = Vec::new();

        for (key, value) in root {
            if !self.keys.permits(&key) {
                continue;
            }
            collect(msg, time, key, value, &mut records);
        }

        Ok(Batch::Senml(records))
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Senml
    }
}

fn collect(msg: &RawMessage, time: f64, name: String, value: Value, out: &mut Vec<SenmlRecord>) {
    match value {
        Value::Mapping(children) => {
            for (child, value) in children {
                collect(msg, time, format!("{name}/{child}"), value, out);
            }
        }
        leaf => match record_value(leaf) {
            Some(value) => out.push(SenmlRecord {
                channel: msg.channel.clone(),
                subtopic: msg.subtopic.clone(),
                publisher: msg.publisher.clone(),
                protocol: msg.protocol.clone(),
                name,
                unit: String::new(),
                time,
                update_time: 0.0,
                sum: None,
                value,
            }),
            None => tracing::trace!("Skipping key {} without a SenML value", name),
        },
    }
}

/// Map a leaf to a SenML value by its runtime type.
///
/// Null, arrays and non-finite numbers (NaN, infinities from CBOR) have no
/// SenML value.
fn record_value(leaf: Value) -> Option<RecordValue> {
    match leaf {
        Value::Text(s) => Some(RecordValue::Text(s)),
        Value::Number(n) => {
            let v = n.as_f64();
            v.is_finite().then_some(RecordValue::Float(v))
        }
        Value::Bool(b) => Some(RecordValue::Bool(b)),
        Value::Bytes(b) => Some(RecordValue::Data(b)),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
