// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamically-typed payload values
//!
//! Payloads arrive as JSON or CBOR documents of unknown shape. Both are
//! decoded into [`Value`], a recursive tree the transformers walk without
//! caring about the original encoding.

use crate::error::TransformError;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;

/// Object with string keys, iterated in key order.
pub type Map = BTreeMap<String, Value>;

/// Numeric leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Fits in a signed 64-bit integer.
    Integer(i64),
    /// Everything else.
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl From<&serde_json::Number> for Number {
    fn from(n: &serde_json::Number) -> Self {
        match n.as_i64() {
            Some(i) => Number::Integer(i),
            None => Number::Float(n.as_f64().unwrap_or(f64::NAN)),
        }
    }
}

/// Recursive payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Bytes(Vec<u8>),
    Sequence(Vec<Value>),
    Mapping(Map),
}

impl Value {
    /// Decode a JSON document.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, TransformError> {
        let json: serde_json::Value =
            serde_json::from_slice(bytes).map_err(TransformError::decode)?;
        Ok(json.into())
    }

    /// Decode a CBOR document. Maps must have text keys.
    pub fn from_cbor_slice(bytes: &[u8]) -> Result<Self, TransformError> {
        let cbor: ciborium::Value =
            ciborium::de::from_reader(bytes).map_err(TransformError::decode)?;
        Value::try_from(cbor)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Sequence(_) => "array",
            Value::Mapping(_) => "object",
        }
    }

    pub fn as_mapping(&self) -> Option<&Map> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(Number::from(&n)),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Mapping(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl TryFrom<ciborium::Value> for Value {
    type Error = TransformError;

    fn try_from(cbor: ciborium::Value) -> Result<Self, Self::Error> {
        use ciborium::Value as Cbor;

        let value = match cbor {
            Cbor::Null => Value::Null,
            Cbor::Bool(b) => Value::Bool(b),
            Cbor::Integer(i) => {
                let wide = i128::from(i);
                match i64::try_from(wide) {
                    Ok(narrow) => Value::Number(Number::Integer(narrow)),
                    Err(_) => Value::Number(Number::Float(wide as f64)),
                }
            }
            Cbor::Float(f) => Value::Number(Number::Float(f)),
            Cbor::Text(s) => Value::Text(s),
            Cbor::Bytes(b) => Value::Bytes(b),
            // Semantic tags carry no meaning for normalization.
            Cbor::Tag(_, inner) => Value::try_from(*inner)?,
            Cbor::Array(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Cbor::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let Cbor::Text(key) = key else {
                        return Err(TransformError::decode("CBOR map key is not a text string"));
                    };
                    map.insert(key, Value::try_from(value)?);
                }
                Value::Mapping(map)
            }
            _ => return Err(TransformError::decode("unsupported CBOR data item")),
        };

        Ok(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(Number::Integer(i)) => serializer.serialize_i64(*i),
            Value::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_str(&BASE64_STANDARD.encode(b)),
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}
