// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonical record model
//!
//! Two storage-ready shapes come out of the transformers:
//!
//! - [`SenmlRecord`] -- one named measurement with a single typed value
//! - [`JsonRecord`] -- a whole document with its nested keys flattened
//!
//! A transform call yields exactly one [`Batch`], tagged with its shape, so
//! repositories branch once per batch instead of inspecting every record.

use crate::message::base64_bytes;
use crate::value::Map;
use serde::Serialize;
use std::fmt;

/// Which shape a batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Json,
    Senml,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Json => write!(f, "json"),
            RecordKind::Senml => write!(f, "senml"),
        }
    }
}

/// The single value of a SenML record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RecordValue {
    #[serde(rename = "value")]
    Float(f64),
    #[serde(rename = "string_value")]
    Text(String),
    #[serde(rename = "bool_value")]
    Bool(bool),
    #[serde(rename = "data_value", serialize_with = "base64_bytes::serialize")]
    Data(Vec<u8>),
}

impl RecordValue {
    /// Column / field name the value is persisted under.
    pub fn field_name(&self) -> &'static str {
        match self {
            RecordValue::Float(_) => "value",
            RecordValue::Text(_) => "string_value",
            RecordValue::Bool(_) => "bool_value",
            RecordValue::Data(_) => "data_value",
        }
    }
}

/// SenML-like measurement record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenmlRecord {
    pub channel: String,
    pub subtopic: String,
    pub publisher: String,
    pub protocol: String,
    pub name: String,
    pub unit: String,
    /// Measurement time (Unix seconds, fractional)
    pub time: f64,
    pub update_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(flatten)]
    pub value: RecordValue,
}

/// Flattened JSON document record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRecord {
    pub channel: String,
    pub subtopic: String,
    pub publisher: String,
    pub protocol: String,
    /// Creation time (Unix nanoseconds)
    pub created: i64,
    /// `/`-joined key paths to non-object values
    pub payload: Map,
}

/// JSON records produced from one message, with their format tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonBatch {
    pub format: String,
    pub records: Vec<JsonRecord>,
}

/// Output of one transform call.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Json(JsonBatch),
    Senml(Vec<SenmlRecord>),
}

impl Batch {
    pub fn kind(&self) -> RecordKind {
        match self {
            Batch::Json(_) => RecordKind::Json,
            Batch::Senml(_) => RecordKind::Senml,
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        match self {
            Batch::Json(batch) => batch.records.len(),
            Batch::Senml(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
