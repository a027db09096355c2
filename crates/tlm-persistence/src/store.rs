// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Repository contract
//!
//! Storage backends implement [`MessageRepository`] to persist transformer
//! batches and, when they can serve queries, [`MessageReader`].
//!
//! # Implementations
//!
//! - `SqliteStore` -- relational, reader and writer
//! - `MemoryStore` -- document collections in process, reader and writer
//! - `InfluxRepository` -- timestamped points, writer only
//!
//! Readers must be interchangeable: the same channel and filter map yield
//! the same records, in the same order, with the same total, whichever
//! backend serves them. [`ReadQuery`] holds the normalized query every
//! reader builds on.

use crate::context::Context;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use tlm_transformers::{Batch, RecordKind, RecordValue, SenmlRecord};

/// Filter keys a reader honours, in the order conditions are applied.
pub const FILTER_KEYS: [&str; 4] = ["subtopic", "publisher", "name", "protocol"];

/// Writer side of a storage backend.
pub trait MessageRepository: Send + Sync {
    /// Persist every record of the batch in one bulk operation.
    ///
    /// No retry and no partial-success tracking: an error means the batch as
    /// a whole failed, with whatever atomicity the backend offers.
    fn save(&self, ctx: &Context, batch: &Batch) -> Result<()>;

    /// Whether batches of this shape can be stored.
    fn accepts(&self, _kind: RecordKind) -> bool {
        true
    }

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Reader side of a storage backend.
pub trait MessageReader: Send + Sync {
    /// Page of SenML records of `channel`, newest first.
    ///
    /// `query` may hold `subtopic`, `publisher`, `name` and `protocol`
    /// equality filters; other keys are ignored. `total` counts every
    /// matching record regardless of `offset` / `limit`.
    fn read_all(
        &self,
        ctx: &Context,
        channel: &str,
        offset: u64,
        limit: u64,
        query: &HashMap<String, String>,
    ) -> Result<MessagesPage>;
}

/// One page of read results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub messages: Vec<SenmlRecord>,
}

/// Channel plus whitelisted filter conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadQuery<'a> {
    pub channel: &'a str,
    /// `(column, value)` pairs in [`FILTER_KEYS`] order
    pub conditions: Vec<(&'static str, &'a str)>,
}

impl<'a> ReadQuery<'a> {
    pub fn new(channel: &'a str, query: &'a HashMap<String, String>) -> Self {
        let conditions = FILTER_KEYS
            .iter()
            .filter_map(|key| query.get(*key).map(|value| (*key, value.as_str())))
            .collect();

        Self {
            channel,
            conditions,
        }
    }

    /// Evaluate the query against a record.
    pub fn matches(&self, record: &SenmlRecord) -> bool {
        record.channel == self.channel
            && self
                .conditions
                .iter()
                .all(|(column, value)| column_value(record, column) == Some(*value))
    }
}

/// Reject records carrying a non-finite number.
///
/// SQLite turns NaN into NULL and Line Protocol has no NaN or infinity, so
/// every writer refuses them and the readers stay interchangeable.
pub fn check_finite(record: &SenmlRecord) -> Result<()> {
    let value = match record.value {
        RecordValue::Float(v) => Some(v),
        _ => None,
    };
    let numbers = [
        ("value", value),
        ("sum", record.sum),
        ("time", Some(record.time)),
        ("update_time", Some(record.update_time)),
    ];

    match numbers
        .iter()
        .find(|(_, n)| n.is_some_and(|n| !n.is_finite()))
    {
        Some((field, n)) => Err(Error::storage(
            format!("Record '{}' has a non-finite {}", record.name, field),
            format!("{:?} cannot be stored", n.unwrap_or_default()),
        )),
        None => Ok(()),
    }
}

fn column_value<'r>(record: &'r SenmlRecord, column: &str) -> Option<&'r str> {
    match column {
        "subtopic" => Some(&record.subtopic),
        "publisher" => Some(&record.publisher),
        "name" => Some(&record.name),
        "protocol" => Some(&record.protocol),
        _ => None,
    }
}
