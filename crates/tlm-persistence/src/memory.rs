// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process document store
//!
//! Keeps `senml` and `json` collections as plain documents. A batch is
//! appended with a single bulk insert under one lock.

use crate::context::Context;
use crate::error::Result;
use crate::store::{check_finite, MessageReader, MessageRepository, MessagesPage, ReadQuery};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tlm_transformers::{Batch, JsonRecord, RecordKind, SenmlRecord};

/// Stored JSON document with the batch format it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    pub format: String,
    pub record: JsonRecord,
}

#[derive(Debug, Default)]
struct Collections {
    senml: Vec<SenmlRecord>,
    json: Vec<JsonDocument>,
}

/// Document-oriented store backed by in-memory collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        match self.collections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn count(&self, kind: RecordKind) -> u64 {
        let collections = self.lock();
        match kind {
            RecordKind::Senml => collections.senml.len() as u64,
            RecordKind::Json => collections.json.len() as u64,
        }
    }

    /// Stored JSON documents of a channel, in insertion order.
    pub fn json_documents(&self, channel: &str) -> Vec<JsonDocument> {
        self.lock()
            .json
            .iter()
            .filter(|doc| doc.record.channel == channel)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut collections = self.lock();
        collections.senml.clear();
        collections.json.clear();
    }
}

impl MessageRepository for MemoryStore {
    fn save(&self, ctx: &Context, batch: &Batch) -> Result<()> {
        ctx.check()?;

        match batch {
            Batch::Senml(records) => {
                for record in records {
                    check_finite(record)?;
                }
                let documents = records.clone();
                ctx.check()?;
                self.lock().senml.extend(documents);
            }
            Batch::Json(batch) => {
                let documents: Vec<_> = batch
                    .records
                    .iter()
                    .map(|record| JsonDocument {
                        format: batch.format.clone(),
                        record: record.clone(),
                    })
                    .collect();
                ctx.check()?;
                self.lock().json.extend(documents);
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl MessageReader for MemoryStore {
    fn read_all(
        &self,
        ctx: &Context,
        channel: &str,
        offset: u64,
        limit: u64,
        query: &HashMap<String, String>,
    ) -> Result<MessagesPage> {
        ctx.check()?;

        let q = ReadQuery::new(channel, query);
        let collections = self.lock();

        // Index is the insertion order and breaks ties on equal time.
        let mut matching: Vec<(usize, &SenmlRecord)> = collections
            .senml
            .iter()
            .enumerate()
            .filter(|(_, record)| q.matches(record))
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| b.time.total_cmp(&a.time).then(ia.cmp(ib)));

        let offset_usize = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit_usize = usize::try_from(limit).unwrap_or(usize::MAX);

        let messages = matching
            .iter()
            .skip(offset_usize)
            .take(limit_usize)
            .map(|(_, record)| (*record).clone())
            .collect();

        Ok(MessagesPage {
            total: matching.len() as u64,
            offset,
            limit,
            messages,
        })
    }
}
