// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite persistence backend
//!
//! Serves both sides of the repository contract from one database file.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::{check_finite, MessageReader, MessageRepository, MessagesPage, ReadQuery};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, Transaction};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tlm_transformers::{Batch, JsonBatch, JsonRecord, RecordKind, RecordValue, SenmlRecord, Value};

const SENML_COLUMNS: &str = "channel, subtopic, publisher, protocol, name, unit, \
     value, string_value, bool_value, data_value, sum, time, update_time";

/// SQLite message store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE senml_messages (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     channel TEXT NOT NULL, subtopic TEXT NOT NULL,
///     publisher TEXT NOT NULL, protocol TEXT NOT NULL,
///     name TEXT NOT NULL, unit TEXT NOT NULL,
///     value REAL, string_value TEXT, bool_value INTEGER, data_value BLOB,
///     sum REAL, time REAL NOT NULL, update_time REAL NOT NULL
/// );
/// CREATE TABLE json_messages (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     format TEXT NOT NULL,
///     channel TEXT NOT NULL, subtopic TEXT NOT NULL,
///     publisher TEXT NOT NULL, protocol TEXT NOT NULL,
///     created INTEGER NOT NULL,
///     payload TEXT NOT NULL  -- flattened payload as a JSON object
/// );
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a file-based database
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            Error::storage(format!("Failed to open SQLite database at {}", path), e)
        })?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage("Failed to create in-memory SQLite database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS senml_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    channel TEXT NOT NULL,
                    subtopic TEXT NOT NULL,
                    publisher TEXT NOT NULL,
                    protocol TEXT NOT NULL,
                    name TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    value REAL,
                    string_value TEXT,
                    bool_value INTEGER,
                    data_value BLOB,
                    sum REAL,
                    time REAL NOT NULL,
                    update_time REAL NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_senml_channel_time
                    ON senml_messages(channel, time);
                CREATE TABLE IF NOT EXISTS json_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    format TEXT NOT NULL,
                    channel TEXT NOT NULL,
                    subtopic TEXT NOT NULL,
                    publisher TEXT NOT NULL,
                    protocol TEXT NOT NULL,
                    created INTEGER NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_json_channel_created
                    ON json_messages(channel, created);",
            )
            .map_err(|e| Error::storage("Failed to initialize SQLite schema", e))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of stored records of one shape
    pub fn count(&self, kind: RecordKind) -> Result<u64> {
        let sql = match kind {
            RecordKind::Senml => "SELECT COUNT(*) FROM senml_messages",
            RecordKind::Json => "SELECT COUNT(*) FROM json_messages",
        };
        let count: i64 = self
            .lock()
            .query_row(sql, [], |row| row.get(0))
            .map_err(|e| Error::storage("Failed to count messages", e))?;
        Ok(count as u64)
    }

    /// Stored JSON records of a channel with their format, oldest first
    pub fn json_records(&self, channel: &str) -> Result<Vec<(String, JsonRecord)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT format, channel, subtopic, publisher, protocol, created, payload
                 FROM json_messages
                 WHERE channel = ?1
                 ORDER BY id ASC",
            )
            .map_err(|e| Error::storage("Failed to read JSON messages", e))?;

        let rows = stmt
            .query_map([channel], |row| {
                let payload: String = row.get(6)?;
                Ok((
                    row.get::<_, String>(0)?,
                    JsonRecord {
                        channel: row.get(1)?,
                        subtopic: row.get(2)?,
                        publisher: row.get(3)?,
                        protocol: row.get(4)?,
                        created: row.get(5)?,
                        payload: Default::default(),
                    },
                    payload,
                ))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("Failed to read JSON messages", e))?;

        rows.into_iter()
            .map(|(format, mut record, payload)| {
                let json: serde_json::Value = serde_json::from_str(&payload)
                    .map_err(|e| Error::storage("Stored JSON payload is corrupt", e))?;
                if let Value::Mapping(map) = Value::from(json) {
                    record.payload = map;
                }
                Ok((format, record))
            })
            .collect()
    }

    /// Delete every stored record
    pub fn clear(&self) -> Result<()> {
        self.lock()
            .execute_batch("DELETE FROM senml_messages; DELETE FROM json_messages;")
            .map_err(|e| Error::storage("Failed to clear messages", e))
    }

    fn insert_senml(ctx: &Context, tx: &Transaction<'_>, records: &[SenmlRecord]) -> Result<()> {
        let mut stmt = tx
            .prepare_cached(&format!(
                "INSERT INTO senml_messages ({SENML_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ))
            .map_err(|e| Error::storage("Failed to prepare SenML insert", e))?;

        for record in records {
            ctx.check()?;
            check_finite(record)?;

            let (value, string_value, bool_value, data_value) = match &record.value {
                RecordValue::Float(v) => (Some(*v), None, None, None),
                RecordValue::Text(s) => (None, Some(s.as_str()), None, None),
                RecordValue::Bool(b) => (None, None, Some(*b), None),
                RecordValue::Data(d) => (None, None, None, Some(d.as_slice())),
            };

            stmt.execute(params![
                record.channel,
                record.subtopic,
                record.publisher,
                record.protocol,
                record.name,
                record.unit,
                value,
                string_value,
                bool_value,
                data_value,
                record.sum,
                record.time,
                record.update_time,
            ])
            .map_err(|e| Error::storage("Failed to insert SenML message", e))?;
        }

        Ok(())
    }

    fn insert_json(ctx: &Context, tx: &Transaction<'_>, batch: &JsonBatch) -> Result<()> {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO json_messages
                    (format, channel, subtopic, publisher, protocol, created, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| Error::storage("Failed to prepare JSON insert", e))?;

        for record in &batch.records {
            ctx.check()?;

            let payload = serde_json::to_string(&record.payload)
                .map_err(|e| Error::storage("Failed to encode JSON payload", e))?;

            stmt.execute(params![
                batch.format,
                record.channel,
                record.subtopic,
                record.publisher,
                record.protocol,
                record.created,
                payload,
            ])
            .map_err(|e| Error::storage("Failed to insert JSON message", e))?;
        }

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SenmlRecord> {
        let value = if let Some(v) = row.get::<_, Option<f64>>(6)? {
            RecordValue::Float(v)
        } else if let Some(s) = row.get::<_, Option<String>>(7)? {
            RecordValue::Text(s)
        } else if let Some(b) = row.get::<_, Option<bool>>(8)? {
            RecordValue::Bool(b)
        } else if let Some(d) = row.get::<_, Option<Vec<u8>>>(9)? {
            RecordValue::Data(d)
        } else {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                6,
                Type::Null,
                "message has no value column set".into(),
            ));
        };

        Ok(SenmlRecord {
            channel: row.get(0)?,
            subtopic: row.get(1)?,
            publisher: row.get(2)?,
            protocol: row.get(3)?,
            name: row.get(4)?,
            unit: row.get(5)?,
            time: row.get(11)?,
            update_time: row.get(12)?,
            sum: row.get(10)?,
            value,
        })
    }
}

impl MessageRepository for SqliteStore {
    fn save(&self, ctx: &Context, batch: &Batch) -> Result<()> {
        ctx.check()?;

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::storage("Failed to begin transaction", e))?;

        // Dropping `tx` on any early return rolls the batch back.
        match batch {
            Batch::Senml(records) => Self::insert_senml(ctx, &tx, records)?,
            Batch::Json(batch) => Self::insert_json(ctx, &tx, batch)?,
        }

        ctx.check()?;
        tx.commit()
            .map_err(|e| Error::storage("Failed to commit batch", e))?;

        tracing::trace!("Stored {} {} records", batch.len(), batch.kind());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

impl MessageReader for SqliteStore {
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

        // Column names come from the fixed whitelist; values are always bound.
        let mut condition = String::from("channel = ?1");
        let mut bound: Vec<&dyn ToSql> = vec![&q.channel];
        for (column, value) in &q.conditions {
            bound.push(value);
            condition.push_str(&format!(" AND {} = ?{}", column, bound.len()));
        }

        let limit_i64 = limit.min(i64::MAX as u64) as i64;
        let offset_i64 = offset.min(i64::MAX as u64) as i64;
        let select = format!(
            "SELECT {SENML_COLUMNS} FROM senml_messages
             WHERE {condition}
             ORDER BY time DESC, id ASC
             LIMIT ?{} OFFSET ?{}",
            bound.len() + 1,
            bound.len() + 2
        );
        let count = format!("SELECT COUNT(*) FROM senml_messages WHERE {condition}");

        let conn = self.lock();

        let mut page_params = bound.clone();
        page_params.push(&limit_i64);
        page_params.push(&offset_i64);

        let mut stmt = conn
            .prepare(&select)
            .map_err(|e| Error::storage("Failed to read messages from SQLite", e))?;
        let messages = stmt
            .query_map(page_params.as_slice(), Self::row_to_record)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::storage("Failed to read messages from SQLite", e))?;

        ctx.check()?;

        let total: i64 = conn
            .query_row(&count, bound.as_slice(), |row| row.get(0))
            .map_err(|e| Error::storage("Failed to count messages in SQLite", e))?;

        Ok(MessagesPage {
            total: total as u64,
            offset,
            limit,
            messages,
        })
    }
}
