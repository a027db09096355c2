// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB Line Protocol backend.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! SenML records become points of measurement `senml`, tagged by channel,
//! subtopic, publisher, protocol and name. JSON records become points of
//! measurement `json`, one field per flattened payload key.
//!
//! The repository does NOT perform HTTP requests. It hands the lines of a
//! batch to a [`LineClient`], which may buffer them, append them to a file
//! or ship them to a server.
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::{check_finite, MessageRepository};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tlm_transformers::{Batch, JsonBatch, JsonRecord, Number, RecordValue, SenmlRecord, Value};

/// Measurement of SenML points.
pub const SENML_MEASUREMENT: &str = "senml";
/// Measurement of JSON points.
pub const JSON_MEASUREMENT: &str = "json";

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Float: written as-is (e.g., `3.14`)
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - String: quoted with double quotes; quotes, backslashes and newlines
    ///   escaped (e.g., `"hello"`)
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }

    /// Field for a flattened JSON payload value. Null and non-finite
    /// floats have no field.
    fn from_payload(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            Value::Number(Number::Integer(i)) => Some(FieldValue::Integer(*i)),
            Value::Number(Number::Float(f)) => f.is_finite().then_some(FieldValue::Float(*f)),
            Value::Text(s) => Some(FieldValue::String(s.clone())),
            Value::Bytes(b) => Some(FieldValue::String(BASE64_STANDARD.encode(b))),
            // Arrays are stored unexpanded, as their JSON text
            Value::Sequence(_) | Value::Mapping(_) => {
                serde_json::to_string(value).ok().map(FieldValue::String)
            }
        }
    }
}

impl From<&RecordValue> for FieldValue {
    fn from(value: &RecordValue) -> Self {
        match value {
            RecordValue::Float(v) => FieldValue::Float(*v),
            RecordValue::Text(s) => FieldValue::String(s.clone()),
            RecordValue::Bool(b) => FieldValue::Boolean(*b),
            RecordValue::Data(d) => FieldValue::String(BASE64_STANDARD.encode(d)),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// InfluxDB v2 Line Protocol writer.
///
/// Accumulates points in an internal buffer and produces Line Protocol strings
/// when flushed.
#[derive(Debug, Default)]
pub struct LineProtocolWriter {
    buffer: Vec<String>,
}

impl LineProtocolWriter {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a single point in Line Protocol format.
    ///
    /// Tags with an empty value are left out (InfluxDB rejects them). A
    /// point without fields, or with a newline in its measurement, a tag or
    /// a field key, is an error.
    pub fn write_point(
        &mut self,
        measurement: &str,
        tags: &[(&str, &str)],
        fields: &[(&str, FieldValue)],
        timestamp_ns: i64,
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::storage(
                format!("Point of measurement '{}' has no fields", measurement),
                "InfluxDB requires at least one field",
            ));
        }

        let names = std::iter::once(measurement)
            .chain(tags.iter().flat_map(|(k, v)| [*k, *v]))
            .chain(fields.iter().map(|(k, _)| *k));
        for name in names {
            if name.contains(['\n', '\r']) {
                return Err(Error::storage(
                    "Point has a line break in its measurement, a tag or a field key",
                    format!("{:?} cannot be written as Line Protocol", name),
                ));
            }
        }

        let mut line = escape_measurement(measurement);

        // Tags sorted by key for canonical form
        let mut sorted_tags: Vec<_> = tags.iter().filter(|(_, v)| !v.is_empty()).collect();
        sorted_tags.sort_by_key(|(k, _)| *k);
        for (key, value) in &sorted_tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');

        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&timestamp_ns.to_string());

        self.buffer.push(line);
        Ok(())
    }

    /// Flush the buffer, returning all accumulated lines.
    pub fn flush(&mut self) -> Vec<String> {
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys: commas, equals signs and spaces.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Split fractional seconds into whole seconds and nanoseconds.
///
/// Nanoseconds are always in `0..1_000_000_000`, so negative times borrow
/// from the seconds. Returns `None` for non-finite times.
pub fn split_time(time: f64) -> Option<(i64, i64)> {
    if !time.is_finite() {
        return None;
    }

    let whole = time.trunc();
    let mut secs = whole as i64;
    let mut nanos = ((time - whole) * 1e9).round() as i64;

    if nanos >= NANOS_PER_SEC {
        secs += 1;
        nanos -= NANOS_PER_SEC;
    } else if nanos < 0 {
        secs -= 1;
        nanos += NANOS_PER_SEC;
    }

    Some((secs, nanos))
}

fn timestamp_ns(time: f64) -> Result<i64> {
    split_time(time)
        .and_then(|(secs, nanos)| secs.checked_mul(NANOS_PER_SEC)?.checked_add(nanos))
        .ok_or_else(|| {
            Error::storage(
                "Record time out of range",
                format!("cannot represent {} as a nanosecond timestamp", time),
            )
        })
}

/// Destination of Line Protocol batches.
pub trait LineClient: Send + Sync {
    /// Write every line of one batch.
    fn write(&self, lines: &[String]) -> Result<()>;
}

/// Client keeping written lines in memory.
#[derive(Debug, Default)]
pub struct BufferClient {
    lines: Mutex<Vec<String>>,
    writes: AtomicUsize,
}

impl BufferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines written so far.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of `write` calls received.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl LineClient for BufferClient {
    fn write(&self, lines: &[String]) -> Result<()> {
        let mut buffer = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.extend_from_slice(lines);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Client appending lines to a file, one point per line.
#[derive(Debug)]
pub struct FileClient {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileClient {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineClient for FileClient {
    fn write(&self, lines: &[String]) -> Result<()> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut data = lines.join("\n");
        data.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                Error::storage(format!("Failed to open {}", self.path.display()), e)
            })?;
        file.write_all(data.as_bytes())
            .map_err(|e| Error::storage(format!("Failed to append to {}", self.path.display()), e))
    }
}

/// Writer-only repository producing Line Protocol points.
pub struct InfluxRepository<C: LineClient> {
    client: C,
}

impl<C: LineClient> InfluxRepository<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn senml_point(writer: &mut LineProtocolWriter, record: &SenmlRecord) -> Result<()> {
        check_finite(record)?;

        let tags = [
            ("channel", record.channel.as_str()),
            ("subtopic", record.subtopic.as_str()),
            ("publisher", record.publisher.as_str()),
            ("protocol", record.protocol.as_str()),
            ("name", record.name.as_str()),
        ];

        let mut fields = vec![(record.value.field_name(), FieldValue::from(&record.value))];
        if !record.unit.is_empty() {
            fields.push(("unit", FieldValue::String(record.unit.clone())));
        }
        if let Some(sum) = record.sum {
            fields.push(("sum", FieldValue::Float(sum)));
        }
        fields.push(("update_time", FieldValue::Float(record.update_time)));

        writer.write_point(SENML_MEASUREMENT, &tags, &fields, timestamp_ns(record.time)?)
    }

    fn json_point(writer: &mut LineProtocolWriter, format: &str, record: &JsonRecord) -> Result<()> {
        let tags = [
            ("channel", record.channel.as_str()),
            ("subtopic", record.subtopic.as_str()),
            ("publisher", record.publisher.as_str()),
            ("protocol", record.protocol.as_str()),
            ("format", format),
        ];

        let fields: Vec<(&str, FieldValue)> = record
            .payload
            .iter()
            .filter_map(|(key, value)| FieldValue::from_payload(value).map(|f| (key.as_str(), f)))
            .collect();

        writer.write_point(JSON_MEASUREMENT, &tags, &fields, record.created)
    }

    fn json_points(ctx: &Context, writer: &mut LineProtocolWriter, batch: &JsonBatch) -> Result<()> {
        for record in &batch.records {
            ctx.check()?;
            Self::json_point(writer, &batch.format, record)?;
        }
        Ok(())
    }
}

impl<C: LineClient> MessageRepository for InfluxRepository<C> {
    fn save(&self, ctx: &Context, batch: &Batch) -> Result<()> {
        ctx.check()?;

        let mut writer = LineProtocolWriter::new();
        match batch {
            Batch::Senml(records) => {
                for record in records {
                    ctx.check()?;
                    Self::senml_point(&mut writer, record)?;
                }
            }
            Batch::Json(batch) => Self::json_points(ctx, &mut writer, batch)?,
        }

        let lines = writer.flush();
        if lines.is_empty() {
            return Ok(());
        }

        ctx.check()?;
        self.client.write(&lines)?;

        tracing::trace!("Wrote {} points", lines.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "influxdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlm_transformers::{JsonTransformer, RawMessage, Transformer};

    fn senml(name: &str, value: RecordValue, time: f64) -> SenmlRecord {
        SenmlRecord {
            channel: "c1".to_string(),
            subtopic: "engine".to_string(),
            publisher: "pub-1".to_string(),
            protocol: "mqtt".to_string(),
            name: name.to_string(),
            unit: String::new(),
            time,
            update_time: 0.0,
            sum: None,
            value,
        }
    }

    #[test]
    fn test_field_value_formats() {
        assert_eq!(FieldValue::Float(3.15).to_line_protocol(), "3.15");
        assert_eq!(FieldValue::Integer(42).to_line_protocol(), "42i");
        assert_eq!(FieldValue::Boolean(false).to_line_protocol(), "false");
        assert_eq!(
            FieldValue::String("say \"hi\"".to_string()).to_line_protocol(),
            "\"say \\\"hi\\\"\""
        );
        assert_eq!(
            FieldValue::String("a\nb\\n".to_string()).to_line_protocol(),
            "\"a\\nb\\\\n\""
        );
    }

    #[test]
    fn test_line_protocol_escape_and_empty_tags() {
        let mut writer = LineProtocolWriter::new();
        writer
            .write_point(
                "my measurement",
                &[("tag key", "tag,value"), ("empty", "")],
                &[("field=key", FieldValue::String("hello".to_string()))],
                3_000_000_000,
            )
            .unwrap();

        let lines = writer.flush();
        assert_eq!(
            lines,
            vec!["my\\ measurement,tag\\ key=tag\\,value field\\=key=\"hello\" 3000000000"]
        );
        assert!(writer.is_empty());
    }

    #[test]
    fn test_point_without_fields_is_rejected() {
        let mut writer = LineProtocolWriter::new();
        let err = writer.write_point("m", &[], &[], 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
        assert_eq!(writer.len(), 0);
    }

    #[test]
    fn test_split_time() {
        assert_eq!(split_time(1.5), Some((1, 500_000_000)));
        assert_eq!(split_time(1_700_000_000.25), Some((1_700_000_000, 250_000_000)));
        assert_eq!(split_time(-1.5), Some((-2, 500_000_000)));
        assert_eq!(split_time(0.9999999999), Some((1, 0)));
        assert_eq!(split_time(f64::NAN), None);
        assert_eq!(split_time(f64::INFINITY), None);
    }

    #[test]
    fn test_senml_batch_is_one_write() {
        let repo = InfluxRepository::new(BufferClient::new());
        let mut temp = senml("temp", RecordValue::Float(21.5), 1.5);
        temp.unit = "Cel".to_string();
        temp.sum = Some(40.0);
        let batch = Batch::Senml(vec![
            temp,
            senml("state", RecordValue::Text("on".into()), 2.0),
            senml("ok", RecordValue::Bool(true), 2.0),
            senml("raw", RecordValue::Data(vec![1, 2, 3]), 2.0),
        ]);

        repo.save(&Context::background(), &batch).unwrap();

        assert_eq!(repo.client().writes(), 1);
        let lines = repo.client().lines();
        assert_eq!(
            lines,
            vec![
                "senml,channel=c1,name=temp,protocol=mqtt,publisher=pub-1,subtopic=engine \
                 value=21.5,unit=\"Cel\",sum=40,update_time=0 1500000000",
                "senml,channel=c1,name=state,protocol=mqtt,publisher=pub-1,subtopic=engine \
                 string_value=\"on\",update_time=0 2000000000",
                "senml,channel=c1,name=ok,protocol=mqtt,publisher=pub-1,subtopic=engine \
                 bool_value=true,update_time=0 2000000000",
                "senml,channel=c1,name=raw,protocol=mqtt,publisher=pub-1,subtopic=engine \
                 data_value=\"AQID\",update_time=0 2000000000",
            ]
        );
    }

    #[test]
    fn test_json_batch_points() {
        let repo = InfluxRepository::new(BufferClient::new());
        let msg = RawMessage::new(
            "c1",
            br#"{"engine": {"rpm": 900, "temp": 80.5}, "ok": true, "note": null}"#.to_vec(),
        )
        .with_subtopic("car.json")
        .with_created(1_000);

        let batch = JsonTransformer::default().transform(&msg).unwrap();
        repo.save(&Context::background(), &batch).unwrap();

        assert_eq!(
            repo.client().lines(),
            vec![
                "json,channel=c1,format=json,subtopic=car.json \
                 engine/rpm=900i,engine/temp=80.5,ok=true 1000"
            ]
        );
    }

    #[test]
    fn test_json_record_without_fields_fails_batch() {
        let repo = InfluxRepository::new(BufferClient::new());
        let msg = RawMessage::new("c1", br#"[{"a": 1}, {}]"#.to_vec());
        let batch = JsonTransformer::default().transform(&msg).unwrap();

        assert!(repo.save(&Context::background(), &batch).is_err());
        assert_eq!(repo.client().writes(), 0);
    }

    #[test]
    fn test_line_break_in_tag_or_key_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.lp");
        let repo = InfluxRepository::new(FileClient::new(&path));
        let ctx = Context::background();

        let msg = RawMessage::new("c1", br#"{"note": "a\nb"}"#.to_vec()).with_subtopic("x\ny");
        let batch = JsonTransformer::default().transform(&msg).unwrap();
        let err = repo.save(&ctx, &batch).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);

        let mut writer = LineProtocolWriter::new();
        let fields = [("a\rb", FieldValue::Integer(1))];
        assert!(writer.write_point("m", &[], &fields, 0).is_err());
        assert!(writer.is_empty());
        assert!(!path.exists());

        // Newlines inside string values are escaped, one point per line
        let msg = RawMessage::new("c1", br#"{"note": "a\nb"}"#.to_vec()).with_subtopic("x.y");
        let batch = JsonTransformer::default().transform(&msg).unwrap();
        repo.save(&ctx, &batch).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "json,channel=c1,format=y,subtopic=x.y note=\"a\\nb\" 0\n");
    }

    #[test]
    fn test_non_finite_record_fails_batch() {
        let repo = InfluxRepository::new(BufferClient::new());
        let batch = Batch::Senml(vec![
            senml("a", RecordValue::Float(1.0), 1.0),
            senml("b", RecordValue::Float(f64::NAN), 1.0),
        ]);

        assert!(repo.save(&Context::background(), &batch).is_err());
        assert_eq!(repo.client().writes(), 0);
        assert!(repo.client().lines().is_empty());
    }

    #[test]
    fn test_cancelled_save_writes_nothing() {
        let repo = InfluxRepository::new(BufferClient::new());
        let ctx = Context::background();
        ctx.cancel();

        let batch = Batch::Senml(vec![senml("temp", RecordValue::Float(1.0), 1.0)]);
        assert!(matches!(repo.save(&ctx, &batch), Err(Error::Cancelled)));
        assert!(repo.client().lines().is_empty());
    }

    #[test]
    fn test_file_client_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.lp");
        let repo = InfluxRepository::new(FileClient::new(&path));
        let ctx = Context::background();

        repo.save(&ctx, &Batch::Senml(vec![senml("a", RecordValue::Float(1.0), 1.0)]))
            .unwrap();
        repo.save(&ctx, &Batch::Senml(vec![senml("b", RecordValue::Float(2.0), 2.0)]))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("name=a"));
        assert!(lines[1].ends_with(" 2000000000"));
    }
}
