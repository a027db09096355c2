// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry payload transformers
//!
//! Normalizes raw bus messages into canonical, storage-ready records.
//!
//! # Transformers
//!
//! - [`JsonTransformer`] -- flattens object (or array-of-objects) payloads into
//!   [`JsonRecord`]s keyed by `/`-joined paths
//! - [`KeyFilterTransformer`] -- emits one SenML-like [`SenmlRecord`] per
//!   permitted payload leaf, from JSON or CBOR payloads
//!
//! ```text
//! RawMessage --> Transformer --> Batch::Json(JsonBatch) | Batch::Senml(Vec<SenmlRecord>)
//! ```
//!
//! # Example
//!
//! ```
//! use tlm_transformers::{Batch, JsonTransformer, RawMessage, Transformer};
//!
//! let msg = RawMessage::new("chan-1", br#"{"engine": {"rpm": 900}}"#.to_vec());
//! let batch = JsonTransformer::default().transform(&msg).unwrap();
//!
//! match batch {
//!     Batch::Json(batch) => assert!(batch.records[0].payload.contains_key("engine/rpm")),
//!     Batch::Senml(_) => unreachable!(),
//! }
//! ```

pub mod error;
pub mod filter;
pub mod json;
pub mod message;
pub mod record;
pub mod senml;
pub mod value;

pub use error::{BoxError, SchemaError, TransformError};
pub use filter::{KeyFilter, WILDCARD};
pub use json::JsonTransformer;
pub use message::RawMessage;
pub use record::{Batch, JsonBatch, JsonRecord, RecordKind, RecordValue, SenmlRecord};
pub use senml::{Encoding, KeyFilterTransformer};
pub use value::{Map, Number, Value};

/// Content types selecting a transformer.
pub mod content_type {
    pub const JSON: &str = "application/json";
    pub const SENML_JSON: &str = "application/senml+json";
    pub const SENML_CBOR: &str = "application/senml+cbor";
}

/// Converts one raw message into a batch of canonical records.
///
/// Implementations hold only immutable configuration and can be shared
/// between concurrent handlers. A call either yields the whole batch or an
/// error, never a partial batch.
pub trait Transformer: Send + Sync {
    fn transform(&self, msg: &RawMessage) -> Result<Batch, TransformError>;

    /// Shape of every batch this transformer produces.
    fn kind(&self) -> RecordKind;
}
