// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry Writer/Reader Service
//!
//! Persists transformed bus messages and serves them back, filtered and
//! paginated, through one contract across storage engines.
//!
//! # Features
//!
//! - **SQLite Backend** -- relational storage, reader and writer
//! - **Memory Backend** -- document collections in process, reader and writer
//! - **InfluxDB Backend** -- Line Protocol points, writer only
//! - **Consumer** -- content-type dispatch from bus subjects to a repository
//!
//! # Architecture
//!
//! ```text
//! Subscriber (bus)
//! +-- Consumer            (transform, shape check, save)
//!     +-- Transformer     (JSON flatten or SenML key filter)
//!     +-- MessageRepository
//!         +-- SqliteStore | MemoryStore | InfluxRepository
//!
//! MessageReader::read_all --> MessagesPage
//! ```
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use tlm_persistence::{Config, Consumer, Context, MessageReader, MockPubSub, SqliteStore};
//! use tlm_transformers::RawMessage;
//!
//! let bus = MockPubSub::new();
//! let store = Arc::new(SqliteStore::new_in_memory()?);
//! let consumer = Consumer::start(&bus, Arc::clone(&store), &Config::default())?;
//!
//! let msg = RawMessage::new("chan-1", br#"{"temp": 21.5}"#.to_vec());
//! bus.publish("channels.chan-1", &msg);
//! assert_eq!(consumer.stats().records_stored, 1);
//!
//! let page = store.read_all(&Context::background(), "chan-1", 0, 10, &HashMap::new())?;
//! assert_eq!(page.messages[0].name, "temp");
//! # Ok::<(), tlm_persistence::Error>(())
//! ```

pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod influx;
pub mod memory;
pub mod pubsub;
pub mod sqlite;
pub mod store;

pub use config::{Config, ConfigBuilder, ConfigError, FilterConfig};
pub use consumer::{select_transformer, Consumer, StatsSnapshot};
pub use context::Context;
pub use error::{Error, ErrorKind, Result};
pub use influx::{BufferClient, FileClient, InfluxRepository, LineClient};
pub use memory::MemoryStore;
pub use pubsub::{
    subject_for, subject_matches, BusSender, ChannelBus, MessageHandler, MockPubSub, Subscriber,
    SUBJECT_ALL_CHANNELS,
};
pub use sqlite::SqliteStore;
pub use store::{MessageReader, MessageRepository, MessagesPage, FILTER_KEYS};
