// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw bus message

use serde::{Deserialize, Serialize};

/// Message as delivered by the bus adapter.
///
/// Immutable and scoped to a single handler invocation. The JSON form
/// carries the payload as base64 so binary (CBOR) payloads survive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Channel the message was published to
    #[serde(default)]
    pub channel: String,

    /// Optional subtopic within the channel
    #[serde(default)]
    pub subtopic: String,

    /// Publisher identity
    #[serde(default)]
    pub publisher: String,

    /// Protocol the message arrived through (mqtt, http, coap, ...)
    #[serde(default)]
    pub protocol: String,

    /// Creation timestamp (Unix nanoseconds)
    #[serde(default)]
    pub created: i64,

    /// Encoded payload
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_subtopic(mut self, subtopic: impl Into<String>) -> Self {
        self.subtopic = subtopic.into();
        self
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = publisher.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_created(mut self, created_ns: i64) -> Self {
        self.created = created_ns;
        self
    }
}

pub(crate) mod base64_bytes {
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
