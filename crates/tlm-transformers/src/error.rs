// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transformation errors

use thiserror::Error;

/// Boxed underlying cause, preserved through the error chain.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The payload decoded but does not fit a canonical record shape.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Key equal to a reserved field name or containing the path separator.
    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    /// Root array holding something other than an object.
    #[error("Array element {0} is not an object")]
    NonObjectElement(usize),

    /// Root value is neither an object nor an array of objects.
    #[error("Unknown payload format: found {0} at root")]
    UnknownFormat(&'static str),

    /// Two nesting paths flattened to the same key.
    #[error("Flattened key {0:?} produced more than once")]
    KeyCollision(String),
}

/// Errors returned by a transformer.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Payload bytes are not valid for the configured encoding.
    #[error("Failed to decode payload: {0}")]
    Decode(#[source] BoxError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl TransformError {
    pub(crate) fn decode(err: impl Into<BoxError>) -> Self {
        Self::Decode(err.into())
    }

    /// True if the payload bytes could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
