// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service errors

use crate::config::ConfigError;
use thiserror::Error;
use tlm_transformers::{BoxError, TransformError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error category, for callers that branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed payload bytes
    Decode,
    /// Payload does not fit a canonical record shape
    Schema,
    /// Backend I/O or query failure
    Storage,
    /// Filter configuration could not be loaded
    Config,
    /// Transformer output does not match what the repository takes
    Conversion,
    /// Subscription or delivery failure on the bus
    Bus,
    /// Cancelled or past its deadline
    Cancelled,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message conversion error: {0}")]
    Conversion(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::Conversion(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transform(TransformError::Decode(_)) => ErrorKind::Decode,
            Error::Transform(TransformError::Schema(_)) => ErrorKind::Schema,
            Error::Storage { .. } => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
            Error::Conversion(_) => ErrorKind::Conversion,
            Error::Bus(_) => ErrorKind::Bus,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Wiring defects that retrying or skipping the message cannot fix.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Conversion
    }
}
