// Copyright 2025 Lodestone Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for Lodestone
//!
//! This module defines all error types used by the expression, facet and
//! partition subsystems.

use thiserror::Error;

/// Result type alias for Lodestone operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Lodestone operations
///
/// This enum covers all error cases including both sentinel errors
/// and structured errors with context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Schema / field errors
    // =========================================================================
    /// Field not found in the index schema
    #[error("field '{0}' not found")]
    FieldNotFound(String),

    /// A segment reports a different kind for a field than the schema
    #[error("field '{field}' kind differs across segments")]
    FieldKindMismatch { field: String },

    // =========================================================================
    // Expression / aggregation errors
    // =========================================================================
    /// Aggregation name not recognized; never silently defaults to zero
    #[error("unknown aggregation function '{0}'")]
    UnknownAggregation(String),

    /// Function name not recognized in a stat expression
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A statistic needs a capability the active similarity does not expose
    #[error("{stat}({field}) requires a tf/idf similarity")]
    SimilarityUnsupported { stat: String, field: String },

    /// Stat expression parse error
    #[error("parse error: {0}")]
    Parse(String),

    /// A node's index-wide weight was never computed before evaluation
    #[error("no precomputed weight for {0}; weights were not prepared")]
    WeightMissing(String),

    // =========================================================================
    // Facet request errors
    // =========================================================================
    /// Malformed facet request, identifying the offending facet path
    #[error("facet '{path}': {message}")]
    FacetRequest { path: String, message: String },

    // =========================================================================
    // Partition errors
    // =========================================================================
    /// Invalid partition parameter (workers, worker id, key count)
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A blocking-mode partition task failed; no partial result is surfaced
    #[error("hash partition task failed: {message}")]
    PartitionTask { message: String },

    /// Worker pool has been shut down
    #[error("worker pool is closed")]
    PoolClosed,

    // =========================================================================
    // Other errors
    // =========================================================================
    /// Operation not supported
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Internal error for unexpected conditions
    #[error("{message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new FieldKindMismatch error
    pub fn field_kind_mismatch(field: impl Into<String>) -> Self {
        Error::FieldKindMismatch {
            field: field.into(),
        }
    }

    /// Create a new SimilarityUnsupported error
    pub fn similarity_unsupported(stat: impl Into<String>, field: impl Into<String>) -> Self {
        Error::SimilarityUnsupported {
            stat: stat.into(),
            field: field.into(),
        }
    }

    /// Create a new Parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    /// Create a new FacetRequest error for the given facet path
    pub fn facet_request(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FacetRequest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new InvalidParameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Error::InvalidParameter(message.into())
    }

    /// Wrap a failed partition task error
    pub fn partition_task(cause: &Error) -> Self {
        Error::PartitionTask {
            message: cause.to_string(),
        }
    }

    /// Create a new NotSupported error
    pub fn not_supported(message: impl Into<String>) -> Self {
        Error::NotSupported(message.into())
    }

    /// Create a new Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a "not found" type error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::FieldNotFound(_))
    }

    /// Check if this is a configuration error (bad request or schema use),
    /// as opposed to an internal or runtime failure
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::FieldNotFound(_)
                | Error::UnknownAggregation(_)
                | Error::UnknownFunction(_)
                | Error::SimilarityUnsupported { .. }
                | Error::Parse(_)
                | Error::FacetRequest { .. }
                | Error::InvalidParameter(_)
                | Error::NotSupported(_)
        )
    }
}
