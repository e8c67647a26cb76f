// Copyright 2025 RecallDB (https://github.com/recalldb)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types shared across the engine.
//!
//! One transport-independent sum type covers the whole surface: the
//! storage layer, the index, the quantizers, and the learning stores all
//! return [`RecallError`]. Backend `Io`/`Corruption` values surface to
//! callers unchanged.

use thiserror::Error;

/// Result type for all RecallDB operations.
pub type Result<T> = std::result::Result<T, RecallError>;

/// Errors that can occur anywhere in the engine.
#[derive(Debug, Error)]
pub enum RecallError {
    /// Shape mismatch, malformed config, or an out-of-range parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Id absent on get/delete.
    #[error("not found: {0}")]
    NotFound(String),

    /// Id already present (strict insert only).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Inserted or queried vector length differs from the db dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Quantizer training was given fewer samples than it requires.
    #[error("insufficient training data: need {needed} samples, got {got}")]
    InsufficientTrainingData { needed: usize, got: usize },

    /// Encode/decode called before training.
    #[error("quantizer is not trained")]
    NotTrained,

    /// Cooperative search deadline expired below the minimum-work threshold.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Container header version is not readable by this build.
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u32),

    /// Invariant violation detected while reading persisted state.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Underlying device or OS failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A capacity limit was hit (session count, strict buffer capacity).
    #[error("exhausted: {0}")]
    Exhausted(String),
}

impl RecallError {
    /// Shorthand for an [`RecallError::InvalidArgument`] with a formatted message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        RecallError::InvalidArgument(msg.into())
    }

    /// Shorthand for a [`RecallError::Corruption`] with a formatted message.
    pub fn corruption(msg: impl Into<String>) -> Self {
        RecallError::Corruption(msg.into())
    }

    /// True for errors a reader can hit on malformed persisted state.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            RecallError::Corruption(_) | RecallError::UnsupportedVersion(_)
        )
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(e: serde_json::Error) -> Self {
        RecallError::Corruption(format!("metadata decode: {e}"))
    }
}
