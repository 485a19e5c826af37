// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the Bouncer core
//!
//! Storage backends map their driver errors into these variants so the
//! interception and decision engines can report failures uniformly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::FieldErrors;

/// Unified error type for all bouncer operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum BouncerError {
    #[error("Validation failed: {}", summarize(errors))]
    ValidationFailed { errors: FieldErrors },

    #[error("No proposer could be resolved for a change to {source_name}")]
    MissingProposer { source_name: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Collection not registered: {source_name}")]
    CollectionNotFound { source_name: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BouncerError {
    pub fn validation(errors: FieldErrors) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.into()]);
        Self::ValidationFailed { errors }
    }

    pub fn missing_proposer(source: impl Into<String>) -> Self {
        Self::MissingProposer {
            source_name: source.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict { message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound { message: msg.into() }
    }

    pub fn collection_not_found(source: impl Into<String>) -> Self {
        Self::CollectionNotFound {
            source_name: source.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization { message: msg.into() }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage { message: msg.into() }
    }

    pub fn transaction_error(msg: impl Into<String>) -> Self {
        Self::TransactionError { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Field-level errors, when this is a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::ValidationFailed { errors } => Some(errors),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for BouncerError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

fn summarize(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for bouncer operations
pub type BouncerResult<T> = Result<T, BouncerError>;
