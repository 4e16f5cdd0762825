// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for smsloop-runtime.
//!
//! Every variant carries a stable code so front ends can map errors to
//! responses without matching on display text.

use smsloop_core::LifecycleError;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors returned by the runtime, the store and the front door.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// No active instance with this id.
    #[error("Instance '{instance_id}' not found")]
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// A running instance with this id already exists.
    #[error("Instance '{instance_id}' already exists")]
    InstanceAlreadyExists {
        /// The instance ID that already exists.
        instance_id: String,
    },

    /// Input validation failed.
    #[error("Validation error on '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A store operation failed.
    #[error("Store error during {operation}: {details}")]
    Store {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// The lifecycle ended with an error.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// The instance task was aborted before it produced an outcome.
    #[error("Instance '{instance_id}' was aborted")]
    InstanceAborted {
        /// The aborted instance ID.
        instance_id: String,
    },
}

impl RuntimeError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::InstanceAlreadyExists { .. } => "INSTANCE_ALREADY_EXISTS",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::Store { .. } => "STORE_ERROR",
            Self::Lifecycle(_) => "LIFECYCLE_ERROR",
            Self::InstanceAborted { .. } => "INSTANCE_ABORTED",
        }
    }

    pub(crate) fn not_found(instance_id: impl Into<String>) -> Self {
        Self::InstanceNotFound {
            instance_id: instance_id.into(),
        }
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
