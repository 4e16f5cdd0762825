// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the lifecycle state machine.

use thiserror::Error;

use crate::types::MessageKind;

/// Failure reported by a [`MessageSender`](crate::MessageSender).
///
/// The core treats every variant the same way; the distinction is only kept
/// for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Provider refused the message
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Provider could not reach the subscriber
    #[error("subscriber unreachable: {0}")]
    Unreachable(String),

    /// Attempt did not finish within its budget
    #[error("delivery attempt timed out after {0} ms")]
    Timeout(u64),
}

/// Errors produced by a lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A welcome or recurring message was not delivered. Fatal to the lifecycle.
    #[error("{kind} message #{sequence} was not delivered: {reason}")]
    DeliveryFailure {
        /// Sequence number of the failed attempt
        sequence: u64,
        /// Which message failed
        kind: MessageKind,
        /// Sender error text
        reason: String,
    },

    /// The farewell was not delivered. Logged only; termination still happens.
    #[error("cancellation message was not delivered: {reason}")]
    SignalRaceFailure {
        /// Sender error text
        reason: String,
    },

    /// The checkpoint store failed
    #[error("checkpoint store error: {0}")]
    Backend(String),

    /// A checkpoint could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        LifecycleError::Serialization(err.to_string())
    }
}

/// Type alias for lifecycle results.
pub type Result<T> = std::result::Result<T, LifecycleError>;
