// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscription data model.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The entity under lifecycle management.
///
/// Serialized with camelCase keys, the shape returned by the details endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    /// Destination phone number; also the lifecycle instance key.
    pub subscriber_address: String,
    /// Sender identity used for every outbound message.
    pub origin_address: String,
    /// True from creation until cancellation is processed.
    pub is_subscribed: bool,
    /// Incremented exactly once per message attempt.
    pub message_sequence: u64,
    /// Body of the last attempted message.
    pub current_message_body: String,
}

impl SubscriptionRecord {
    /// Create a fresh record: subscribed, no messages attempted yet.
    pub fn new(subscriber_address: impl Into<String>, origin_address: impl Into<String>) -> Self {
        Self {
            subscriber_address: subscriber_address.into(),
            origin_address: origin_address.into(),
            is_subscribed: true,
            message_sequence: 0,
            current_message_body: String::new(),
        }
    }
}

/// State of the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Initial state, welcome message not yet delivered
    WelcomePending,
    /// Welcome delivered, recurring messages are being sent
    RecurringActive,
    /// Cancellation observed, farewell in progress
    Cancelling,
    /// Farewell attempted; the record is inert
    Terminated,
    /// Configured message cap reached without cancellation
    Completed,
}

impl LifecycleState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated | LifecycleState::Completed)
    }
}

/// Kind of outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// First message after subscribing
    Welcome,
    /// Message sent on every timer fire
    Recurring,
    /// Last message after cancellation
    Farewell,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Welcome => write!(f, "welcome"),
            MessageKind::Recurring => write!(f, "recurring"),
            MessageKind::Farewell => write!(f, "farewell"),
        }
    }
}

/// A single send request handed to the [`MessageSender`](crate::MessageSender).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Sender identity
    pub origin: String,
    /// Subscriber address
    pub destination: String,
    /// Message text
    pub body: String,
    /// Per-record sequence number; stable across retries of the same message.
    pub sequence: u64,
    /// What the message is for
    pub kind: MessageKind,
}

impl OutboundMessage {
    /// Idempotency key for this logical message.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.destination, self.sequence)
    }
}

/// Point-in-time view returned by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    /// Record as of the last completed transition
    pub record: SubscriptionRecord,
    /// Lifecycle state as of the last completed transition
    pub state: LifecycleState,
}

/// Result of the farewell attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FarewellReport {
    /// The farewell was delivered
    Delivered,
    /// The farewell failed; termination still happened
    Failed {
        /// Why delivery failed
        reason: String,
    },
}

/// Final result of a lifecycle run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    /// Final record
    pub record: SubscriptionRecord,
    /// `Terminated` after cancellation, `Completed` when the message cap was reached
    pub state: LifecycleState,
    /// Present when cancellation was observed
    pub farewell: Option<FarewellReport>,
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry strategy for message attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Exponential backoff: delay * 2^(attempt-1)
    #[default]
    ExponentialBackoff,
}

/// Activity retry policy applied by the substrate to each message attempt.
///
/// The state machine never sees individual retries: a message either ends up
/// delivered or failed after `max_retries + 1` attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just one attempt).
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub delay_ms: u64,
    /// Retry strategy for calculating delays.
    pub strategy: RetryStrategy,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32, delay_ms: u64, strategy: RetryStrategy) -> Self {
        Self {
            max_retries,
            delay_ms,
            strategy,
        }
    }

    /// Delay to wait before the given retry attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = match self.strategy {
            RetryStrategy::ExponentialBackoff => 2u64.saturating_pow(attempt.saturating_sub(1)),
        };
        Duration::from_millis(self.delay_ms.saturating_mul(multiplier))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 1000,
            strategy: RetryStrategy::default(),
        }
    }
}
