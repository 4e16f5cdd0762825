// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! smsloop core - the subscription lifecycle state machine.
//!
//! This crate decides, for a single subscriber, which message to send, when to
//! sleep, how to react to a cancellation signal and what state to expose to
//! queries. Every side effect goes through an injected capability:
//!
//! - [`MessageSender`]: delivers one outbound message
//! - [`Timer`]: wall clock and sleep
//! - [`DurableBackend`]: per-instance checkpoint store used for replay
//!
//! # Lifecycle
//!
//! ```text
//!  ┌────────────────┐  welcome delivered   ┌─────────────────┐
//!  │ WelcomePending │─────────────────────►│ RecurringActive │◄──┐
//!  └────────────────┘                      └────────┬────────┘   │ timer fired,
//!          │ welcome failed                         │            │ recurring sent
//!          ▼                                        ├────────────┘
//!     (lifecycle fails)                             │ cancel observed
//!                                                   ▼
//!                                          ┌────────────────┐
//!                                          │   Cancelling   │
//!                                          └────────┬───────┘
//!                                                   │ farewell attempted
//!                                                   ▼   (success or failure)
//!                                          ┌────────────────┐
//!                                          │   Terminated   │
//!                                          └────────────────┘
//! ```
//!
//! # Replay
//!
//! Each completed step is checkpointed through the [`DurableBackend`]:
//!
//! | Checkpoint id | Content |
//! |---------------|---------|
//! | `message-{n}` | outcome of message attempt `n` |
//! | `timer-{n}:armed` | wake time of the timer armed after message `n` |
//! | `timer-{n}:fired` | marker written when that timer fired |
//! | `cancel-observed` | sequence at which cancellation was observed |
//! | `farewell` | outcome of the farewell attempt |
//!
//! Running a lifecycle again against the same checkpoints reproduces the same
//! [`SubscriptionRecord`] without re-attempting any journaled send.
//!
//! # Example
//!
//! ```ignore
//! use smsloop_core::{Capabilities, LifecycleConfig, RetryConfig, SubscriptionLifecycle};
//! use tokio_util::sync::CancellationToken;
//!
//! let lifecycle = SubscriptionLifecycle::new(
//!     "+15551234567",
//!     "+15550000000",
//!     LifecycleConfig::default(),
//!     RetryConfig::default(),
//!     Capabilities::new(sender, timer, backend),
//! );
//! let view = lifecycle.query();
//! let cancel = CancellationToken::new();
//! let outcome = tokio::spawn(lifecycle.run(cancel.clone()));
//!
//! // later
//! println!("{:?}", view.snapshot());
//! cancel.cancel();
//! let outcome = outcome.await??;
//! ```

#![deny(missing_docs)]

mod backend;
mod config;
mod context;
mod error;
mod lifecycle;
mod query;
mod sender;
#[cfg(test)]
mod testing;
mod timer;
mod types;

pub use backend::DurableBackend;
pub use config::{
    ConfigError, FarewellMode, LifecycleConfig, MessageTemplates, SUBSCRIBER_PLACEHOLDER,
};
pub use context::Capabilities;
pub use error::{DeliveryError, LifecycleError, Result};
pub use lifecycle::SubscriptionLifecycle;
pub use query::RecordView;
pub use sender::MessageSender;
pub use timer::Timer;
pub use types::{
    FarewellReport, LifecycleOutcome, LifecycleState, MessageKind, OutboundMessage, RetryConfig,
    RetryStrategy, SubscriptionRecord, SubscriptionSnapshot,
};

// Re-exported so callers can signal cancellation without a direct dependency.
pub use tokio_util::sync::CancellationToken;
