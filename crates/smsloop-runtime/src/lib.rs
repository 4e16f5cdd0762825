// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! smsloop runtime - runs subscription lifecycles in-process.
//!
//! This crate is the substrate around [`smsloop_core`]: it keeps one
//! lifecycle task per subscriber, journals their checkpoints, persists cancel
//! signals and exposes subscribe / unsubscribe / details entry points.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────┐
//!  │     SubscriptionService      │  validation, +1XXXXXXXXXX -> 1XXXXXXXXXX
//!  └──────────────┬───────────────┘
//!                 ▼
//!  ┌──────────────────────────────┐        ┌─────────────────────────┐
//!  │     SubscriptionRuntime      │───────►│  SubscriptionLifecycle  │ one task
//!  │ start/cancel/query/recover   │ token, │  (smsloop-core)         │ per
//!  └──────────────┬───────────────┘ view   └────────────┬────────────┘ subscriber
//!                 │                                     │ checkpoints
//!                 ▼                                     ▼
//!  ┌─────────────────────────────────────────────────────────────────┐
//!  │  MemoryStore: instances, checkpoints, cancel signals, retries  │
//!  └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `start` | Register the instance and spawn its lifecycle |
//! | `cancel` | Persist a cancel signal, then trigger the instance's token |
//! | `query` | Latest published snapshot; `InstanceNotFound` once finished |
//! | `recover` | Restart every instance still marked running, replaying its journal |
//! | `shutdown` | Cancel every active instance and wait for the farewells |
//! | `abort_all` | Drop every task without a farewell |

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod front_door;
pub mod runtime;
pub mod sender;
pub mod store;
pub mod timer;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use front_door::{SubscriptionService, instance_id_for, validate_subscriber};
pub use runtime::{InstanceHandle, SubscriptionRuntime, SubscriptionRuntimeBuilder};
pub use sender::LoggingSender;
pub use store::{InstanceRecord, InstanceStatus, MemoryStore};
pub use timer::TokioTimer;
