// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Clock and sleep capability.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of wall-clock time and sleeps.
///
/// Wake times are persisted as wall-clock instants so a restarted lifecycle
/// only sleeps for what is left of the period.
#[async_trait]
pub trait Timer: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for the given duration.
    async fn sleep(&self, duration: Duration);
}
