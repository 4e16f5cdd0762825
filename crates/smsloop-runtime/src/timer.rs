// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tokio-backed timer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smsloop_core::Timer;
use tokio::time::Instant;

/// Wall clock anchored at construction and advanced by tokio's monotonic clock.
///
/// Anchoring keeps `now()` consistent with `sleep()` when tokio time is
/// paused in tests, and immune to wall-clock jumps while the process runs.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    origin: DateTime<Utc>,
    start: Instant,
}

impl TokioTimer {
    /// Anchor a new timer at the current wall-clock time.
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            start: Instant::now(),
        }
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Timer for TokioTimer {
    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.start.elapsed())
            .ok()
            .and_then(|elapsed| self.origin.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_now_follows_tokio_clock() {
        let timer = TokioTimer::new();
        let before = timer.now();

        timer.sleep(Duration::from_secs(90)).await;

        let elapsed = timer.now() - before;
        assert_eq!(elapsed.num_seconds(), 90);
    }
}
