// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checkpointed steps used by the lifecycle.
//!
//! Every side effect the state machine performs goes through
//! [`LifecycleContext`], which journals its result in the [`DurableBackend`]
//! before returning. Replaying a lifecycle against the same journal returns
//! the recorded results instead of touching the sender or the clock again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::backend::DurableBackend;
use crate::error::{DeliveryError, Result};
use crate::sender::MessageSender;
use crate::timer::Timer;
use crate::types::{OutboundMessage, RetryConfig};

const CANCEL_OBSERVED_ID: &str = "cancel-observed";
pub(crate) const FAREWELL_ID: &str = "farewell";

pub(crate) fn message_checkpoint_id(sequence: u64) -> String {
    format!("message-{sequence}")
}

fn timer_armed_id(sequence: u64) -> String {
    format!("timer-{sequence}:armed")
}

fn timer_fired_id(sequence: u64) -> String {
    format!("timer-{sequence}:fired")
}

/// Injected side-effect capabilities of a lifecycle.
#[derive(Clone)]
pub struct Capabilities {
    /// Delivers outbound messages
    pub sender: Arc<dyn MessageSender>,
    /// Wall clock and sleeps
    pub timer: Arc<dyn Timer>,
    /// Checkpoint store scoped to this instance
    pub backend: Arc<dyn DurableBackend>,
    /// Tracks work that outlives the lifecycle task, such as a detached farewell
    pub tasks: TaskTracker,
}

impl Capabilities {
    /// Bundle the three capabilities.
    pub fn new(
        sender: Arc<dyn MessageSender>,
        timer: Arc<dyn Timer>,
        backend: Arc<dyn DurableBackend>,
    ) -> Self {
        Self {
            sender,
            timer,
            backend,
            tasks: TaskTracker::new(),
        }
    }

    /// Spawn detached work on `tasks` instead of a private tracker.
    pub fn with_tasks(mut self, tasks: TaskTracker) -> Self {
        self.tasks = tasks;
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("sender", &"<dyn MessageSender>")
            .field("timer", &"<dyn Timer>")
            .field("backend", &self.backend.instance_id())
            .field("tasks", &self.tasks)
            .finish()
    }
}

/// Journaled result of one message attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub(crate) enum StepOutcome {
    Delivered,
    Failed { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct TimerArmed {
    wake_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimerFired {
    fired_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CancelPoint {
    sequence: u64,
}

/// How a durable sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Fired,
    Cancelled,
}

#[derive(Clone)]
pub(crate) struct LifecycleContext {
    caps: Capabilities,
    retry: RetryConfig,
}

impl LifecycleContext {
    pub(crate) fn new(caps: Capabilities, retry: RetryConfig) -> Self {
        Self { caps, retry }
    }

    pub(crate) fn instance_id(&self) -> &str {
        self.caps.backend.instance_id()
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.caps.tasks
    }

    /// Attempt a message unless its outcome is already journaled.
    ///
    /// Delivery failures are returned as [`StepOutcome::Failed`]; only store
    /// errors surface as `Err`.
    pub(crate) async fn send_step(
        &self,
        checkpoint_id: &str,
        message: &OutboundMessage,
        attempt_timeout: Duration,
    ) -> Result<StepOutcome> {
        if let Some(outcome) = self.load::<StepOutcome>(checkpoint_id).await? {
            debug!(
                checkpoint_id = %checkpoint_id,
                sequence = message.sequence,
                "Message outcome found in journal, skipping send"
            );
            return Ok(outcome);
        }

        let outcome = self
            .attempt_with_retry(checkpoint_id, message, attempt_timeout)
            .await;
        self.save(checkpoint_id, &outcome).await?;
        Ok(outcome)
    }

    async fn attempt_with_retry(
        &self,
        checkpoint_id: &str,
        message: &OutboundMessage,
        attempt_timeout: Duration,
    ) -> StepOutcome {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(attempt_timeout, self.caps.sender.send(message)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(
                        u64::try_from(attempt_timeout.as_millis()).unwrap_or(u64::MAX),
                    )),
                };

            let err = match result {
                Ok(()) => return StepOutcome::Delivered,
                Err(err) => err,
            };

            if attempt > self.retry.max_retries {
                return StepOutcome::Failed {
                    reason: err.to_string(),
                };
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                checkpoint_id = %checkpoint_id,
                attempt,
                max_retries = self.retry.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Message attempt failed, retrying"
            );
            if let Err(e) = self
                .caps
                .backend
                .record_retry_attempt(checkpoint_id, attempt, Some(&err.to_string()))
                .await
            {
                warn!(checkpoint_id = %checkpoint_id, error = %e, "Failed to record retry attempt");
            }
            self.caps.timer.sleep(delay).await;
        }
    }

    /// Sleep until the timer armed after message `sequence` fires, or until
    /// `cancel` is triggered.
    ///
    /// The wake time is journaled when the timer is armed, so a resumed
    /// lifecycle only waits for the remainder of the period.
    pub(crate) async fn durable_sleep(
        &self,
        sequence: u64,
        period: Duration,
        cancel: &CancellationToken,
    ) -> Result<Wake> {
        let fired_id = timer_fired_id(sequence);
        if self.caps.backend.load_checkpoint(&fired_id).await?.is_some() {
            debug!(sequence, "Timer already fired, skipping sleep");
            return Ok(Wake::Fired);
        }

        let armed_id = timer_armed_id(sequence);
        let now = self.caps.timer.now();
        let wake_at = match self.load::<TimerArmed>(&armed_id).await? {
            Some(armed) => armed.wake_at,
            None => {
                let wake_at = chrono::Duration::from_std(period)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.save(&armed_id, &TimerArmed { wake_at }).await?;
                wake_at
            }
        };

        let remaining = (wake_at - now).to_std().unwrap_or(Duration::ZERO);
        debug!(
            sequence,
            remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            "Waiting for next message"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Wake::Cancelled),
            _ = self.caps.timer.sleep(remaining) => {}
        }

        self.save(
            &fired_id,
            &TimerFired {
                fired_at: self.caps.timer.now(),
            },
        )
        .await?;
        Ok(Wake::Fired)
    }

    /// Decide whether cancellation is observed before the timer armed after
    /// message `sequence`.
    ///
    /// A journaled decision always wins. Without one, a journaled timer fire
    /// means an earlier run went past this point, so cancellation is not
    /// observed here even if the token is now triggered.
    pub(crate) async fn cancellation_observed(
        &self,
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if let Some(point) = self.load::<CancelPoint>(CANCEL_OBSERVED_ID).await? {
            return Ok(sequence >= point.sequence);
        }
        if self
            .caps
            .backend
            .load_checkpoint(&timer_fired_id(sequence))
            .await?
            .is_some()
        {
            return Ok(false);
        }
        if cancel.is_cancelled() {
            self.record_cancel_point(sequence).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Journal that cancellation was observed after message `sequence`.
    pub(crate) async fn record_cancel_point(&self, sequence: u64) -> Result<()> {
        self.save(CANCEL_OBSERVED_ID, &CancelPoint { sequence }).await
    }

    async fn load<T: DeserializeOwned>(&self, checkpoint_id: &str) -> Result<Option<T>> {
        match self.caps.backend.load_checkpoint(checkpoint_id).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize>(&self, checkpoint_id: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.caps.backend.save_checkpoint(checkpoint_id, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::testing::{PausedClock, RecordingSender, StalledSender, TestBackend};
    use crate::types::MessageKind;

    fn context(
        sender: Arc<dyn MessageSender>,
        backend: Arc<TestBackend>,
        retry: RetryConfig,
    ) -> LifecycleContext {
        LifecycleContext::new(
            Capabilities::new(sender, Arc::new(PausedClock::new()), backend),
            retry,
        )
    }

    fn idle_context(backend: Arc<TestBackend>) -> LifecycleContext {
        context(
            Arc::new(RecordingSender::default()),
            backend,
            RetryConfig::default(),
        )
    }

    fn message(sequence: u64) -> OutboundMessage {
        OutboundMessage {
            origin: "+15550000000".to_string(),
            destination: "+15551234567".to_string(),
            body: "hello".to_string(),
            sequence,
            kind: MessageKind::Recurring,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_step_journals_outcome() {
        let backend = Arc::new(TestBackend::default());
        let sender = Arc::new(RecordingSender::default());
        let ctx = context(sender.clone(), backend.clone(), RetryConfig::default());

        let outcome = ctx
            .send_step("message-1", &message(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Delivered);

        // Second call replays from the journal
        let outcome = ctx
            .send_step("message-1", &message(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Delivered);
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_step_retries_then_delivers() {
        let backend = Arc::new(TestBackend::default());
        let sender = Arc::new(RecordingSender::flaky(2));
        let retry = RetryConfig::new(3, 100, Default::default());
        let ctx = context(sender.clone(), backend.clone(), retry);

        let start = tokio::time::Instant::now();
        let outcome = ctx
            .send_step("message-1", &message(1), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Delivered);
        assert_eq!(sender.calls(), 3);
        // 100ms before the first retry, 200ms before the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
        assert_eq!(
            *backend.retries.lock().unwrap(),
            vec![("message-1".to_string(), 1), ("message-1".to_string(), 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_step_fails_after_retries_exhausted() {
        let backend = Arc::new(TestBackend::default());
        let sender = Arc::new(RecordingSender::flaky(10));
        let retry = RetryConfig::new(1, 100, Default::default());
        let ctx = context(sender.clone(), backend.clone(), retry);

        let outcome = ctx
            .send_step("message-4", &message(4), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Failed {
                reason: "subscriber unreachable: attempt 2".to_string()
            }
        );
        assert_eq!(sender.calls(), 2);
        assert!(backend.checkpoints.lock().unwrap().contains_key("message-4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_step_times_out() {
        let backend = Arc::new(TestBackend::default());
        let ctx = context(Arc::new(StalledSender), backend, RetryConfig::default());

        let outcome = ctx
            .send_step("message-1", &message(1), Duration::from_millis(250))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Failed {
                reason: "delivery attempt timed out after 250 ms".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_sleep_fires_after_period() {
        let backend = Arc::new(TestBackend::default());
        let ctx = idle_context(backend.clone());
        let cancel = CancellationToken::new();

        let start = tokio::time::Instant::now();
        let wake = ctx
            .durable_sleep(1, Duration::from_secs(30), &cancel)
            .await
            .unwrap();

        assert_eq!(wake, Wake::Fired);
        assert!(start.elapsed() >= Duration::from_secs(30));
        let checkpoints = backend.checkpoints.lock().unwrap();
        assert!(checkpoints.contains_key("timer-1:armed"));
        assert!(checkpoints.contains_key("timer-1:fired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_sleep_replays_fired_timer() {
        let backend = Arc::new(TestBackend::default());
        let ctx = idle_context(backend);
        let cancel = CancellationToken::new();
        ctx.durable_sleep(1, Duration::from_secs(30), &cancel)
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        let wake = ctx
            .durable_sleep(1, Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert_eq!(wake, Wake::Fired);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_sleep_resumes_armed_timer() {
        let backend = Arc::new(TestBackend::default());
        let ctx = idle_context(backend.clone());
        let cancel = CancellationToken::new();

        // Arm the timer, then abandon the sleep 10s in
        let sleeping = tokio::time::timeout(
            Duration::from_secs(10),
            ctx.durable_sleep(1, Duration::from_secs(30), &cancel),
        )
        .await;
        assert!(sleeping.is_err());

        let start = tokio::time::Instant::now();
        let wake = ctx
            .durable_sleep(1, Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert_eq!(wake, Wake::Fired);
        assert!(start.elapsed() <= Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_sleep_interrupted_by_cancel() {
        let backend = Arc::new(TestBackend::default());
        let ctx = idle_context(backend.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let wake = ctx
            .durable_sleep(1, Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert_eq!(wake, Wake::Cancelled);
        assert!(
            !backend
                .checkpoints
                .lock()
                .unwrap()
                .contains_key("timer-1:fired")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_sleep_with_unbounded_period() {
        let backend = Arc::new(TestBackend::default());
        let ctx = idle_context(backend.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let wake = ctx
            .durable_sleep(1, Duration::MAX, &cancel)
            .await
            .unwrap();
        assert_eq!(wake, Wake::Cancelled);

        let checkpoints = backend.checkpoints.lock().unwrap();
        assert!(checkpoints.contains_key("timer-1:armed"));
        assert!(!checkpoints.contains_key("timer-1:fired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_observed_is_replay_consistent() {
        let backend = Arc::new(TestBackend::default());
        let ctx = idle_context(backend);
        let cancel = CancellationToken::new();

        // Not cancelled yet
        assert!(!ctx.cancellation_observed(1, &cancel).await.unwrap());
        ctx.durable_sleep(1, Duration::from_secs(1), &cancel)
            .await
            .unwrap();

        cancel.cancel();

        // Timer 1 already fired: a replay must not observe cancellation here
        assert!(!ctx.cancellation_observed(1, &cancel).await.unwrap());
        // First live decision point observes it and journals the point
        assert!(ctx.cancellation_observed(2, &cancel).await.unwrap());

        // A replay without the token still observes it at the journaled point
        let fresh = CancellationToken::new();
        assert!(!ctx.cancellation_observed(1, &fresh).await.unwrap());
        assert!(ctx.cancellation_observed(2, &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_serialization_error() {
        let backend = Arc::new(TestBackend::default());
        backend
            .save_checkpoint("message-1", b"not json")
            .await
            .unwrap();
        let ctx = idle_context(backend);

        let err = ctx
            .send_step("message-1", &message(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Serialization(_)));
    }
}
