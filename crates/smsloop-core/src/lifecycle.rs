// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The subscription lifecycle state machine.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, instrument};

use crate::config::{FarewellMode, LifecycleConfig};
use crate::context::{
    Capabilities, FAREWELL_ID, LifecycleContext, StepOutcome, Wake, message_checkpoint_id,
};
use crate::error::{LifecycleError, Result};
use crate::query::{RecordPublisher, RecordView};
use crate::types::{
    FarewellReport, LifecycleOutcome, LifecycleState, MessageKind, OutboundMessage, RetryConfig,
    SubscriptionRecord, SubscriptionSnapshot,
};

/// Why the recurring loop stopped without a failure.
enum LoopExit {
    CancellationObserved,
    MessageCapReached,
}

/// One subscriber's lifecycle.
///
/// Created per subscription and consumed by [`run`](Self::run). The only
/// inputs after creation are the cancellation token and the clock; the only
/// outputs are messages, the published snapshots and the final outcome.
pub struct SubscriptionLifecycle {
    record: SubscriptionRecord,
    state: LifecycleState,
    config: LifecycleConfig,
    ctx: LifecycleContext,
    publisher: RecordPublisher,
}

impl SubscriptionLifecycle {
    /// Create a lifecycle in `WelcomePending` with a fresh record.
    pub fn new(
        subscriber_address: impl Into<String>,
        origin_address: impl Into<String>,
        config: LifecycleConfig,
        retry: RetryConfig,
        capabilities: Capabilities,
    ) -> Self {
        let record = SubscriptionRecord::new(subscriber_address, origin_address);
        let state = LifecycleState::WelcomePending;
        let publisher = RecordPublisher::new(SubscriptionSnapshot {
            record: record.clone(),
            state,
        });
        Self {
            record,
            state,
            config,
            ctx: LifecycleContext::new(capabilities, retry),
            publisher,
        }
    }

    /// Query handle. Any number of views can be taken, before or during `run`.
    pub fn query(&self) -> RecordView {
        self.publisher.subscribe()
    }

    /// Instance id of the checkpoint store this lifecycle journals into.
    pub fn instance_id(&self) -> &str {
        self.ctx.instance_id()
    }

    /// Drive the lifecycle to completion.
    ///
    /// Returns `Ok` when the lifecycle ended in `Terminated` (cancellation
    /// processed, farewell attempted) or `Completed` (message cap reached).
    /// A welcome or recurring delivery failure is returned as
    /// [`LifecycleError::DeliveryFailure`] and no farewell is sent.
    #[instrument(
        skip_all,
        fields(
            instance_id = %self.ctx.instance_id(),
            subscriber = %self.record.subscriber_address
        )
    )]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<LifecycleOutcome> {
        info!("Subscription created");

        info!("Sending welcome message...");
        self.send(MessageKind::Welcome).await?;
        self.transition(LifecycleState::RecurringActive);

        match self.recurring_loop(&cancel).await? {
            LoopExit::MessageCapReached => {
                self.transition(LifecycleState::Completed);
                info!(
                    message_sequence = self.record.message_sequence,
                    "Message cap reached, subscription completed"
                );
                Ok(LifecycleOutcome {
                    record: self.record,
                    state: self.state,
                    farewell: None,
                })
            }
            LoopExit::CancellationObserved => {
                let farewell = self.cancel_and_farewell().await;
                Ok(LifecycleOutcome {
                    record: self.record,
                    state: self.state,
                    farewell: Some(farewell),
                })
            }
        }
    }

    async fn recurring_loop(&mut self, cancel: &CancellationToken) -> Result<LoopExit> {
        loop {
            let sequence = self.record.message_sequence;

            if self.ctx.cancellation_observed(sequence, cancel).await? {
                return Ok(LoopExit::CancellationObserved);
            }

            if let Some(max) = self.config.max_messages
                && sequence >= max
            {
                return Ok(LoopExit::MessageCapReached);
            }

            match self
                .ctx
                .durable_sleep(sequence, self.config.message_period, cancel)
                .await?
            {
                Wake::Fired => {}
                Wake::Cancelled => {
                    self.ctx.record_cancel_point(sequence).await?;
                    return Ok(LoopExit::CancellationObserved);
                }
            }

            info!("Sending subscription message...");
            self.send(MessageKind::Recurring).await?;
        }
    }

    /// Attempt the next welcome or recurring message.
    ///
    /// The sequence number and body are assigned whether or not the attempt
    /// succeeds; the snapshot is published once the attempt has resolved.
    async fn send(&mut self, kind: MessageKind) -> Result<()> {
        let message = self.next_message(kind);
        let outcome = self
            .ctx
            .send_step(
                &message_checkpoint_id(message.sequence),
                &message,
                self.config.attempt_timeout,
            )
            .await?;

        self.record.message_sequence = message.sequence;
        self.record.current_message_body = message.body;
        self.publish();

        match outcome {
            StepOutcome::Delivered => {
                debug!(sequence = message.sequence, %kind, "Message delivered");
                Ok(())
            }
            StepOutcome::Failed { reason } => {
                error!(sequence = message.sequence, %kind, error = %reason, "Message delivery failed");
                Err(LifecycleError::DeliveryFailure {
                    sequence: message.sequence,
                    kind,
                    reason,
                })
            }
        }
    }

    /// Process cancellation: unsubscribe, attempt the farewell, terminate.
    ///
    /// Termination happens whatever the farewell outcome.
    async fn cancel_and_farewell(&mut self) -> FarewellReport {
        info!(
            message_sequence = self.record.message_sequence,
            "Cancellation received"
        );
        self.record.is_subscribed = false;
        self.transition(LifecycleState::Cancelling);

        let message = self.next_message(MessageKind::Farewell);
        let report = match self.config.farewell_mode {
            FarewellMode::Inline => {
                deliver_farewell(&self.ctx, &message, self.config.attempt_timeout).await
            }
            FarewellMode::Detached => {
                let ctx = self.ctx.clone();
                let detached = message.clone();
                let budget = self.config.farewell_timeout;
                let handle = self.ctx.tasks().spawn(
                    async move { deliver_farewell(&ctx, &detached, budget).await }
                        .instrument(Span::current()),
                );
                match handle.await {
                    Ok(report) => report,
                    Err(e) => FarewellReport::Failed {
                        reason: format!("farewell task failed: {e}"),
                    },
                }
            }
        };

        self.record.message_sequence = message.sequence;
        self.record.current_message_body = message.body;
        self.transition(LifecycleState::Terminated);
        info!(
            message_sequence = self.record.message_sequence,
            "Subscription terminated"
        );
        report
    }

    fn next_message(&self, kind: MessageKind) -> OutboundMessage {
        OutboundMessage {
            origin: self.record.origin_address.clone(),
            destination: self.record.subscriber_address.clone(),
            body: self
                .config
                .templates
                .render(kind, &self.record.subscriber_address),
            sequence: self.record.message_sequence + 1,
            kind,
        }
    }

    fn transition(&mut self, state: LifecycleState) {
        debug!(from = ?self.state, to = ?state, "Lifecycle transition");
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.publisher.publish(SubscriptionSnapshot {
            record: self.record.clone(),
            state: self.state,
        });
    }
}

impl std::fmt::Debug for SubscriptionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLifecycle")
            .field("record", &self.record)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

/// Attempt the farewell. Never fails: every error becomes a report.
async fn deliver_farewell(
    ctx: &LifecycleContext,
    message: &OutboundMessage,
    budget: Duration,
) -> FarewellReport {
    let reason = match ctx.send_step(FAREWELL_ID, message, budget).await {
        Ok(StepOutcome::Delivered) => {
            info!(sequence = message.sequence, "Sent cancellation message");
            return FarewellReport::Delivered;
        }
        Ok(StepOutcome::Failed { reason }) => reason,
        Err(e) => e.to_string(),
    };

    let err = LifecycleError::SignalRaceFailure {
        reason: reason.clone(),
    };
    error!(error = %err, "Failed to send cancellation message");
    FarewellReport::Failed { reason }
}
