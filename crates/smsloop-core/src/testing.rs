// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-crate test doubles.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backend::DurableBackend;
use crate::error::{DeliveryError, Result};
use crate::sender::MessageSender;
use crate::timer::Timer;
use crate::types::{MessageKind, OutboundMessage};

/// HashMap-backed checkpoint store.
#[derive(Default)]
pub(crate) struct TestBackend {
    pub(crate) checkpoints: Mutex<HashMap<String, Vec<u8>>>,
    pub(crate) retries: Mutex<Vec<(String, u32)>>,
}

#[async_trait]
impl DurableBackend for TestBackend {
    fn instance_id(&self) -> &str {
        "test-instance"
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.checkpoints.lock().unwrap().get(checkpoint_id).cloned())
    }

    async fn save_checkpoint(&self, checkpoint_id: &str, state: &[u8]) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .entry(checkpoint_id.to_string())
            .or_insert_with(|| state.to_vec());
        Ok(())
    }

    async fn record_retry_attempt(
        &self,
        checkpoint_id: &str,
        attempt_number: u32,
        _error_message: Option<&str>,
    ) -> Result<()> {
        self.retries
            .lock()
            .unwrap()
            .push((checkpoint_id.to_string(), attempt_number));
        Ok(())
    }
}

/// Records every attempt. Optionally fails the first `failures` attempts, or
/// every attempt for one sequence number.
#[derive(Default)]
pub(crate) struct RecordingSender {
    pub(crate) sent: Mutex<Vec<OutboundMessage>>,
    failures: u32,
    fail_sequence: Option<u64>,
}

impl RecordingSender {
    pub(crate) fn flaky(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub(crate) fn failing_on(sequence: u64) -> Self {
        Self {
            fail_sequence: Some(sequence),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub(crate) fn kinds(&self) -> Vec<MessageKind> {
        self.sent.lock().unwrap().iter().map(|m| m.kind).collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), DeliveryError> {
        let call = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            sent.len() as u32
        };
        if call <= self.failures {
            return Err(DeliveryError::Unreachable(format!("attempt {call}")));
        }
        if self.fail_sequence == Some(message.sequence) {
            return Err(DeliveryError::Rejected(format!(
                "sequence {}",
                message.sequence
            )));
        }
        Ok(())
    }
}

/// Never completes.
pub(crate) struct StalledSender;

#[async_trait]
impl MessageSender for StalledSender {
    async fn send(&self, _message: &OutboundMessage) -> std::result::Result<(), DeliveryError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Wall clock driven by tokio's (pausable) clock.
pub(crate) struct PausedClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Utc::now(),
            start: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl Timer for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap();
        self.origin + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
