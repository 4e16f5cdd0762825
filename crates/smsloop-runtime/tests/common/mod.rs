// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for smsloop-runtime integration tests.
//!
//! Provides a scripted message sender and runtime builders. Tests run on a
//! paused tokio clock, so one "period" is one second of virtual time.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use smsloop_core::{DeliveryError, LifecycleConfig, MessageKind, MessageSender, OutboundMessage};
use smsloop_runtime::{MemoryStore, RuntimeConfig, SubscriptionRuntime, TokioTimer};

pub const SUBSCRIBER: &str = "+15551234567";
pub const INSTANCE_ID: &str = "15551234567";
pub const ORIGIN: &str = "+15550000000";

pub const WELCOME: &str = "Welcome! You have signed up!";
pub const RECURRING: &str = "This is the recurring message for subscribers";
pub const FAREWELL: &str = "Your subscription has been canceled. Sorry to see you go!";

pub const PERIOD: Duration = Duration::from_secs(1);

/// One call to [`ScriptedSender::send`].
#[derive(Debug, Clone)]
pub struct Attempt {
    pub message: OutboundMessage,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

/// Message sender whose behaviour is fixed up front.
///
/// Every call is recorded when it starts, before any configured delay, so a
/// test can tell an attempt that was started apart from one that finished.
#[derive(Default)]
pub struct ScriptedSender {
    attempts: Mutex<Vec<Attempt>>,
    fail_kinds: HashSet<MessageKind>,
    fail_sequences: HashSet<u64>,
    transient_failures: Mutex<HashMap<u64, u32>>,
    kind_delays: HashMap<MessageKind, Duration>,
    sequence_delays: HashMap<u64, Duration>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt of this kind fails.
    pub fn fail_kind(mut self, kind: MessageKind) -> Self {
        self.fail_kinds.insert(kind);
        self
    }

    /// Every attempt of this sequence number fails.
    pub fn fail_sequence(mut self, sequence: u64) -> Self {
        self.fail_sequences.insert(sequence);
        self
    }

    /// The first `attempts` attempts of this sequence number fail.
    pub fn fail_first_attempts(self, sequence: u64, attempts: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(sequence, attempts);
        self
    }

    /// Attempts of this kind take `delay` before resolving.
    pub fn delay_kind(mut self, kind: MessageKind, delay: Duration) -> Self {
        self.kind_delays.insert(kind, delay);
        self
    }

    /// Attempts of this sequence number take `delay` before resolving.
    pub fn delay_sequence(mut self, sequence: u64, delay: Duration) -> Self {
        self.sequence_delays.insert(sequence, delay);
        self
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.attempts()
            .into_iter()
            .map(|a| a.message.kind)
            .collect()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.attempts()
            .into_iter()
            .map(|a| a.message.sequence)
            .collect()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    fn delay_for(&self, message: &OutboundMessage) -> Option<Duration> {
        self.sequence_delays
            .get(&message.sequence)
            .or_else(|| self.kind_delays.get(&message.kind))
            .copied()
    }

    fn outcome_for(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        if self.fail_kinds.contains(&message.kind) || self.fail_sequences.contains(&message.sequence)
        {
            return Err(DeliveryError::Rejected(format!(
                "scripted failure for {} #{}",
                message.kind, message.sequence
            )));
        }
        let mut transient = self.transient_failures.lock().unwrap();
        if let Some(remaining) = transient.get_mut(&message.sequence)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(DeliveryError::Unreachable("carrier busy".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let index = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Attempt {
                message: message.clone(),
                started_at: Instant::now(),
                finished_at: None,
            });
            attempts.len() - 1
        };

        if let Some(delay) = self.delay_for(message) {
            tokio::time::sleep(delay).await;
        }

        self.attempts.lock().unwrap()[index].finished_at = Some(Instant::now());
        self.outcome_for(message)
    }
}

/// One-second period, generous attempt budgets.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        lifecycle: LifecycleConfig::default()
            .with_message_period(PERIOD)
            .with_attempt_timeout(Duration::from_secs(5))
            .with_farewell_timeout(Duration::from_secs(5)),
        ..RuntimeConfig::new(ORIGIN)
    }
}

/// Runtime with a fresh store.
pub fn runtime(sender: Arc<ScriptedSender>, config: RuntimeConfig) -> SubscriptionRuntime {
    SubscriptionRuntime::builder()
        .sender(sender)
        .config(config)
        .build()
        .unwrap()
}

/// Runtime over an existing store and timer, as a restarted process would be.
pub fn runtime_over(
    sender: Arc<ScriptedSender>,
    config: RuntimeConfig,
    store: Arc<MemoryStore>,
    timer: Arc<TokioTimer>,
) -> SubscriptionRuntime {
    SubscriptionRuntime::builder()
        .sender(sender)
        .config(config)
        .store(store)
        .timer(timer)
        .build()
        .unwrap()
}

/// Advance the paused clock, letting every task due in between run.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
