// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory instance, checkpoint and signal store.
//!
//! One [`MemoryStore`] can outlive the [`SubscriptionRuntime`] that writes to
//! it: dropping the runtime's tasks and starting a new runtime over the same
//! store is how a process crash and restart is reproduced.
//!
//! [`SubscriptionRuntime`]: crate::SubscriptionRuntime

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smsloop_core::{DurableBackend, LifecycleError};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument};

use crate::error::{Result, RuntimeError};

/// Signal type persisted for an unsubscribe request.
pub const CANCEL_SIGNAL: &str = "cancel";

/// Status of a lifecycle instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Lifecycle task started and has not finished
    Running,
    /// Message cap reached
    Completed,
    /// Welcome or recurring message failed, or the checkpoint store failed
    Failed,
    /// Cancellation processed and farewell attempted
    Cancelled,
}

impl InstanceStatus {
    /// Lowercase name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Subscriber address without the leading `+`.
    pub instance_id: String,
    /// Subscriber address as submitted.
    pub subscriber: String,
    /// Sender identity.
    pub origin: String,
    /// Current status.
    pub status: InstanceStatus,
    /// When the instance was registered.
    pub created_at: DateTime<Utc>,
    /// When the instance reached a final status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message from failure.
    pub error: Option<String>,
}

/// Checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Instance this checkpoint belongs to.
    pub instance_id: String,
    /// Unique checkpoint identifier within the instance.
    pub checkpoint_id: String,
    /// Serialized state data.
    pub state: Vec<u8>,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

/// Signal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRecord {
    /// Instance this signal is for.
    pub instance_id: String,
    /// Type of signal; only [`CANCEL_SIGNAL`] is produced.
    pub signal_type: String,
    /// When the signal was created.
    pub created_at: DateTime<Utc>,
    /// When the instance finished processing the signal.
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Retried message attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttemptRecord {
    /// Instance the attempt belongs to.
    pub instance_id: String,
    /// Checkpoint of the message being retried.
    pub checkpoint_id: String,
    /// 1-indexed number of the failed attempt.
    pub attempt_number: u32,
    /// Error returned by that attempt.
    pub error_message: Option<String>,
    /// When the retry was recorded.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    instances: HashMap<String, InstanceRecord>,
    checkpoints: HashMap<String, Vec<CheckpointRecord>>,
    signals: HashMap<String, SignalRecord>,
    retries: Vec<RetryAttemptRecord>,
}

/// In-memory store shared by every instance of a runtime.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    detached: std::sync::Mutex<HashMap<String, TaskTracker>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running instance.
    ///
    /// Fails with [`RuntimeError::InstanceAlreadyExists`] while an instance
    /// with the same id is running. Registering over a finished instance
    /// starts from an empty journal.
    #[instrument(skip(self, subscriber, origin))]
    pub async fn register_instance(
        &self,
        instance_id: &str,
        subscriber: &str,
        origin: &str,
    ) -> Result<InstanceRecord> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.instances.get(instance_id)
            && existing.status == InstanceStatus::Running
        {
            return Err(RuntimeError::InstanceAlreadyExists {
                instance_id: instance_id.to_string(),
            });
        }

        let record = InstanceRecord {
            instance_id: instance_id.to_string(),
            subscriber: subscriber.to_string(),
            origin: origin.to_string(),
            status: InstanceStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        state.checkpoints.remove(instance_id);
        state.signals.remove(instance_id);
        state.retries.retain(|r| r.instance_id != instance_id);
        state
            .instances
            .insert(instance_id.to_string(), record.clone());

        debug!("Instance registered");
        Ok(record)
    }

    /// Get an instance by id.
    pub async fn get_instance(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.state.lock().await.instances.get(instance_id).cloned()
    }

    /// All instances with the given status, ordered by id.
    pub async fn instances_with_status(&self, status: InstanceStatus) -> Vec<InstanceRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .instances
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        records
    }

    /// Move an instance to a final status.
    #[instrument(skip(self, error))]
    pub async fn complete_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| RuntimeError::not_found(instance_id))?;
        record.status = status;
        record.finished_at = Some(Utc::now());
        record.error = error;
        debug!("Instance finished");
        Ok(())
    }

    /// Load a checkpoint.
    pub async fn load_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
    ) -> Option<CheckpointRecord> {
        self.state
            .lock()
            .await
            .checkpoints
            .get(instance_id)
            .and_then(|cps| cps.iter().find(|cp| cp.checkpoint_id == checkpoint_id))
            .cloned()
    }

    /// Save a checkpoint unless one with the same id exists.
    ///
    /// Returns `true` when the checkpoint was written.
    pub async fn save_checkpoint(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
        data: &[u8],
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.instances.contains_key(instance_id) {
            return Err(RuntimeError::Store {
                operation: "save_checkpoint".to_string(),
                details: format!("instance '{}' is not registered", instance_id),
            });
        }

        let checkpoints = state.checkpoints.entry(instance_id.to_string()).or_default();
        if checkpoints.iter().any(|cp| cp.checkpoint_id == checkpoint_id) {
            debug!(instance_id, checkpoint_id, "Checkpoint exists, keeping first write");
            return Ok(false);
        }
        checkpoints.push(CheckpointRecord {
            instance_id: instance_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            state: data.to_vec(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    /// Checkpoints of an instance in write order.
    pub async fn list_checkpoints(&self, instance_id: &str) -> Vec<CheckpointRecord> {
        self.state
            .lock()
            .await
            .checkpoints
            .get(instance_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Persist a signal. A pending signal of the same instance is kept.
    pub async fn save_signal(&self, instance_id: &str, signal_type: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.instances.contains_key(instance_id) {
            return Err(RuntimeError::not_found(instance_id));
        }
        state
            .signals
            .entry(instance_id.to_string())
            .or_insert_with(|| SignalRecord {
                instance_id: instance_id.to_string(),
                signal_type: signal_type.to_string(),
                created_at: Utc::now(),
                acknowledged_at: None,
            });
        Ok(())
    }

    /// Signal not yet acknowledged, if any.
    pub async fn pending_signal(&self, instance_id: &str) -> Option<SignalRecord> {
        self.state
            .lock()
            .await
            .signals
            .get(instance_id)
            .filter(|s| s.acknowledged_at.is_none())
            .cloned()
    }

    /// Mark an instance's signal as processed.
    pub async fn acknowledge_signal(&self, instance_id: &str) {
        if let Some(signal) = self.state.lock().await.signals.get_mut(instance_id) {
            signal.acknowledged_at.get_or_insert_with(Utc::now);
        }
    }

    /// Record a retried message attempt.
    pub async fn record_retry_attempt(
        &self,
        instance_id: &str,
        checkpoint_id: &str,
        attempt_number: u32,
        error_message: Option<&str>,
    ) {
        self.state.lock().await.retries.push(RetryAttemptRecord {
            instance_id: instance_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            attempt_number,
            error_message: error_message.map(str::to_string),
            created_at: Utc::now(),
        });
    }

    /// Retried attempts of an instance in record order.
    pub async fn retry_attempts(&self, instance_id: &str) -> Vec<RetryAttemptRecord> {
        self.state
            .lock()
            .await
            .retries
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// Fresh tracker for work a lifecycle run leaves behind, such as a
    /// detached farewell.
    ///
    /// Replaces the tracker of an earlier run of the same instance; call
    /// [`settle_detached`](Self::settle_detached) before starting a new run.
    pub fn detached_tasks(&self, instance_id: &str) -> TaskTracker {
        let tracker = TaskTracker::new();
        self.trackers()
            .insert(instance_id.to_string(), tracker.clone());
        tracker
    }

    /// Wait until detached work of an earlier run of `instance_id` is done.
    ///
    /// An aborted lifecycle task can leave its farewell running; its result
    /// is only journaled once it finishes.
    pub async fn settle_detached(&self, instance_id: &str) {
        let tracker = self.trackers().remove(instance_id);
        if let Some(tracker) = tracker {
            tracker.close();
            if !tracker.is_empty() {
                debug!(instance_id, pending = tracker.len(), "Waiting for detached tasks");
            }
            tracker.wait().await;
        }
    }

    fn trackers(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskTracker>> {
        self.detached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Checkpoint store scoped to one instance.
    pub fn backend(self: &Arc<Self>, instance_id: &str) -> Arc<dyn DurableBackend> {
        Arc::new(InstanceBackend {
            store: Arc::clone(self),
            instance_id: instance_id.to_string(),
        })
    }
}

/// [`DurableBackend`] over a [`MemoryStore`] for one instance.
struct InstanceBackend {
    store: Arc<MemoryStore>,
    instance_id: String,
}

fn backend_error(err: RuntimeError) -> LifecycleError {
    LifecycleError::Backend(err.to_string())
}

#[async_trait]
impl DurableBackend for InstanceBackend {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> smsloop_core::Result<Option<Vec<u8>>> {
        Ok(self
            .store
            .load_checkpoint(&self.instance_id, checkpoint_id)
            .await
            .map(|cp| cp.state))
    }

    async fn save_checkpoint(&self, checkpoint_id: &str, state: &[u8]) -> smsloop_core::Result<()> {
        self.store
            .save_checkpoint(&self.instance_id, checkpoint_id, state)
            .await
            .map(|_| ())
            .map_err(backend_error)
    }

    async fn record_retry_attempt(
        &self,
        checkpoint_id: &str,
        attempt_number: u32,
        error_message: Option<&str>,
    ) -> smsloop_core::Result<()> {
        self.store
            .record_retry_attempt(
                &self.instance_id,
                checkpoint_id,
                attempt_number,
                error_message,
            )
            .await;
        Ok(())
    }
}
