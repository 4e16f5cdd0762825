// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance registry for subscription lifecycles.
//!
//! [`SubscriptionRuntime`] runs one [`SubscriptionLifecycle`] per subscriber on
//! its own tokio task and routes cancel and query requests to it by instance
//! id.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use smsloop_runtime::{LoggingSender, RuntimeConfig, SubscriptionRuntime};
//!
//! let runtime = SubscriptionRuntime::builder()
//!     .sender(Arc::new(LoggingSender))
//!     .config(RuntimeConfig::new("+15550000000"))
//!     .build()?;
//!
//! let handle = runtime.start("+15551234567").await?;
//! let snapshot = runtime.query(handle.instance_id())?;
//!
//! // Graceful shutdown: every active subscriber gets a farewell
//! runtime.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use smsloop_core::{
    Capabilities, LifecycleOutcome, LifecycleState, MessageSender, RecordView,
    SubscriptionLifecycle, SubscriptionSnapshot, Timer,
};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::front_door::instance_id_for;
use crate::store::{CANCEL_SIGNAL, InstanceRecord, InstanceStatus, MemoryStore};
use crate::timer::TokioTimer;

/// Builder for creating a [`SubscriptionRuntime`].
#[derive(Default)]
pub struct SubscriptionRuntimeBuilder {
    store: Option<Arc<MemoryStore>>,
    sender: Option<Arc<dyn MessageSender>>,
    timer: Option<Arc<dyn Timer>>,
    config: Option<RuntimeConfig>,
}

impl std::fmt::Debug for SubscriptionRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("sender", &self.sender.as_ref().map(|_| "..."))
            .field("timer", &self.timer.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl SubscriptionRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store. Default: a new empty [`MemoryStore`].
    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the message sender (required).
    pub fn sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the timer. Default: [`TokioTimer`].
    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Set the runtime configuration (required).
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing or the lifecycle
    /// configuration is invalid.
    pub fn build(self) -> Result<SubscriptionRuntime> {
        let sender = self
            .sender
            .ok_or_else(|| RuntimeError::validation("sender", "sender is required"))?;
        let config = self
            .config
            .ok_or_else(|| RuntimeError::validation("config", "config is required"))?;
        config
            .lifecycle
            .validate()
            .map_err(|e| RuntimeError::validation("config", e.to_string()))?;

        Ok(SubscriptionRuntime {
            inner: Arc::new(RuntimeInner {
                store: self.store.unwrap_or_default(),
                sender,
                timer: self
                    .timer
                    .unwrap_or_else(|| Arc::new(TokioTimer::new())),
                config,
                registry: Mutex::new(HashMap::new()),
                idle: Notify::new(),
            }),
        })
    }
}

/// Handle to a started lifecycle task.
#[derive(Debug)]
pub struct InstanceHandle {
    instance_id: String,
    task: JoinHandle<Result<LifecycleOutcome>>,
}

impl InstanceHandle {
    /// Instance id of the lifecycle.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wait for the lifecycle to finish.
    ///
    /// By the time this returns the instance is gone from the registry and
    /// its final status is in the store.
    pub async fn wait(self) -> Result<LifecycleOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::InstanceAborted {
                instance_id: self.instance_id,
            }),
        }
    }
}

struct ActiveInstance {
    cancel: CancellationToken,
    view: RecordView,
    abort: AbortHandle,
}

struct RuntimeInner {
    store: Arc<MemoryStore>,
    sender: Arc<dyn MessageSender>,
    timer: Arc<dyn Timer>,
    config: RuntimeConfig,
    registry: Mutex<HashMap<String, ActiveInstance>>,
    idle: Notify,
}

impl RuntimeInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, ActiveInstance>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the final status, then drop the instance from the registry.
    async fn finish(&self, instance_id: &str, result: &Result<LifecycleOutcome>) {
        let (status, error) = match result {
            Ok(outcome) if outcome.state == LifecycleState::Terminated => {
                (InstanceStatus::Cancelled, None)
            }
            Ok(_) => (InstanceStatus::Completed, None),
            Err(e) => (InstanceStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .complete_instance(instance_id, status, error)
            .await
        {
            warn!(instance_id, error = %e, "Failed to record instance status");
        }
        if status == InstanceStatus::Cancelled {
            self.store.acknowledge_signal(instance_id).await;
        }
        self.store.settle_detached(instance_id).await;

        let mut registry = self.registry();
        registry.remove(instance_id);
        if registry.is_empty() {
            self.idle.notify_waiters();
        }
        info!(instance_id, status = %status, "Instance finished");
    }
}

/// Runs subscription lifecycles and routes requests to them.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SubscriptionRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for SubscriptionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRuntime")
            .field("config", &self.inner.config)
            .field("active_instances", &self.active_instances())
            .finish()
    }
}

impl SubscriptionRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SubscriptionRuntimeBuilder {
        SubscriptionRuntimeBuilder::new()
    }

    /// The store this runtime journals into.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.inner.store
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Start a lifecycle for `subscriber`.
    ///
    /// The instance id is the subscriber address without the leading `+`.
    #[instrument(skip(self))]
    pub async fn start(&self, subscriber: &str) -> Result<InstanceHandle> {
        let instance_id = instance_id_for(subscriber);
        if self.inner.registry().contains_key(&instance_id) {
            return Err(RuntimeError::InstanceAlreadyExists { instance_id });
        }

        let record = self
            .inner
            .store
            .register_instance(&instance_id, subscriber, &self.inner.config.origin_address)
            .await?;
        info!(instance_id = %record.instance_id, "Starting subscription");
        Ok(self.spawn(record, false))
    }

    /// Deliver a cancel signal.
    ///
    /// The signal is persisted before the token is triggered so a restart
    /// re-delivers it. Cancelling an instance that is already cancelling is a
    /// no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, instance_id: &str) -> Result<()> {
        let instance_id = instance_id_for(instance_id);
        let token = self
            .inner
            .registry()
            .get(&instance_id)
            .map(|active| active.cancel.clone())
            .ok_or_else(|| RuntimeError::not_found(&instance_id))?;

        self.inner
            .store
            .save_signal(&instance_id, CANCEL_SIGNAL)
            .await?;
        token.cancel();
        info!(instance_id = %instance_id, "Cancel signal delivered");
        Ok(())
    }

    /// Latest published snapshot of an active instance.
    ///
    /// A lifecycle that reached a terminal state is reported as not found,
    /// even before its task has left the registry.
    pub fn query(&self, instance_id: &str) -> Result<SubscriptionSnapshot> {
        let instance_id = instance_id_for(instance_id);
        self.inner
            .registry()
            .get(&instance_id)
            .map(|active| active.view.snapshot())
            .filter(|snapshot| !snapshot.state.is_terminal())
            .ok_or_else(|| RuntimeError::not_found(instance_id))
    }

    /// Query handle of an active instance, for awaiting changes.
    pub fn view(&self, instance_id: &str) -> Result<RecordView> {
        let instance_id = instance_id_for(instance_id);
        self.inner
            .registry()
            .get(&instance_id)
            .map(|active| active.view.clone())
            .ok_or_else(|| RuntimeError::not_found(instance_id))
    }

    /// Ids of all active instances, sorted.
    pub fn active_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Restart every instance the store still lists as running.
    ///
    /// Lifecycles replay their journal, so messages that were already
    /// attempted are not sent again. Detached farewells still running from an
    /// aborted task are awaited first. Instances with a pending cancel signal
    /// start with their token already triggered.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<Vec<InstanceHandle>> {
        let mut handles = Vec::new();
        for record in self
            .inner
            .store
            .instances_with_status(InstanceStatus::Running)
            .await
        {
            if self.inner.registry().contains_key(&record.instance_id) {
                continue;
            }
            // A farewell left running by an aborted task journals its result
            // when it finishes; replaying before that would send it again
            self.inner.store.settle_detached(&record.instance_id).await;
            let cancelled = self
                .inner
                .store
                .pending_signal(&record.instance_id)
                .await
                .is_some();
            info!(
                instance_id = %record.instance_id,
                cancelled,
                "Recovering subscription"
            );
            handles.push(self.spawn(record, cancelled));
        }
        Ok(handles)
    }

    /// Cancel every active instance and wait until all of them finished.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let ids = self.active_instances();
        info!(count = ids.len(), "Shutting down, cancelling active subscriptions");
        for id in &ids {
            if let Err(e) = self.cancel(id).await {
                // Finished between listing and cancelling
                warn!(instance_id = %id, error = %e, "Could not cancel subscription");
            }
        }

        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.inner.registry().is_empty() {
                break;
            }
            idle.await;
        }
        info!("Shutdown complete");
    }

    /// Abort every lifecycle task without running farewells.
    ///
    /// Store state is left as is, so a new runtime over the same store can
    /// [`recover`](Self::recover) the aborted instances.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<(String, ActiveInstance)> = self.inner.registry().drain().collect();
        for (instance_id, active) in &drained {
            warn!(instance_id = %instance_id, "Aborting subscription task");
            active.abort.abort();
        }
        drained.len()
    }

    fn spawn(&self, record: InstanceRecord, cancelled: bool) -> InstanceHandle {
        let inner = &self.inner;
        let capabilities = Capabilities::new(
            inner.sender.clone(),
            inner.timer.clone(),
            inner.store.backend(&record.instance_id),
        )
        .with_tasks(inner.store.detached_tasks(&record.instance_id));
        let lifecycle = SubscriptionLifecycle::new(
            record.subscriber,
            record.origin,
            inner.config.lifecycle.clone(),
            inner.config.retry.clone(),
            capabilities,
        );
        let view = lifecycle.query();
        let cancel = CancellationToken::new();
        if cancelled {
            cancel.cancel();
        }

        let task_inner = Arc::clone(inner);
        let task_id = record.instance_id.clone();
        let token = cancel.clone();

        // Registered under the lock so the task cannot finish before it is listed
        let mut registry = inner.registry();
        let task = tokio::spawn(async move {
            let result = lifecycle.run(token).await.map_err(RuntimeError::from);
            task_inner.finish(&task_id, &result).await;
            result
        });
        registry.insert(
            record.instance_id.clone(),
            ActiveInstance {
                cancel,
                view,
                abort: task.abort_handle(),
            },
        );

        InstanceHandle {
            instance_id: record.instance_id,
            task,
        }
    }
}
