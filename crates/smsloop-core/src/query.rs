// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only view of a running lifecycle.

use tokio::sync::watch;

use crate::types::{LifecycleState, SubscriptionRecord, SubscriptionSnapshot};

/// Write side, owned by the lifecycle.
#[derive(Debug)]
pub(crate) struct RecordPublisher {
    tx: watch::Sender<SubscriptionSnapshot>,
}

impl RecordPublisher {
    pub(crate) fn new(initial: SubscriptionSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the published snapshot. Works with no reader attached.
    pub(crate) fn publish(&self, snapshot: SubscriptionSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub(crate) fn subscribe(&self) -> RecordView {
        RecordView {
            rx: self.tx.subscribe(),
        }
    }
}

/// Query handle for one lifecycle.
///
/// Snapshots are published only after a transition completes, so a reader
/// never sees a record with a sequence number assigned to an attempt that is
/// still in flight. The view stays readable after the lifecycle finishes and
/// keeps returning the final snapshot.
#[derive(Debug, Clone)]
pub struct RecordView {
    rx: watch::Receiver<SubscriptionSnapshot>,
}

impl RecordView {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        self.rx.borrow().clone()
    }

    /// Latest published record.
    pub fn record(&self) -> SubscriptionRecord {
        self.rx.borrow().record.clone()
    }

    /// Latest published state.
    pub fn state(&self) -> LifecycleState {
        self.rx.borrow().state
    }

    /// Wait for the next published snapshot.
    ///
    /// Returns `None` once the lifecycle has finished and nothing newer will
    /// be published.
    pub async fn changed(&mut self) -> Option<SubscriptionSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until a published snapshot satisfies `predicate`.
    ///
    /// Checks the current snapshot first. Returns `None` if the lifecycle
    /// finished without ever publishing a matching snapshot.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SubscriptionSnapshot) -> bool,
    ) -> Option<SubscriptionSnapshot> {
        self.rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .map(|snapshot| (*snapshot).clone())
    }
}
