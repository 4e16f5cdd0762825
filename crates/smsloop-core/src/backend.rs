// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checkpoint store contract.

use async_trait::async_trait;

use crate::error::Result;

/// Checkpoint store for one lifecycle instance.
///
/// This is the part of the durable substrate the state machine depends on.
/// Persistence, crash recovery and signal re-delivery are the implementor's
/// concern.
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Instance this backend is scoped to.
    fn instance_id(&self) -> &str;

    /// Load a checkpoint by id, `None` if it was never saved.
    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Vec<u8>>>;

    /// Save a checkpoint. The first write for an id wins; later writes for the
    /// same id are ignored.
    async fn save_checkpoint(&self, checkpoint_id: &str, state: &[u8]) -> Result<()>;

    /// Record a retried message attempt for auditing.
    async fn record_retry_attempt(
        &self,
        checkpoint_id: &str,
        attempt_number: u32,
        error_message: Option<&str>,
    ) -> Result<()>;
}
