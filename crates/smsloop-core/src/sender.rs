// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message delivery capability.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::types::OutboundMessage;

/// Delivers a single outbound message.
///
/// Implementations talk to an SMS provider. They may be invoked more than once
/// for the same [`OutboundMessage::sequence`] when the retry policy allows it,
/// so providers that support idempotency keys should use
/// [`OutboundMessage::idempotency_key`].
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Attempt delivery. Any error is a hard failure for this attempt.
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}
