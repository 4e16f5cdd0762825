// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message sender that logs instead of calling an SMS provider.

use async_trait::async_trait;
use smsloop_core::{DeliveryError, MessageSender, OutboundMessage};
use tracing::info;

/// Logs every message at info level and reports success.
#[derive(Debug, Clone, Default)]
pub struct LoggingSender;

#[async_trait]
impl MessageSender for LoggingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        info!(
            from = %message.origin,
            to = %message.destination,
            sequence = message.sequence,
            kind = %message.kind,
            idempotency_key = %message.idempotency_key(),
            body = %message.body,
            "SMS sent"
        );
        Ok(())
    }
}
