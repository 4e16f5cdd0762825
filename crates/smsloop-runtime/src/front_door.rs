// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscribe, unsubscribe and details requests.

use std::sync::LazyLock;

use regex::Regex;
use smsloop_core::SubscriptionRecord;
use tracing::{info, instrument};

use crate::error::{Result, RuntimeError};
use crate::runtime::{InstanceHandle, SubscriptionRuntime};

/// US E.164 number: `+1` followed by ten digits.
static PHONE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+1[0-9]{10}$").expect("phone number regex is valid"));

const PHONE_FIELD: &str = "phone_number";

/// Instance id for a subscriber address: the address without its leading `+`.
///
/// Ids are accepted too and returned unchanged.
pub fn instance_id_for(subscriber: &str) -> String {
    let subscriber = subscriber.trim();
    subscriber
        .strip_prefix('+')
        .unwrap_or(subscriber)
        .to_string()
}

/// Check a subscriber address before a lifecycle is started for it.
pub fn validate_subscriber(subscriber: &str) -> Result<()> {
    if subscriber.is_empty() {
        return Err(RuntimeError::validation(PHONE_FIELD, "Phone number is blank"));
    }
    if !PHONE_NUMBER.is_match(subscriber) {
        return Err(RuntimeError::validation(
            PHONE_FIELD,
            "Invalid: Please enter a phone number with the format +1XXXXXXXXXX",
        ));
    }
    Ok(())
}

fn require_present(phone_number: &str) -> Result<()> {
    if phone_number.trim().is_empty() {
        return Err(RuntimeError::validation(PHONE_FIELD, "Phone number is blank"));
    }
    Ok(())
}

/// Request-level entry points over a [`SubscriptionRuntime`].
#[derive(Debug, Clone)]
pub struct SubscriptionService {
    runtime: SubscriptionRuntime,
}

impl SubscriptionService {
    /// Wrap a runtime.
    pub fn new(runtime: SubscriptionRuntime) -> Self {
        Self { runtime }
    }

    /// Underlying runtime.
    pub fn runtime(&self) -> &SubscriptionRuntime {
        &self.runtime
    }

    /// Sign a subscriber up. The address must be `+1` followed by ten digits.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, phone_number: &str) -> Result<InstanceHandle> {
        validate_subscriber(phone_number)?;
        let handle = self.runtime.start(phone_number).await?;
        info!(instance_id = %handle.instance_id(), "Signed up");
        Ok(handle)
    }

    /// Unsubscribe by address (`+1XXXXXXXXXX`) or instance id (`1XXXXXXXXXX`).
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, phone_number: &str) -> Result<()> {
        require_present(phone_number)?;
        self.runtime.cancel(phone_number).await?;
        info!("Unsubscribed");
        Ok(())
    }

    /// Current record of an active subscription, by address or instance id.
    pub fn details(&self, phone_number: &str) -> Result<SubscriptionRecord> {
        require_present(phone_number)?;
        self.runtime
            .query(phone_number)
            .map(|snapshot| snapshot.record)
    }
}
