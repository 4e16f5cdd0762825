// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use smsloop_core::{ConfigError, LifecycleConfig, RetryConfig, RetryStrategy};

/// smsloop runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Sender phone number used for every outbound message
    pub origin_address: String,
    /// Lifecycle settings shared by every subscription
    pub lifecycle: LifecycleConfig,
    /// Retry policy for message attempts
    pub retry: RetryConfig,
}

impl RuntimeConfig {
    /// Configuration with default lifecycle and retry settings.
    pub fn new(origin_address: impl Into<String>) -> Self {
        Self {
            origin_address: origin_address.into(),
            lifecycle: LifecycleConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `SMSLOOP_ORIGIN_ADDRESS`: sender phone number
    ///
    /// Optional (with defaults):
    /// - `SMSLOOP_SEND_MAX_RETRIES`: retries per message attempt (default: 0)
    /// - `SMSLOOP_SEND_RETRY_DELAY_MS`: base retry delay (default: 1000)
    /// - everything read by [`LifecycleConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let origin_address = std::env::var("SMSLOOP_ORIGIN_ADDRESS")
            .map_err(|_| ConfigError::Missing("SMSLOOP_ORIGIN_ADDRESS"))?;
        if origin_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "SMSLOOP_ORIGIN_ADDRESS",
                "must not be blank",
            ));
        }

        let max_retries: u32 = std::env::var("SMSLOOP_SEND_MAX_RETRIES")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("SMSLOOP_SEND_MAX_RETRIES", "must be a positive integer")
            })?;

        let delay_ms: u64 = std::env::var("SMSLOOP_SEND_RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "SMSLOOP_SEND_RETRY_DELAY_MS",
                    "must be a number of milliseconds",
                )
            })?;

        Ok(Self {
            origin_address,
            lifecycle: LifecycleConfig::from_env()?,
            retry: RetryConfig::new(max_retries, delay_ms, RetryStrategy::ExponentialBackoff),
        })
    }
}
