// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle configuration.

use std::env;
use std::time::Duration;

use crate::types::MessageKind;

/// Placeholder replaced by the subscriber address in message templates.
pub const SUBSCRIBER_PLACEHOLDER: &str = "{subscriber}";

/// How the farewell is executed once cancellation has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FarewellMode {
    /// Run on a separate task with its own timeout budget. The farewell keeps
    /// running even if the task driving the main flow is torn down.
    #[default]
    Detached,
    /// Run on the main task using the regular attempt timeout.
    Inline,
}

impl FarewellMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detached" | "append" => Some(FarewellMode::Detached),
            "inline" => Some(FarewellMode::Inline),
            _ => None,
        }
    }
}

/// Message texts. `{subscriber}` is replaced by the subscriber address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    /// Sent once, right after subscribing
    pub welcome: String,
    /// Sent on every timer fire
    pub recurring: String,
    /// Sent once after cancellation
    pub farewell: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            welcome: "Welcome! You have signed up!".to_string(),
            recurring: "This is the recurring message for subscribers".to_string(),
            farewell: "Your subscription has been canceled. Sorry to see you go!".to_string(),
        }
    }
}

impl MessageTemplates {
    /// Render the body for a message kind.
    pub fn render(&self, kind: MessageKind, subscriber_address: &str) -> String {
        let template = match kind {
            MessageKind::Welcome => &self.welcome,
            MessageKind::Recurring => &self.recurring,
            MessageKind::Farewell => &self.farewell,
        };
        template.replace(SUBSCRIBER_PLACEHOLDER, subscriber_address)
    }
}

/// Configuration of a subscription lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Time between recurring messages (default: 30s)
    pub message_period: Duration,
    /// Budget for one welcome or recurring attempt (default: 30s)
    pub attempt_timeout: Duration,
    /// Budget for the farewell attempt in detached mode (default: 30s)
    pub farewell_timeout: Duration,
    /// Farewell execution mode (default: detached)
    pub farewell_mode: FarewellMode,
    /// Stop after this many messages without a farewell (default: unlimited)
    pub max_messages: Option<u64>,
    /// Message texts
    pub templates: MessageTemplates,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            message_period: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
            farewell_timeout: Duration::from_secs(30),
            farewell_mode: FarewellMode::default(),
            max_messages: None,
            templates: MessageTemplates::default(),
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `SMSLOOP_MESSAGE_PERIOD_MS` - Time between recurring messages (default: 30000)
    /// - `SMSLOOP_ATTEMPT_TIMEOUT_MS` - Budget per attempt (default: 30000)
    /// - `SMSLOOP_FAREWELL_TIMEOUT_MS` - Budget for the detached farewell (default: 30000)
    /// - `SMSLOOP_FAREWELL_MODE` - `detached` (alias `append`) or `inline` (default: detached)
    /// - `SMSLOOP_MAX_MESSAGES` - Message cap (default: unlimited)
    /// - `SMSLOOP_WELCOME_TEMPLATE`, `SMSLOOP_RECURRING_TEMPLATE`,
    ///   `SMSLOOP_FAREWELL_TEMPLATE` - Message texts
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let message_period = duration_ms_var("SMSLOOP_MESSAGE_PERIOD_MS")?
            .unwrap_or(defaults.message_period);
        let attempt_timeout = duration_ms_var("SMSLOOP_ATTEMPT_TIMEOUT_MS")?
            .unwrap_or(defaults.attempt_timeout);
        let farewell_timeout = duration_ms_var("SMSLOOP_FAREWELL_TIMEOUT_MS")?
            .unwrap_or(defaults.farewell_timeout);

        let farewell_mode = match env::var("SMSLOOP_FAREWELL_MODE") {
            Ok(value) => FarewellMode::parse(&value).ok_or(ConfigError::Invalid(
                "SMSLOOP_FAREWELL_MODE",
                "must be 'detached', 'append' or 'inline'",
            ))?,
            Err(_) => defaults.farewell_mode,
        };

        let max_messages = match env::var("SMSLOOP_MAX_MESSAGES") {
            Ok(value) => Some(value.parse::<u64>().map_err(|_| {
                ConfigError::Invalid("SMSLOOP_MAX_MESSAGES", "must be a positive integer")
            })?),
            Err(_) => None,
        };

        let templates = MessageTemplates {
            welcome: env::var("SMSLOOP_WELCOME_TEMPLATE").unwrap_or(defaults.templates.welcome),
            recurring: env::var("SMSLOOP_RECURRING_TEMPLATE")
                .unwrap_or(defaults.templates.recurring),
            farewell: env::var("SMSLOOP_FAREWELL_TEMPLATE").unwrap_or(defaults.templates.farewell),
        };

        let config = Self {
            message_period,
            attempt_timeout,
            farewell_timeout,
            farewell_mode,
            max_messages,
            templates,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the state machine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_period.is_zero() {
            return Err(ConfigError::Invalid(
                "message_period",
                "must be greater than zero",
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "attempt_timeout",
                "must be greater than zero",
            ));
        }
        if self.farewell_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "farewell_timeout",
                "must be greater than zero",
            ));
        }
        if self.max_messages == Some(0) {
            return Err(ConfigError::Invalid(
                "max_messages",
                "must be a positive integer",
            ));
        }
        Ok(())
    }

    /// Set the time between recurring messages.
    pub fn with_message_period(mut self, period: Duration) -> Self {
        self.message_period = period;
        self
    }

    /// Set the budget for one welcome or recurring attempt.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the budget for the detached farewell.
    pub fn with_farewell_timeout(mut self, timeout: Duration) -> Self {
        self.farewell_timeout = timeout;
        self
    }

    /// Set the farewell execution mode.
    pub fn with_farewell_mode(mut self, mode: FarewellMode) -> Self {
        self.farewell_mode = mode;
        self
    }

    /// Stop after `max` messages. `None` keeps the loop running until cancelled.
    pub fn with_max_messages(mut self, max: Option<u64>) -> Self {
        self.max_messages = max;
        self
    }

    /// Replace the message texts.
    pub fn with_templates(mut self, templates: MessageTemplates) -> Self {
        self.templates = templates;
        self
    }
}

fn duration_ms_var(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::Invalid(key, "must be a number of milliseconds")),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// A value is invalid.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
