// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! smsloop worker
//!
//! Runs subscription lifecycles in-process. Messages are written to the log
//! instead of being sent to an SMS provider.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use smsloop_runtime::{LoggingSender, RuntimeConfig, SubscriptionRuntime, SubscriptionService};

/// Recurring SMS subscriptions.
#[derive(Parser, Debug)]
#[command(name = "smsloop", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start subscriptions and run until Ctrl-C.
    Run {
        /// Subscriber phone numbers (+1XXXXXXXXXX).
        #[arg(long = "subscribe", env = "SMSLOOP_SUBSCRIBERS", value_delimiter = ',')]
        subscribers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("smsloop_runtime=info".parse()?)
                .add_directive("smsloop_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { subscribers } => run(subscribers).await,
    }
}

async fn run(subscribers: Vec<String>) -> Result<()> {
    info!("Starting smsloop worker");

    let config = RuntimeConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        origin = %config.origin_address,
        message_period_ms =
            u64::try_from(config.lifecycle.message_period.as_millis()).unwrap_or(u64::MAX),
        farewell_mode = ?config.lifecycle.farewell_mode,
        max_retries = config.retry.max_retries,
        "Configuration loaded"
    );

    let runtime = SubscriptionRuntime::builder()
        .sender(Arc::new(LoggingSender))
        .config(config)
        .build()?;
    let service = SubscriptionService::new(runtime.clone());

    for subscriber in &subscribers {
        match service.subscribe(subscriber).await {
            Ok(handle) => info!(instance_id = %handle.instance_id(), "Subscription started"),
            Err(e) => error!(subscriber = %subscriber, code = e.error_code(), "Couldn't sign up user: {}", e),
        }
    }

    if runtime.active_instances().is_empty() {
        info!("No active subscriptions, exiting");
        return Ok(());
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
