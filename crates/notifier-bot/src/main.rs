mod commands;
mod config;
mod context;
mod pipeline;
mod poller;
mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use notification_service::TelegramClient;
use tokio::signal::unix::SignalKind;
use tokio::sync::{mpsc, watch};

use config::BotConfig;
use context::AppContext;

/// Pending jobs beyond this are dropped by the poller
const JOB_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        tracing_subscriber::EnvFilter::new(level.to_lowercase())
    });
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting ilboursa notifier bot");

    let config = BotConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Destinations: {}", config.telegram_chat_ids.len());
    tracing::info!("  Cache TTL: {}s", config.cache_ttl_secs);
    tracing::info!("  Fetch timeout: {}s", config.fetch_timeout_secs);
    if let Some(rule) = &config.take_profit {
        tracing::info!(
            "  Take-profit band: {}..{} after a {}% peak",
            rule.band_low,
            rule.band_high,
            rule.min_prior_peak
        );
    }

    let telegram = TelegramClient::new(&config.telegram_bot_token, &config.telegram_api_base)
        .context("Failed to build Telegram client")?;
    let ctx = Arc::new(AppContext::from_config(&config, &telegram).await?);
    tracing::info!("Scheduled scans at {} on weekdays", ctx.schedule.describe());

    let (job_tx, job_rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let executor = tokio::spawn(pipeline::run_executor(
        Arc::clone(&ctx),
        job_rx,
        shutdown_rx.clone(),
    ));
    let timer = tokio::spawn(scheduler::run(
        ctx.schedule.clone(),
        job_tx.clone(),
        shutdown_rx.clone(),
    ));
    let poller = tokio::spawn(poller::run(
        telegram,
        job_tx,
        config.poll_timeout_secs,
        shutdown_rx,
    ));

    // Graceful shutdown: SIGINT + SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("scheduler", timer), ("poller", poller), ("executor", executor)] {
        if let Err(e) = handle.await {
            tracing::error!("{} task failed: {}", name, e);
        }
    }

    tracing::info!("Notifier bot stopped");
    Ok(())
}
