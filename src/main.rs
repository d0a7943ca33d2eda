use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod announce;
mod buffers;
mod config;
mod control;
mod error;
mod parser;
mod reaper;
mod scrape;
mod server;
mod state;
mod store;
mod tracker;
mod utils;

use config::Config;
use tracker::Tracker;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env().context("Failed loading configuration.")?;
    let tracker = Arc::new(Tracker::bootstrap(config).await?);

    let _reaper_handle = tokio::spawn({
        let tracker = tracker.clone();
        async move { run_reaper(tracker).await }
    });

    let _flush_handle = tokio::spawn({
        let tracker = tracker.clone();
        async move { run_flusher(tracker).await }
    });

    let server_handle = tokio::spawn({
        let tracker = tracker.clone();
        async move { server::serve(tracker).await }
    });

    shutdown_signal().await;
    tracing::info!("Signal received, starting graceful shutdown.");
    tracker.advance_status();
    server_handle.abort();

    // Give the in-flight announces a moment to finish before the second
    // signal (or drain below) tears things down harder.
    tokio::time::sleep(Duration::from_millis(200)).await;
    tracker.advance_status();

    let max_flushes = 1000;
    let mut flushes = 0;
    while flushes < max_flushes && !tracker.buffers.all_clear() {
        store::flush::flush_all(&tracker);
        tokio::time::sleep(Duration::from_millis(100)).await;
        flushes += 1;
    }

    if flushes == max_flushes {
        tracing::warn!("Graceful shutdown hit the flush-attempt cap with buffers still pending.");
    } else {
        tracing::info!("Graceful shutdown complete.");
    }

    Ok(())
}

async fn run_reaper(tracker: Arc<Tracker>) {
    let mut interval = tokio::time::interval(Duration::from_secs(tracker.config.reap_interval));
    loop {
        interval.tick().await;
        reaper::reap(&tracker);
    }
}

async fn run_flusher(tracker: Arc<Tracker>) {
    let mut interval = tokio::time::interval(Duration::from_secs(tracker.config.flush_interval));
    loop {
        interval.tick().await;
        store::flush::flush_all(&tracker);
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
