// src/main.rs

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use leave_quota_core::api::{self, AppState};
use leave_quota_core::clock::SystemClock;
use leave_quota_core::config::{AppConfig, Cli};
use leave_quota_core::events::{self, EventPublisher, Notifier, TracingNotifier, WebhookNotifier};
use leave_quota_core::{InMemoryStore, QuotaEngine};

#[derive(Error, Debug)]
enum StartupError {
    #[error("UTC offset of {0} minutes is out of range")]
    UtcOffset(i32),
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- Setup ---
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env()
        .context("Loading QUOTA_* configuration")?
        .apply_cli(&cli);

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting default tracing subscriber failed")?;
    info!("Configuration loaded. Bind address: {}", config.bind_addr);

    let clock = SystemClock::with_offset_minutes(config.utc_offset_minutes)
        .ok_or(StartupError::UtcOffset(config.utc_offset_minutes))?;

    // --- Engine and event fan-out ---
    let (publisher, event_rx) = EventPublisher::channel();
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(QuotaEngine::new(store).with_events(publisher));

    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(TracingNotifier)];
    if let Some(url) = &config.notify_webhook_url {
        let webhook = WebhookNotifier::new(url.clone()).context("Building webhook notifier")?;
        info!("Webhook notifications enabled: {}", url);
        notifiers.push(Arc::new(webhook));
    }
    tokio::spawn(events::run_event_dispatcher(
        event_rx,
        notifiers,
        engine.clone(),
    ));

    // --- Lock table sweep ---
    let sweep_engine = engine.clone();
    let sweep_every = Duration::from_secs(config.lock_sweep_secs.max(1));
    tokio::spawn(async move {
        info!("Starting ledger lock sweep every {:?}", sweep_every);
        loop {
            sleep(sweep_every).await;
            match sweep_engine.prune_locks() {
                Ok(0) => {}
                Ok(pruned) => info!("Pruned {} idle ledger lock(s)", pruned),
                Err(e) => error!("Ledger lock sweep failed: {}", e),
            }
        }
    });

    let state = AppState {
        engine,
        clock: Arc::new(clock),
    };
    let app = api::router(state);

    // --- Run Web Server ---
    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| {
                    let err_msg = format!("Failed to load TLS cert/key: {}", e);
                    error!("{}", err_msg);
                    StartupError::TlsConfig(err_msg)
                })?;
            info!(
                "TLS configuration loaded from {} and {}",
                cert_path.display(),
                key_path.display()
            );
            info!("Starting server on https://{}", config.bind_addr);
            axum_server::bind_rustls(config.bind_addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            warn!("No TLS certificate configured; serving plain HTTP");
            let listener = tokio::net::TcpListener::bind(config.bind_addr)
                .await
                .with_context(|| format!("Binding {}", config.bind_addr))?;
            info!("Starting server on http://{}", config.bind_addr);
            axum::serve(listener, app).await.context("HTTP server failed")?;
        }
    }

    Ok(())
}
