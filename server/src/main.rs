#![allow(dead_code)]

mod db_core;
mod error;
mod model;
mod monitor;
mod notify;
mod request_tracing;
mod routes;
mod server_config;
#[cfg(test)]
mod testing;

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::extract::FromRef;
use chrono::Utc;
use mimalloc::MiMalloc;
use model::device::{DeviceCtrl, DeviceStore, InMemoryDeviceStore};
use monitor::{
    clock::{Clock, SystemClock},
    debounce::DebounceTracker,
    probe::{Prober, TcpProber},
    DeviceStatusService, StatusPoller,
};
use notify::{AlertDispatcher, StatusBroadcaster};
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database};
use server_config::cfg;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub store: Arc<dyn DeviceStore>,
    pub status_service: Arc<DeviceStatusService>,
    pub broadcaster: StatusBroadcaster,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    tracing::info!("{}", *cfg);

    let store = build_device_store().await?;
    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(cfg.alerts.request_timeout())
        .build()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let prober: Arc<dyn Prober> = Arc::new(TcpProber::new(cfg.monitor.probe_timeout()));
    let dispatcher = Arc::new(AlertDispatcher::new(http_client, cfg.alerts.settings()));
    let status_service = Arc::new(DeviceStatusService::new(
        store.clone(),
        prober,
        DebounceTracker::new(cfg.monitor.confirmation_window()),
        clock,
        dispatcher,
    ));
    let broadcaster = StatusBroadcaster::new(cfg.broadcast.settings());

    let shutdown = CancellationToken::new();
    let poller = StatusPoller::new(
        status_service.clone(),
        broadcaster.clone(),
        cfg.monitor.poller_settings(),
    );
    let poller_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    let state = ServerState {
        store,
        status_service,
        broadcaster,
    };
    let router = AppRouter::create(state);

    let port = env::var("PORT").unwrap_or("7070".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?));
    tracing::info!("Device monitor running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = poller_handle.await {
        tracing::error!("Device status poller task failed: {:?}", e);
    }
    tracing::info!("Cleanups done, shutting down");

    Ok(())
}

async fn build_device_store() -> anyhow::Result<Arc<dyn DeviceStore>> {
    match env::var("DATABASE_URL") {
        Ok(db_url) => {
            let mut db_options = ConnectOptions::new(db_url);
            db_options.sqlx_logging(false);

            let conn = Database::connect(db_options)
                .await
                .context("Database connection failed")?;
            Ok(Arc::new(DeviceCtrl::new(conn)))
        }
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL is not set, monitoring {} device(s) from config.toml",
                cfg.devices.len()
            );
            Ok(Arc::new(InMemoryDeviceStore::from_seeds(
                &cfg.devices,
                Utc::now(),
            )))
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping poller");
    shutdown.cancel();
}
