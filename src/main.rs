//! Platform Event Log daemon (pel-logd)
//!
//! Standalone service that:
//! - Builds PELs from raw bytes, ESEL strings, or message-registry
//!   event names
//! - Maintains the bounded-retention PEL repository on disk
//! - Notifies the host of new PELs and tracks host/HMC acknowledgement
//! - Exposes an HTTP/WebSocket bus object surface in place of D-Bus
//!
//! Default bind: 127.0.0.1:8851
//! WebSocket: /events
//! REST API: /api/v1/*

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pel_logd::config::DaemonConfig;
use pel_logd::data_interface::LocalDataInterface;
use pel_logd::device_callouts::DeviceCalloutMap;
use pel_logd::event_log::LoggingEventLogSink;
use pel_logd::extensions::ExtensionRegistry;
use pel_logd::host_notifier::{HostNotifier, InstanceIdPool, LoggingHostTransport};
use pel_logd::log_id::LogIdGenerator;
use pel_logd::manager::Manager;
use pel_logd::registry::Registry;
use pel_logd::repository::Repository;
use pel_logd::service::PelService;
use pel_logd::tracing_layer::WebSocketLayer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env();

    let registry = Registry::load(&config.registry_path())
        .with_context(|| format!("loading message registry from {}", config.registry_path().display()))?;
    let device_callouts = match std::fs::read_to_string(config.device_callouts_path()) {
        Ok(text) => DeviceCalloutMap::from_json_str(&text)
            .with_context(|| format!("parsing {}", config.device_callouts_path().display()))?,
        Err(_) => DeviceCalloutMap::from_json_str("{}").expect("empty device-callout map is always valid"),
    };
    let pel_ids = LogIdGenerator::load(config.pel_id_path())
        .with_context(|| format!("loading PEL id file {}", config.pel_id_path().display()))?;
    let repository = Repository::new(
        config.log_path(),
        config.archive_path(),
        config.max_repo_size,
        config.max_num_pels,
    )
    .context("initializing PEL repository")?;

    let data_interface = Arc::new(LocalDataInterface {
        manufacturing_mode: false,
        quiesce_on_error: config.phal_enabled,
    });
    let event_log = Arc::new(LoggingEventLogSink);

    let manager = Manager::new(
        registry,
        repository,
        data_interface,
        device_callouts,
        pel_ids,
        ExtensionRegistry::new(),
        event_log.clone(),
        config.clone(),
    );

    let host_notifier = HostNotifier::new(
        Arc::new(LoggingHostTransport),
        Arc::new(InstanceIdPool::default()),
        std::time::Duration::from_secs(config.host_response_timeout_secs),
        config.dont_send_pels_to_host,
    );

    let service = PelService::new(manager, host_notifier, event_log, config.clone());

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true).with_thread_names(true))
        .with(WebSocketLayer::new(service.clone()))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pel_logd=debug")))
        .init();

    info!("Starting Platform Event Log daemon (pel-logd)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    service.spawn_deletion_watcher();

    let bind_addr: SocketAddr = service.config().bind_addr.parse().context("parsing PEL_BIND")?;
    info!("Binding to {}", bind_addr);

    let app = pel_logd::api::create_router(service);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("pel-logd listening on http://{}", bind_addr);
    info!("WebSocket events: ws://{}/events", bind_addr);
    info!("Swagger UI: http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
