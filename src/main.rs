//! Dreambox Bridge
//!
//! Bridges Enigma2 / Dreambox set-top boxes to Home Assistant over HTTP and MQTT.

use dreambox_bridge::{api, bus, config, discovery, dreambox, entries, hub, mqtt};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dreambox_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Dreambox Bridge v{} ({})",
        env!("DBB_VERSION"),
        env!("DBB_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, scan interval: {}s",
        config.port,
        config.scan_interval_secs
    );

    let shutdown = CancellationToken::new();

    // Create event bus
    let bus = bus::create_bus();
    tracing::info!("Event bus initialized");

    // Hub owns entries, flows and media players
    let hub = hub::Hub::new(
        entries::EntryStore::load_default(),
        Arc::new(dreambox::HttpClientFactory),
        bus.clone(),
        hub::HubOptions {
            scan_interval: Duration::from_secs(config.scan_interval_secs.max(1)),
            ..Default::default()
        },
        shutdown.child_token(),
    );
    tokio::spawn(hub.clone().run_command_listener());
    hub.start().await;
    hub.import_devices(config.devices.clone()).await;

    // Initialize MQTT bridge
    let mqtt = Arc::new(mqtt::MqttBridge::new(bus.clone(), shutdown.child_token()));
    if let Some(ref mqtt_config) = config.mqtt {
        mqtt.configure(mqtt_config).await;

        if let Err(e) = mqtt.start().await {
            tracing::warn!("Failed to start MQTT bridge: {}", e);
        } else {
            tracing::info!("MQTT bridge started for {}", mqtt_config.host);
        }
    }

    // SSDP discovery of new boxes
    if config.ssdp {
        let discovery = discovery::SsdpDiscovery::new(hub.clone(), shutdown.child_token());
        tokio::spawn(discovery.run());
        tracing::info!("SSDP discovery active");
    }

    let state = api::AppState::new(hub.clone(), mqtt.clone());
    let app = api::router(state)
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: stop polling, discovery and MQTT
    tracing::info!("Shutting down...");
    hub.shutdown().await;
    mqtt.stop().await;
    shutdown.cancel();
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
