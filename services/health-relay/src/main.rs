use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use health_relay::{
    build_router,
    config::RelayConfig,
    forwarder::{Forwarder, ThingSpeakClient},
    handlers::AppState,
    relay::RelayController,
    store::HttpStateStore,
};
use reqwest::Client;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, TlsConfiguration, Transport};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    eprintln!("[health-relay] booting...");

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = RelayConfig::from_env().context("invalid configuration")?;

    let http_client = Client::builder()
        .timeout(cfg.sink_timeout)
        .build()
        .context("build http client")?;
    let store = HttpStateStore::new(
        http_client.clone(),
        &cfg.store.url,
        &cfg.store.path,
        cfg.store.auth.clone(),
    );
    tracing::info!("state store -> {}", store.record_url());
    let metrics = ThingSpeakClient::new(http_client, &cfg.metrics.url, &cfg.metrics.api_key);
    tracing::info!(
        "metrics -> {} every >{}ms",
        cfg.metrics.url,
        cfg.min_forward_interval.as_millis()
    );
    let relay = Arc::new(RelayController::new(
        cfg.mqtt.topic.clone(),
        store,
        Forwarder::new(metrics, cfg.min_forward_interval),
    ));

    tracing::info!(
        "mqtt -> {}:{} as {}",
        cfg.mqtt.host,
        cfg.mqtt.port,
        cfg.mqtt.client_id
    );
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(cfg.mqtt.keep_alive);
    if let Some((username, password)) = &cfg.mqtt.credentials {
        opts.set_credentials(username, password);
    }

    if let Some(ca_path) = &cfg.mqtt.ca_path {
        let ca = fs::read(ca_path)
            .await
            .with_context(|| format!("failed to read MQTT_CA_PATH at {}", ca_path.display()))?;
        let client_auth = match &cfg.mqtt.client_auth {
            Some((cert_path, key_path)) => {
                let cert = fs::read(cert_path).await.with_context(|| {
                    format!("failed to read MQTT_CERT_PATH at {}", cert_path.display())
                })?;
                let key = fs::read(key_path).await.with_context(|| {
                    format!("failed to read MQTT_KEY_PATH at {}", key_path.display())
                })?;
                Some((cert, key))
            }
            None => None,
        };
        opts.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }));
        tracing::info!("mqtt tls enabled");
    }

    let (client, mut eventloop) = AsyncClient::new(opts, 32);

    // Messages are handled one at a time, in delivery order.
    let mqtt_relay = Arc::clone(&relay);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    tracing::info!("mqtt connected: {ack:?}");
                    mqtt_relay.on_connect(&client);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    mqtt_relay
                        .on_message(&publish.topic, &publish.payload)
                        .await;
                }
                Ok(Event::Incoming(other)) => {
                    tracing::trace!("mqtt incoming: {other:?}");
                }
                Ok(Event::Outgoing(out)) => {
                    tracing::trace!("mqtt outgoing: {out:?}");
                }
                Err(e) => {
                    tracing::error!("mqtt eventloop error: {e}; retrying in 2s");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    });

    let app = build_router(AppState { relay });
    let addr: SocketAddr = format!("{}:{}", cfg.http_host, cfg.http_port).parse()?;
    tracing::info!("health-relay http listening on http://{addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("health-relay shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
    let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
