use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use dotenvy::dotenv;
use iotera_core::{ActuatorState, TopicSet};
use iotera_mqtt::{spawn_transport, Gateway, GatewayOptions, MqttTransport};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod devices;
mod metrics;
mod services;

use config::NodeConfig;
use devices::{BatteryModel, NodeSensor, PulseCounters};
use metrics::Metrics;

const BATTERY_DRAIN_PER_READ: f32 = 0.001;

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway<MqttTransport>>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let cfg = NodeConfig::from_env()?;
    let credential = cfg.mqtt.credential()?;
    let topics = TopicSet::derive(credential).context("Invalid MQTT credential")?;
    info!(
        host = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        telemetry = %topics.telemetry,
        command = %topics.command,
        "Configuring MQTT client"
    );

    let connection = spawn_transport(&cfg.mqtt, &topics)?;
    let actuators = ActuatorState::new();
    let gateway = Arc::new(Gateway::new(
        connection.transport,
        topics,
        actuators.clone(),
        GatewayOptions {
            subscribe_commands: cfg.subscribe_commands,
            ..GatewayOptions::default()
        },
    ));
    let metrics = Metrics::new()?;

    let counters = Arc::new(PulseCounters::default());
    let sensor = Arc::new(NodeSensor::new(
        counters.clone(),
        BatteryModel::new(cfg.initial_battery, BATTERY_DRAIN_PER_READ),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        tokio::spawn(services::event_loop(
            gateway.clone(),
            connection.events,
            metrics.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(services::telemetry_loop(
            gateway.clone(),
            sensor,
            cfg.device_id.clone(),
            cfg.telemetry,
            metrics.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(services::led_loop(
            actuators,
            metrics.clone(),
            services::LED_PERIOD,
            shutdown_rx.clone(),
        )),
    ];
    if let Some(period) = cfg.pulse_interval {
        info!(period_ms = period.as_millis() as u64, "Simulating pulse input");
        tasks.push(tokio::spawn(services::pulse_simulation_loop(
            counters,
            period,
            shutdown_rx.clone(),
        )));
    }

    let state = AppState { gateway, metrics };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.http_addr))?;
    info!(addr = %cfg.http_addr, "Starting HTTP server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    connection.task.abort();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rumqttc=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(?err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn healthz() -> &'static str { "ok" }

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.gateway.state().await.is_usable() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok((content_type, body)) => ([(CONTENT_TYPE, content_type)], body).into_response(),
        Err(err) => {
            tracing::warn!(?err, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
