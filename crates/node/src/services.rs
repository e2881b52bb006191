use std::sync::Arc;
use std::time::Duration;

use iotera_core::{ActuatorState, Channel, Sensor, TelemetrySample, LED};
use iotera_mqtt::{Gateway, GatewayError, Transport, TransportEvent};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::TelemetrySchedule;
use crate::devices::{LedDriver, PulseCounters};
use crate::metrics::Metrics;

pub const LED_PERIOD: Duration = Duration::from_secs(1);

/// Waits for `duration`; returns `true` if shutdown was signalled first.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

// ----- Transport events -> gateway -----

pub async fn event_loop<T: Transport>(
    gateway: Arc<Gateway<T>>,
    mut events: mpsc::Receiver<TransportEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("Transport event stream closed");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };

        if let TransportEvent::DataReceived { topic, payload } = &event {
            metrics.mqtt_rx_total.inc();
            debug!(%topic, len = payload.len(), "MQTT message received");
        }
        let outcome = gateway.handle_event(event).await;
        metrics.observe(&outcome);
    }
    debug!("Event loop stopped");
}

// ----- Periodic telemetry -----

pub async fn telemetry_loop<T: Transport, S: Sensor + ?Sized>(
    gateway: Arc<Gateway<T>>,
    sensor: Arc<S>,
    device_id: String,
    schedule: TelemetrySchedule,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = schedule.interval.as_secs(), "Telemetry loop started");
    loop {
        let sample = TelemetrySample::collect(device_id.as_str(), sensor.as_ref());
        debug!(ch1 = sample.ch1, ch2 = sample.ch2, battery = sample.battery, "Sampled sensors");
        if pause(schedule.measure_delay, &mut shutdown).await {
            break;
        }

        send_sample(&gateway, &sample, &metrics).await;

        if pause(schedule.publish_delay, &mut shutdown).await {
            break;
        }
        if pause(schedule.interval, &mut shutdown).await {
            break;
        }
    }
    info!("Telemetry loop stopped");
}

async fn send_sample<T: Transport>(
    gateway: &Gateway<T>,
    sample: &TelemetrySample,
    metrics: &Metrics,
) {
    if let Err(err) = gateway.ensure_connected().await {
        warn!(?err, "Reconnect request failed");
    }

    match gateway.publish_telemetry(sample).await {
        Ok(msg_id) => {
            metrics.mqtt_tx_total.inc();
            info!(msg_id, "Telemetry published");
        }
        Err(GatewayError::NotConnected { state }) => {
            metrics.telemetry_skipped_total.inc();
            info!(?state, "MQTT not connected; telemetry deferred to next tick");
        }
        Err(err) => {
            metrics.telemetry_skipped_total.inc();
            warn!(?err, "Telemetry publish failed");
        }
    }
}

// ----- Actuator output -----

pub async fn led_loop(
    actuators: ActuatorState,
    metrics: Arc<Metrics>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut led = LedDriver::default();
    let mut last = None;
    loop {
        let level = led.step(actuators.is_on(LED));
        if last != Some(level) {
            debug!(level, "Driving LED");
            last = Some(level);
        }
        metrics.led_level.set(level as i64);

        if pause(period, &mut shutdown).await {
            break;
        }
    }
}

// ----- Simulated pulse input -----

/// Counts a pulse on CH1 every period and on CH2 every other period.
pub async fn pulse_simulation_loop(
    counters: Arc<PulseCounters>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = 0u64;
    while !pause(period, &mut shutdown).await {
        tick += 1;
        counters.record(Channel::Ch1);
        if tick % 2 == 0 {
            counters.record(Channel::Ch2);
        }
    }
}
