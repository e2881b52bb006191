use std::sync::Arc;

use iotera_mqtt::EventOutcome;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub mqtt_connected: IntGauge,
    pub mqtt_rx_total: IntCounter,
    pub mqtt_tx_total: IntCounter,
    pub telemetry_skipped_total: IntCounter,
    pub commands_total: IntCounterVec, // label: outcome
    pub led_level: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let mqtt_connected =
            IntGauge::new("iotera_mqtt_connected", "MQTT session usable (1) or not (0)")?;
        let mqtt_rx_total = IntCounter::new(
            "iotera_mqtt_messages_received_total",
            "Total MQTT messages received",
        )?;
        let mqtt_tx_total = IntCounter::new(
            "iotera_mqtt_messages_published_total",
            "Total MQTT messages handed to the transport",
        )?;
        let telemetry_skipped_total = IntCounter::new(
            "iotera_telemetry_skipped_total",
            "Telemetry samples not published: session unusable or request refused",
        )?;
        let commands_total = IntCounterVec::new(
            Opts::new("iotera_commands_total", "Inbound commands by outcome"),
            &["outcome"],
        )?;
        let led_level = IntGauge::new("iotera_led_level", "Current onboard LED level")?;

        let registry = Registry::new();
        registry.register(Box::new(mqtt_connected.clone()))?;
        registry.register(Box::new(mqtt_rx_total.clone()))?;
        registry.register(Box::new(mqtt_tx_total.clone()))?;
        registry.register(Box::new(telemetry_skipped_total.clone()))?;
        registry.register(Box::new(commands_total.clone()))?;
        registry.register(Box::new(led_level.clone()))?;

        Ok(Arc::new(Self {
            registry,
            mqtt_connected,
            mqtt_rx_total,
            mqtt_tx_total,
            telemetry_skipped_total,
            commands_total,
            led_level,
        }))
    }

    pub fn observe(&self, outcome: &EventOutcome) {
        match outcome {
            EventOutcome::SessionStarted { online, command_subscription: _ } => {
                self.mqtt_connected.set(1);
                if online.is_some() {
                    self.mqtt_tx_total.inc();
                }
            }
            EventOutcome::SessionLost(_) => self.mqtt_connected.set(0),
            EventOutcome::CommandApplied { confirmation } => {
                self.commands_total.with_label_values(&["applied"]).inc();
                if confirmation.is_ok() {
                    self.mqtt_tx_total.inc();
                }
            }
            EventOutcome::CommandIgnored { .. } => {
                self.commands_total.with_label_values(&["ignored"]).inc();
            }
            EventOutcome::CommandRejected(_) => {
                self.commands_total.with_label_values(&["rejected"]).inc();
            }
            EventOutcome::Transitioned(_)
            | EventOutcome::Acknowledged(_)
            | EventOutcome::Unrouted { .. } => {}
        }
    }

    pub fn render(&self) -> Result<(String, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        let body = String::from_utf8_lossy(&buf).into_owned();
        Ok((encoder.format_type().to_string(), body))
    }
}
