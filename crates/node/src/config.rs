use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use iotera_mqtt::MqttConfig;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub mqtt: MqttConfig,
    /// Id embedded in every telemetry record.
    pub device_id: String,
    pub subscribe_commands: bool,
    pub telemetry: TelemetrySchedule,
    pub http_addr: SocketAddr,
    pub initial_battery: f32,
    /// When set, synthetic pulses are counted at this period.
    pub pulse_interval: Option<Duration>,
}

/// Pacing of one telemetry cycle: measure, settle, publish, settle, idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySchedule {
    pub measure_delay: Duration,
    pub publish_delay: Duration,
    pub interval: Duration,
}

impl Default for TelemetrySchedule {
    fn default() -> Self {
        Self {
            measure_delay: Duration::from_secs(1),
            publish_delay: Duration::from_secs(1),
            interval: Duration::from_secs(60),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mqtt = MqttConfig::from_lookup(&lookup);

        let device_id = lookup("IOTERA_DEVICE_ID")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "0001".to_string());

        let subscribe_commands = match lookup("IOTERA_SUBSCRIBE_COMMANDS") {
            Some(v) => parse_flag(&v)
                .with_context(|| format!("Invalid IOTERA_SUBSCRIBE_COMMANDS: {v}"))?,
            None => true,
        };

        let mut telemetry = TelemetrySchedule::default();
        if let Some(v) = lookup("IOTERA_TELEMETRY_INTERVAL_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                telemetry.interval = Duration::from_secs(s);
            }
        }

        let http_addr = lookup("IOTERA_HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .context("Invalid IOTERA_HTTP_ADDR")?;

        let initial_battery = lookup("IOTERA_INITIAL_BATTERY")
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(4.2);

        let pulse_interval = lookup("IOTERA_PULSE_INTERVAL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            mqtt,
            device_id,
            subscribe_commands,
            telemetry,
            http_addr,
            initial_battery,
            pulse_interval,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
