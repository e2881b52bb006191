use serde::Serialize;
use thiserror::Error;

pub const NODE_SENSOR: &str = "wifi_node";
pub const PULSE_COUNTER_PARAM: &str = "pulse_counter";
pub const BATTERY_PARAM: &str = "battery";

pub const BATTERY_MIN: f32 = 0.0;
pub const BATTERY_MAX: f32 = 5.0;

#[derive(Debug, Error)]
#[error("failed to encode payload: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ch1,
    Ch2,
}

/// Source of the readings carried in a telemetry sample.
pub trait Sensor {
    /// Pulse count seen on `channel` since boot.
    fn read_counter(&self, channel: Channel) -> u32;
    /// Battery voltage, expected in `0.0..=5.0`.
    fn read_battery(&self) -> f32;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub device_id: String,
    pub ch1: u32,
    pub ch2: u32,
    pub battery: f32,
}

impl TelemetrySample {
    pub fn new(device_id: impl Into<String>, ch1: u32, ch2: u32, battery: f32) -> Self {
        Self {
            device_id: device_id.into(),
            ch1,
            ch2,
            battery: clamp_battery(battery),
        }
    }

    pub fn collect<S: Sensor + ?Sized>(device_id: impl Into<String>, sensor: &S) -> Self {
        Self::new(
            device_id,
            sensor.read_counter(Channel::Ch1),
            sensor.read_counter(Channel::Ch2),
            sensor.read_battery(),
        )
    }

    /// Serializes the sample into the platform's two-record envelope.
    ///
    /// Field order is fixed by the struct layout below; the platform reads
    /// the records positionally.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let envelope = Envelope {
            payload: (
                Reading {
                    sensor: NODE_SENSOR,
                    param: PULSE_COUNTER_PARAM,
                    value: PulseCounter {
                        id: &self.device_id,
                        ch1: self.ch1,
                        ch2: self.ch2,
                    },
                },
                Reading {
                    sensor: NODE_SENSOR,
                    param: BATTERY_PARAM,
                    value: self.battery,
                },
            ),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

fn clamp_battery(value: f32) -> f32 {
    if value.is_nan() {
        BATTERY_MIN
    } else {
        value.clamp(BATTERY_MIN, BATTERY_MAX)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    payload: (Reading<'a, PulseCounter<'a>>, Reading<'a, f32>),
}

#[derive(Serialize)]
struct Reading<'a, V> {
    sensor: &'a str,
    param: &'a str,
    value: V,
}

#[derive(Serialize)]
struct PulseCounter<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "CH1")]
    ch1: u32,
    #[serde(rename = "CH2")]
    ch2: u32,
}
