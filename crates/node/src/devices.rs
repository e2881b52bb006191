// Host-side stand-ins for the node's pulse inputs, battery and onboard LED.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use iotera_core::telemetry::{BATTERY_MAX, BATTERY_MIN};
use iotera_core::{Channel, Sensor};

#[derive(Debug, Default)]
pub struct PulseCounters {
    ch1: AtomicU32,
    ch2: AtomicU32,
}

impl PulseCounters {
    pub fn record(&self, channel: Channel) {
        self.counter(channel).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, channel: Channel) -> u32 {
        self.counter(channel).load(Ordering::Relaxed)
    }

    fn counter(&self, channel: Channel) -> &AtomicU32 {
        match channel {
            Channel::Ch1 => &self.ch1,
            Channel::Ch2 => &self.ch2,
        }
    }
}

/// Battery that loses a fixed amount of charge per reading.
#[derive(Debug)]
pub struct BatteryModel {
    // f32 bits, so reads stay lock-free.
    level: AtomicU32,
    drain_per_read: f32,
}

impl BatteryModel {
    pub fn new(initial: f32, drain_per_read: f32) -> Self {
        Self {
            level: AtomicU32::new(initial.clamp(BATTERY_MIN, BATTERY_MAX).to_bits()),
            drain_per_read,
        }
    }

    pub fn read(&self) -> f32 {
        let mut current = self.level.load(Ordering::Relaxed);
        loop {
            let level = f32::from_bits(current);
            let next = (level - self.drain_per_read).max(BATTERY_MIN);
            match self.level.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return level,
                Err(actual) => current = actual,
            }
        }
    }
}

pub struct NodeSensor {
    counters: Arc<PulseCounters>,
    battery: BatteryModel,
}

impl NodeSensor {
    pub fn new(counters: Arc<PulseCounters>, battery: BatteryModel) -> Self {
        Self { counters, battery }
    }
}

impl Sensor for NodeSensor {
    fn read_counter(&self, channel: Channel) -> u32 {
        self.counters.get(channel)
    }

    fn read_battery(&self) -> f32 {
        self.battery.read()
    }
}

/// Blinks while enabled, held low otherwise.
#[derive(Debug, Default)]
pub struct LedDriver {
    blink_state: bool,
}

impl LedDriver {
    /// Level to drive for the current tick.
    pub fn step(&mut self, enabled: bool) -> bool {
        if !enabled {
            return false;
        }
        let level = self.blink_state;
        self.blink_state = !self.blink_state;
        level
    }
}
