use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Onboard LED driven by the `turnon` command.
pub const LED: &str = "led";

/// Local output that commands can drive.
pub trait Actuator {
    fn set_state(&self, id: &str, value: i64);
    fn get_state(&self, id: &str) -> Option<i64>;
}

/// Shared actuator values keyed by actuator id.
///
/// Clones share the same map: the command dispatcher writes through one
/// handle while the output loop reads through another.
#[derive(Debug, Clone, Default)]
pub struct ActuatorState {
    values: Arc<RwLock<HashMap<String, i64>>>,
}

impl ActuatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_on(&self, id: &str) -> bool {
        self.get_state(id) == Some(1)
    }
}

impl Actuator for ActuatorState {
    fn set_state(&self, id: &str, value: i64) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), value);
    }

    fn get_state(&self, id: &str) -> Option<i64> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }
}
