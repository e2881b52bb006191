use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::actuator::{Actuator, ActuatorState, LED};
use crate::telemetry::EncodeError;

pub const TURN_ON_PARAM: &str = "turnon";
pub const LED_SENSOR: &str = "led_onboard";
pub const LED_STATUS_PARAM: &str = "ledstat";
pub const DATA_CONFIG_TYPE: &str = "data";

/// Inbound command as sent by the platform on the command topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: String,
    pub param: String,
    pub value: i64,
}

impl CommandMessage {
    pub fn decode(raw: &[u8]) -> Result<Self, CommandError> {
        let doc: Value =
            serde_json::from_slice(raw).map_err(|e| CommandError::Malformed(e.to_string()))?;
        if !doc.is_object() {
            return Err(CommandError::Malformed("command is not a JSON object".into()));
        }
        serde_json::from_value(doc).map_err(|e| CommandError::Malformed(e.to_string()))
    }
}

/// Reply published on the command result topic once a command is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: i32,
    pub id: String,
    pub payload: Vec<ResultRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub sensor: String,
    pub param: String,
    pub configtype: String,
    pub value: i64,
}

impl CommandResult {
    pub fn led_status(id: &str, value: i64) -> Self {
        Self {
            result: 0,
            id: id.to_string(),
            payload: vec![ResultRecord {
                sensor: LED_SENSOR.to_string(),
                param: LED_STATUS_PARAM.to_string(),
                configtype: DATA_CONFIG_TYPE.to_string(),
                value,
            }],
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug)]
pub enum Effect {
    /// Command changed actuator state; the confirmation must be published.
    Applied(Vec<u8>),
    /// Well-formed command with a param this node does not act on.
    Ignored { id: String, param: String },
    Rejected(CommandError),
}

/// Applies inbound commands to the local actuator model.
#[derive(Debug, Clone)]
pub struct CommandDispatcher<A = ActuatorState> {
    actuator: A,
}

impl<A: Actuator> CommandDispatcher<A> {
    pub fn new(actuator: A) -> Self {
        Self { actuator }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn handle(&self, raw: &[u8]) -> Effect {
        let command = match CommandMessage::decode(raw) {
            Ok(command) => command,
            Err(err) => return Effect::Rejected(err),
        };

        // Unrecognised params are a silent no-op, matching deployed firmware.
        // Switch this arm to a rejection if the platform starts expecting one.
        if command.param != TURN_ON_PARAM {
            debug!(id = %command.id, param = %command.param, "Ignoring unrecognised command param");
            return Effect::Ignored {
                id: command.id,
                param: command.param,
            };
        }

        let confirmation = match CommandResult::led_status(&command.id, command.value).encode() {
            Ok(bytes) => bytes,
            Err(err) => return Effect::Rejected(err.into()),
        };
        self.actuator.set_state(LED, command.value);
        Effect::Applied(confirmation)
    }
}
