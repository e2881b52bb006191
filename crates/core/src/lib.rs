pub mod actuator;
pub mod commands;
pub mod telemetry;
pub mod topics;

pub use actuator::{Actuator, ActuatorState, LED};
pub use commands::{CommandDispatcher, CommandError, CommandMessage, CommandResult, Effect};
pub use telemetry::{Channel, EncodeError, Sensor, TelemetrySample};
pub use topics::{ParseError, TopicLimits, TopicSet};
