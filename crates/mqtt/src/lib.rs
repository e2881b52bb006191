pub mod client;
pub mod config;
pub mod gateway;
pub mod session;
pub mod testing;
pub mod transport;

pub use client::{spawn_transport, MqttConnection, MqttTransport};
pub use config::{ConfigError, MqttConfig};
pub use gateway::{EventOutcome, Gateway, GatewayError, GatewayOptions};
pub use session::{SessionState, SessionTracker, Transition};
pub use transport::{MessageId, QoS, Transport, TransportError, TransportEvent};
