use thiserror::Error;

pub use rumqttc::QoS;

/// Identifier handed back for a request and echoed by its ack.
pub type MessageId = u16;

/// Lifecycle and data notifications delivered by the transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Subscribed(MessageId),
    Unsubscribed(MessageId),
    Published(MessageId),
    DataReceived { topic: String, payload: Vec<u8> },
    Error(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport rejected request: {0}")]
    Request(#[from] rumqttc::ClientError),
    #[error("transport failure: {0}")]
    Other(String),
}

/// Outbound half of a broker connection.
///
/// Every call only queues a request and returns immediately; the outcome
/// arrives later as a [`TransportEvent`].
pub trait Transport: Send {
    /// Ask for a (re)connection attempt as soon as possible.
    fn connect(&mut self) -> Result<(), TransportError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<MessageId, TransportError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<MessageId, TransportError>;
}
