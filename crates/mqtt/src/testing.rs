//! In-memory transport for exercising the gateway without a broker.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::transport::{MessageId, QoS, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Records every request it receives. Clones share the same log, so a test
/// can keep one handle while the gateway owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    failing: Arc<AtomicBool>,
    next_id: Arc<AtomicU16>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent request fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.log().clone()
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    pub fn publishes_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.log()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic: t, payload, .. } if t == topic => {
                    Some(payload.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn subscriptions_to(&self, topic: &str) -> usize {
        self.log()
            .iter()
            .filter(|call| matches!(call, TransportCall::Subscribe { topic: t, .. } if t == topic))
            .count()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<TransportCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: TransportCall) -> Result<MessageId, TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Other("recording transport set to fail".into()));
        }
        self.log().push(call);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).wrapping_add(1))
    }
}

impl Transport for RecordingTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Connect).map(|_| ())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError> {
        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        })
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<MessageId, TransportError> {
        self.record(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<MessageId, TransportError> {
        self.record(TransportCall::Unsubscribe {
            topic: topic.to_string(),
        })
    }
}
