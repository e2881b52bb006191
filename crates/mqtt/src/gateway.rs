use iotera_core::{
    ActuatorState, CommandDispatcher, CommandError, Effect, EncodeError, TelemetrySample, TopicSet,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::session::{SessionState, SessionTracker, Transition};
use crate::transport::{MessageId, QoS, Transport, TransportError, TransportEvent};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not connected (session {state:?})")]
    NotConnected { state: SessionState },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    /// Subscribe to the command topic whenever a session starts.
    pub subscribe_commands: bool,
    pub command_qos: QoS,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            subscribe_commands: true,
            command_qos: QoS::AtMostOnce,
        }
    }
}

/// What the gateway did in response to one transport event.
#[derive(Debug)]
pub enum EventOutcome {
    /// New session: the online announcement and command subscription were
    /// requested, in that order. `None` means the request was skipped or failed.
    SessionStarted {
        online: Option<MessageId>,
        command_subscription: Option<MessageId>,
    },
    SessionLost(SessionState),
    Transitioned(Transition),
    Acknowledged(MessageId),
    CommandApplied {
        confirmation: Result<MessageId, GatewayError>,
    },
    CommandIgnored {
        id: String,
        param: String,
    },
    CommandRejected(CommandError),
    Unrouted {
        topic: String,
    },
}

struct Inner<T> {
    tracker: SessionTracker,
    transport: T,
}

impl<T: Transport> Inner<T> {
    fn guard(&self) -> Result<(), GatewayError> {
        let state = self.tracker.state();
        if state.is_usable() {
            Ok(())
        } else {
            Err(GatewayError::NotConnected { state })
        }
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, GatewayError> {
        self.guard()?;
        Ok(self.transport.publish(topic, payload, qos, retain)?)
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<MessageId, GatewayError> {
        self.guard()?;
        Ok(self.transport.subscribe(topic, qos)?)
    }
}

/// Single path between the node and its transport.
///
/// Session state and the transport share one lock, so the usability check
/// and the request it guards can never interleave with a lifecycle event.
pub struct Gateway<T> {
    inner: Mutex<Inner<T>>,
    topics: TopicSet,
    dispatcher: CommandDispatcher,
    options: GatewayOptions,
}

impl<T: Transport> Gateway<T> {
    pub fn new(
        transport: T,
        topics: TopicSet,
        actuators: ActuatorState,
        options: GatewayOptions,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tracker: SessionTracker::new(),
                transport,
            }),
            topics,
            dispatcher: CommandDispatcher::new(actuators),
            options,
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.tracker.state()
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, GatewayError> {
        self.inner.lock().await.publish(topic, payload, qos, retain)
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<MessageId, GatewayError> {
        self.inner.lock().await.subscribe(topic, qos)
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<MessageId, GatewayError> {
        let mut inner = self.inner.lock().await;
        inner.guard()?;
        Ok(inner.transport.unsubscribe(topic)?)
    }

    pub async fn publish_telemetry(
        &self,
        sample: &TelemetrySample,
    ) -> Result<MessageId, GatewayError> {
        let payload = sample.encode()?;
        self.publish(&self.topics.telemetry, payload, QoS::AtLeastOnce, false)
            .await
    }

    /// Kick the transport when the session has dropped. Never publishes.
    pub async fn ensure_connected(&self) -> Result<SessionState, GatewayError> {
        let mut inner = self.inner.lock().await;
        let state = inner.tracker.state();
        if state.needs_reconnect() {
            info!(?state, "MQTT session not usable; requesting reconnect");
            inner.transport.connect()?;
        }
        Ok(state)
    }

    pub async fn handle_event(&self, event: TransportEvent) -> EventOutcome {
        let mut inner = self.inner.lock().await;
        let transition = inner.tracker.apply(&event);
        if transition.changed() {
            debug!(from = ?transition.from, to = ?transition.to, "MQTT session transition");
        }

        match event {
            TransportEvent::Connected if transition.entered_connected() => {
                info!("MQTT connected");
                self.start_session(&mut inner)
            }
            TransportEvent::Connected => EventOutcome::Transitioned(transition),
            TransportEvent::Disconnected | TransportEvent::Error(_) => {
                warn!(state = ?transition.to, "MQTT session lost");
                EventOutcome::SessionLost(transition.to)
            }
            TransportEvent::Subscribed(id) => {
                info!(msg_id = id, "MQTT subscribed");
                EventOutcome::Transitioned(transition)
            }
            TransportEvent::Unsubscribed(id) => {
                info!(msg_id = id, "MQTT unsubscribed");
                EventOutcome::Transitioned(transition)
            }
            TransportEvent::Published(id) => {
                debug!(msg_id = id, "MQTT publish acknowledged");
                EventOutcome::Acknowledged(id)
            }
            TransportEvent::DataReceived { topic, payload } => {
                self.route_inbound(&mut inner, topic, &payload)
            }
        }
    }

    // Announce before subscribing so the broker sees us online before any
    // command traffic is routed to this session.
    fn start_session(&self, inner: &mut Inner<T>) -> EventOutcome {
        let online = match inner.publish(&self.topics.online, Vec::new(), QoS::AtLeastOnce, true) {
            Ok(id) => {
                info!(topic = %self.topics.online, msg_id = id, "Announced online");
                Some(id)
            }
            Err(err) => {
                warn!(?err, topic = %self.topics.online, "Failed to announce online");
                None
            }
        };

        let command_subscription = if self.options.subscribe_commands {
            match inner.subscribe(&self.topics.command, self.options.command_qos) {
                Ok(id) => {
                    info!(topic = %self.topics.command, msg_id = id, "Subscribing to commands");
                    Some(id)
                }
                Err(err) => {
                    warn!(?err, topic = %self.topics.command, "Failed to subscribe to commands");
                    None
                }
            }
        } else {
            None
        };

        EventOutcome::SessionStarted {
            online,
            command_subscription,
        }
    }

    fn route_inbound(&self, inner: &mut Inner<T>, topic: String, payload: &[u8]) -> EventOutcome {
        if topic != self.topics.command {
            debug!(%topic, len = payload.len(), "Ignoring message on unexpected topic");
            return EventOutcome::Unrouted { topic };
        }

        match self.dispatcher.handle(payload) {
            Effect::Applied(confirmation) => {
                let result = inner.publish(
                    &self.topics.command_result,
                    confirmation,
                    QoS::AtLeastOnce,
                    false,
                );
                match &result {
                    Ok(id) => info!(msg_id = id, "Command applied; confirmation sent"),
                    Err(err) => warn!(?err, "Command applied but confirmation not sent"),
                }
                EventOutcome::CommandApplied { confirmation: result }
            }
            Effect::Ignored { id, param } => EventOutcome::CommandIgnored { id, param },
            Effect::Rejected(err) => {
                warn!(%err, "Dropping malformed command");
                EventOutcome::CommandRejected(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, TransportCall};
    use iotera_core::{Actuator, LED};

    const CREDENTIAL: &str = "mqtt_acme_node_1";

    fn gateway(
        options: GatewayOptions,
    ) -> (Gateway<RecordingTransport>, RecordingTransport, ActuatorState) {
        let transport = RecordingTransport::new();
        let actuators = ActuatorState::new();
        let topics = TopicSet::derive(CREDENTIAL).unwrap();
        let gateway = Gateway::new(transport.clone(), topics, actuators.clone(), options);
        (gateway, transport, actuators)
    }

    fn command(payload: &str) -> TransportEvent {
        TransportEvent::DataReceived {
            topic: "iotera/sub/acme/node_1/command".into(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn requests_while_disconnected_never_reach_transport() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());

        let err = gateway
            .publish("any/topic", b"x".to_vec(), QoS::AtLeastOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { state: SessionState::Disconnected }));

        let err = gateway.subscribe("any/topic", QoS::AtMostOnce).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { .. }));

        let err = gateway.unsubscribe("any/topic").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { state: SessionState::Disconnected }));

        let sample = TelemetrySample::new("0001", 1, 2, 3.0);
        assert!(gateway.publish_telemetry(&sample).await.is_err());

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn error_state_blocks_requests() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        gateway.handle_event(TransportEvent::Error("tcp reset".into())).await;
        transport.clear();

        let err = gateway.subscribe("a", QoS::AtMostOnce).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { state: SessionState::Error }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn connect_announces_then_subscribes() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());

        let outcome = gateway.handle_event(TransportEvent::Connected).await;
        assert!(matches!(
            outcome,
            EventOutcome::SessionStarted { online: Some(_), command_subscription: Some(_) }
        ));

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Publish {
                    topic: "iotera/pub/acme/node_1/online".into(),
                    payload: vec![],
                    qos: QoS::AtLeastOnce,
                    retain: true,
                },
                TransportCall::Subscribe {
                    topic: "iotera/sub/acme/node_1/command".into(),
                    qos: QoS::AtMostOnce,
                },
            ]
        );
    }

    #[tokio::test]
    async fn telemetry_only_nodes_skip_command_subscription() {
        let options = GatewayOptions {
            subscribe_commands: false,
            ..GatewayOptions::default()
        };
        let (gateway, transport, _) = gateway(options);

        gateway.handle_event(TransportEvent::Connected).await;
        assert_eq!(transport.publishes_to("iotera/pub/acme/node_1/online").len(), 1);
        assert_eq!(transport.subscriptions_to("iotera/sub/acme/node_1/command"), 0);
    }

    #[tokio::test]
    async fn one_announcement_per_session() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());

        for cycle in 1..=3 {
            gateway.handle_event(TransportEvent::Connected).await;
            gateway.handle_event(TransportEvent::Subscribed(1)).await;
            gateway.handle_event(TransportEvent::Disconnected).await;

            assert_eq!(transport.publishes_to("iotera/pub/acme/node_1/online").len(), cycle);
            assert_eq!(transport.subscriptions_to("iotera/sub/acme/node_1/command"), cycle);
        }

        // A duplicate connect notification inside one session is not a new session.
        gateway.handle_event(TransportEvent::Connected).await;
        let outcome = gateway.handle_event(TransportEvent::Connected).await;
        assert!(matches!(outcome, EventOutcome::Transitioned(_)));
        assert_eq!(transport.publishes_to("iotera/pub/acme/node_1/online").len(), 4);
    }

    #[tokio::test]
    async fn telemetry_goes_to_data_topic_once_connected() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        gateway.handle_event(TransportEvent::Subscribed(2)).await;

        let sample = TelemetrySample::new("0001", 3, 7, 2.5);
        gateway.publish_telemetry(&sample).await.unwrap();

        let sent = transport.publishes_to("iotera/pub/acme/node_1/data");
        assert_eq!(sent, vec![sample.encode().unwrap()]);
    }

    #[tokio::test]
    async fn command_drives_actuator_and_confirms() {
        let (gateway, transport, actuators) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        gateway.handle_event(TransportEvent::Subscribed(2)).await;

        let outcome = gateway
            .handle_event(command(r#"{"id":"42","param":"turnon","value":1}"#))
            .await;
        assert!(matches!(outcome, EventOutcome::CommandApplied { confirmation: Ok(_) }));
        assert_eq!(actuators.get_state(LED), Some(1));

        let replies = transport.publishes_to("iotera/pub/acme/node_1/command_result");
        assert_eq!(replies.len(), 1);
        let reply: serde_json::Value = serde_json::from_slice(&replies[0]).unwrap();
        assert_eq!(reply["id"], "42");
        assert_eq!(reply["payload"][0]["value"], 1);
    }

    #[tokio::test]
    async fn malformed_command_sends_nothing() {
        let (gateway, transport, actuators) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        transport.clear();

        let outcome = gateway.handle_event(command(r#"{"id":"42","value":1}"#)).await;
        assert!(matches!(outcome, EventOutcome::CommandRejected(_)));
        assert!(transport.calls().is_empty());
        assert_eq!(actuators.get_state(LED), None);
    }

    #[tokio::test]
    async fn unknown_param_sends_nothing() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        transport.clear();

        let outcome = gateway
            .handle_event(command(r#"{"id":"9","param":"blink","value":1}"#))
            .await;
        assert!(matches!(outcome, EventOutcome::CommandIgnored { .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn messages_on_other_topics_are_not_dispatched() {
        let (gateway, _, actuators) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;

        let outcome = gateway
            .handle_event(TransportEvent::DataReceived {
                topic: "iotera/sub/acme/other/command".into(),
                payload: br#"{"id":"1","param":"turnon","value":1}"#.to_vec(),
            })
            .await;
        assert!(matches!(outcome, EventOutcome::Unrouted { .. }));
        assert_eq!(actuators.get_state(LED), None);
    }

    #[tokio::test]
    async fn ensure_connected_reconnects_only_when_needed() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());

        assert_eq!(gateway.ensure_connected().await.unwrap(), SessionState::Disconnected);
        assert_eq!(transport.calls(), vec![TransportCall::Connect]);

        gateway.handle_event(TransportEvent::Connected).await;
        transport.clear();
        assert_eq!(gateway.ensure_connected().await.unwrap(), SessionState::Connected);
        assert!(transport.calls().is_empty());

        gateway.handle_event(TransportEvent::Error("timeout".into())).await;
        gateway.ensure_connected().await.unwrap();
        assert_eq!(transport.calls(), vec![TransportCall::Connect]);
    }

    #[tokio::test]
    async fn transport_failures_surface_without_changing_state() {
        let (gateway, transport, _) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        transport.set_failing(true);

        let err = gateway
            .publish("iotera/pub/acme/node_1/data", b"{}".to_vec(), QoS::AtLeastOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(gateway.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn unsubscribe_ack_keeps_session_usable() {
        let (gateway, _, _) = gateway(GatewayOptions::default());
        gateway.handle_event(TransportEvent::Connected).await;
        gateway.handle_event(TransportEvent::Subscribed(1)).await;
        gateway.unsubscribe("iotera/sub/acme/node_1/command").await.unwrap();
        gateway.handle_event(TransportEvent::Unsubscribed(2)).await;

        assert_eq!(gateway.state().await, SessionState::Unsubscribed);
        assert!(gateway
            .publish("iotera/pub/acme/node_1/data", b"{}".to_vec(), QoS::AtLeastOnce, false)
            .await
            .is_ok());
    }
}
