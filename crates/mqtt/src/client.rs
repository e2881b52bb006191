use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use iotera_core::TopicSet;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, MqttConfig};
use crate::transport::{MessageId, Transport, TransportError, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MAX_INFLIGHT: u16 = 100;
const MAX_BACKOFF_SECS: u64 = 30;

/// Packet id allocation matching rumqttc's own, so the ids handed back for
/// requests are the pkids their acks carry.
///
/// rumqttc takes requests off its channel in order and numbers QoS>0
/// publishes, subscribes and unsubscribes from 1 up to the inflight limit.
#[derive(Debug)]
struct PacketIds {
    last: u16,
    max_inflight: u16,
}

impl PacketIds {
    fn new(max_inflight: u16) -> Self {
        Self { last: 0, max_inflight }
    }

    fn next(&mut self) -> MessageId {
        let next = self.last + 1;
        if next == self.max_inflight {
            self.last = 0;
            return next;
        }
        self.last = next;
        next
    }
}

/// The live client and the id sequence of the event loop it feeds.
/// Both are replaced together whenever the event loop is rebuilt.
struct Session {
    client: AsyncClient,
    ids: PacketIds,
}

/// rumqttc-backed transport. Requests go straight into the client's queue;
/// the background event loop reports what the broker did with them.
pub struct MqttTransport {
    session: Arc<Mutex<Session>>,
    reconnect: Arc<Notify>,
}

/// Running connection: the transport, its event stream, and the task polling rumqttc.
pub struct MqttConnection {
    pub transport: MqttTransport,
    pub events: mpsc::Receiver<TransportEvent>,
    pub task: JoinHandle<()>,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        // The event loop reconnects on its own; this only cuts the backoff short.
        self.reconnect.notify_one();
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError> {
        let mut session = lock(&self.session);
        session.client.try_publish(topic, qos, retain, payload)?;
        Ok(match qos {
            QoS::AtMostOnce => 0,
            _ => session.ids.next(),
        })
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<MessageId, TransportError> {
        let mut session = lock(&self.session);
        session.client.try_subscribe(topic, qos)?;
        Ok(session.ids.next())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<MessageId, TransportError> {
        let mut session = lock(&self.session);
        session.client.try_unsubscribe(topic)?;
        Ok(session.ids.next())
    }
}

/// Builds the client and starts polling it. Must be called inside a tokio runtime.
pub fn spawn_transport(
    config: &MqttConfig,
    topics: &TopicSet,
) -> Result<MqttConnection, ConfigError> {
    let (client, eventloop) = build_client(config, topics)?;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let reconnect = Arc::new(Notify::new());
    let session = Arc::new(Mutex::new(Session {
        client,
        ids: PacketIds::new(MAX_INFLIGHT),
    }));

    let task = tokio::spawn(run_eventloop(
        eventloop,
        session.clone(),
        tx,
        reconnect.clone(),
        config.clone(),
        topics.clone(),
    ));

    Ok(MqttConnection {
        transport: MqttTransport { session, reconnect },
        events: rx,
        task,
    })
}

fn build_client(
    config: &MqttConfig,
    topics: &TopicSet,
) -> Result<(AsyncClient, EventLoop), ConfigError> {
    let credential = config.credential()?;
    let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    // Username-only login when no password is configured.
    match &config.password {
        Some(password) => opts.set_credentials(credential, password.clone()),
        None => opts.set_credentials(credential, String::new()),
    };
    // Broker publishes an empty message on `offline` if we vanish uncleanly.
    opts.set_last_will(LastWill::new(
        &topics.offline,
        Vec::<u8>::new(),
        QoS::AtLeastOnce,
        false,
    ));
    opts.set_inflight(MAX_INFLIGHT);
    opts.set_request_channel_capacity(REQUEST_CHANNEL_CAPACITY);
    Ok(AsyncClient::new(opts, REQUEST_CHANNEL_CAPACITY))
}

async fn run_eventloop(
    mut eventloop: EventLoop,
    session: Arc<Mutex<Session>>,
    events_tx: mpsc::Sender<TransportEvent>,
    reconnect: Arc<Notify>,
    config: MqttConfig,
    topics: TopicSet,
) {
    let mut backoff_secs = 1u64;
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("MQTT connected");
                backoff_secs = 1;
                TransportEvent::Connected
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => TransportEvent::DataReceived {
                topic: p.topic.to_string(),
                payload: p.payload.to_vec(),
            },
            Ok(Event::Incoming(Incoming::PubAck(ack))) => TransportEvent::Published(ack.pkid),
            Ok(Event::Incoming(Incoming::SubAck(ack))) => TransportEvent::Subscribed(ack.pkid),
            Ok(Event::Incoming(Incoming::UnsubAck(ack))) => {
                TransportEvent::Unsubscribed(ack.pkid)
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                warn!("MQTT disconnect requested");
                TransportEvent::Disconnected
            }
            Ok(other) => {
                debug!(?other, "MQTT event");
                continue;
            }
            Err(e) => {
                error!(error = ?e, "MQTT error; will attempt reconnect");
                if events_tx.send(TransportEvent::Error(e.to_string())).await.is_err() {
                    break;
                }

                let wait = backoff_secs.min(MAX_BACKOFF_SECS);
                tokio::select! {
                    _ = sleep(Duration::from_secs(wait)) => {}
                    _ = reconnect.notified() => debug!("Reconnect requested; skipping backoff"),
                }
                backoff_secs = (backoff_secs * 2).min(60);

                // A fresh client and event loop drop whatever the old session still
                // held: unacked publishes and requests queued behind the failure.
                match build_client(&config, &topics) {
                    Ok((client, new_eventloop)) => {
                        eventloop = new_eventloop;
                        *lock(&session) = Session {
                            client,
                            ids: PacketIds::new(MAX_INFLIGHT),
                        };
                        info!("MQTT client and eventloop rebuilt, attempting reconnection");
                    }
                    Err(err) => error!(?err, "Failed to rebuild MQTT client; retrying"),
                }
                continue;
            }
        };

        if events_tx.send(event).await.is_err() {
            break;
        }
    }
    info!("MQTT event receiver dropped; event loop stopped");
}
