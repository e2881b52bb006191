use crate::transport::{MessageId, TransportEvent};

/// Broker session lifecycle as seen by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
    Subscribed,
    Unsubscribed,
    Error,
}

impl SessionState {
    /// Whether publish/subscribe requests may be handed to the transport.
    pub fn is_usable(self) -> bool {
        !self.needs_reconnect()
    }

    pub fn needs_reconnect(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// A fresh session: the tracker moved into `Connected` from anything else.
    pub fn entered_connected(&self) -> bool {
        self.to == SessionState::Connected && self.from != SessionState::Connected
    }
}

/// Owns the session state; only transport events move it.
#[derive(Debug, Default)]
pub struct SessionTracker {
    state: SessionState,
    last_ack: Option<MessageId>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id carried by the most recent publish ack.
    pub fn last_ack(&self) -> Option<MessageId> {
        self.last_ack
    }

    pub fn apply(&mut self, event: &TransportEvent) -> Transition {
        use SessionState::*;

        let from = self.state;
        let to = match (event, from) {
            (TransportEvent::Connected, _) => Connected,
            (TransportEvent::Disconnected, _) => Disconnected,
            (TransportEvent::Error(_), _) => Error,
            (TransportEvent::Subscribed(_), Connected | Unsubscribed) => Subscribed,
            (TransportEvent::Unsubscribed(_), Subscribed) => Unsubscribed,
            (TransportEvent::Published(id), _) => {
                self.last_ack = Some(*id);
                from
            }
            _ => from,
        };
        self.state = to;
        Transition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::SessionState::*;

    fn tracker_in(events: &[TransportEvent]) -> SessionTracker {
        let mut tracker = SessionTracker::new();
        for event in events {
            tracker.apply(event);
        }
        tracker
    }

    #[test]
    fn starts_disconnected_and_unusable() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.state(), Disconnected);
        assert!(!tracker.state().is_usable());
        assert!(tracker.state().needs_reconnect());
    }

    #[test]
    fn follows_lifecycle_table() {
        let mut tracker = SessionTracker::new();

        let t = tracker.apply(&TransportEvent::Connected);
        assert_eq!(t, Transition { from: Disconnected, to: Connected });
        assert!(t.entered_connected());

        let t = tracker.apply(&TransportEvent::Subscribed(4));
        assert_eq!(t.to, Subscribed);

        let t = tracker.apply(&TransportEvent::Published(9));
        assert!(!t.changed());
        assert_eq!(tracker.last_ack(), Some(9));

        let t = tracker.apply(&TransportEvent::DataReceived {
            topic: "t".into(),
            payload: vec![],
        });
        assert!(!t.changed());

        assert_eq!(tracker.apply(&TransportEvent::Unsubscribed(5)).to, Unsubscribed);
        assert!(tracker.state().is_usable());

        assert_eq!(tracker.apply(&TransportEvent::Error("io".into())).to, Error);
        assert!(tracker.state().needs_reconnect());

        assert_eq!(tracker.apply(&TransportEvent::Disconnected).to, Disconnected);
    }

    #[test]
    fn acks_outside_their_source_state_are_ignored() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.apply(&TransportEvent::Subscribed(1)).to, Disconnected);

        let mut tracker = tracker_in(&[TransportEvent::Connected]);
        assert_eq!(tracker.apply(&TransportEvent::Unsubscribed(1)).to, Connected);

        let mut tracker = tracker_in(&[TransportEvent::Error("boom".into())]);
        assert_eq!(tracker.apply(&TransportEvent::Subscribed(1)).to, Error);
    }

    #[test]
    fn tolerates_reconnect_cycles() {
        let mut tracker = SessionTracker::new();
        for _ in 0..5 {
            assert!(tracker.apply(&TransportEvent::Connected).entered_connected());
            tracker.apply(&TransportEvent::Subscribed(1));
            tracker.apply(&TransportEvent::Disconnected);
        }
        assert_eq!(tracker.state(), Disconnected);
    }

    #[test]
    fn repeated_connected_is_not_a_new_entry() {
        let mut tracker = tracker_in(&[TransportEvent::Connected]);
        assert!(!tracker.apply(&TransportEvent::Connected).entered_connected());

        let mut tracker = tracker_in(&[TransportEvent::Connected, TransportEvent::Subscribed(2)]);
        assert!(tracker.apply(&TransportEvent::Connected).entered_connected());
    }
}
