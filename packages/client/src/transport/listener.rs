//! Listener registry for channel events.
//!
//! The registry lives in the [`super::ConnectionManager`] rather than in a
//! channel instance, so subscriptions survive reconnects and a component that
//! subscribes once keeps receiving events from every future channel.

use std::{
    collections::HashSet,
    fmt,
    sync::{Mutex, Weak},
};

use tokio::sync::mpsc;

use crate::infrastructure::dto::websocket::ServerEvent;
use crate::sync::lock;

use super::DisconnectReason;

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake succeeded and the channel is open
    Connected,
    /// The channel was lost
    Disconnected(DisconnectReason),
    /// Server rejected the credential on an open channel
    AuthError(String),
    /// Any other server-pushed event
    Server(ServerEvent),
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Connected => EventKind::Connected,
            ChannelEvent::Disconnected(_) => EventKind::Disconnected,
            ChannelEvent::AuthError(_) => EventKind::AuthError,
            ChannelEvent::Server(event) => match event {
                ServerEvent::NewMessage(_) => EventKind::NewMessage,
                ServerEvent::MessageDelivered(_) => EventKind::MessageDelivered,
                ServerEvent::UserTyping(_) => EventKind::UserTyping,
                ServerEvent::UserStoppedTyping(_) => EventKind::UserStoppedTyping,
                ServerEvent::UserOnline(_) => EventKind::UserOnline,
                ServerEvent::UserOffline(_) => EventKind::UserOffline,
                ServerEvent::AuthError(_) => EventKind::AuthError,
            },
        }
    }
}

/// Event names a subscriber can filter on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    AuthError,
    NewMessage,
    MessageDelivered,
    UserTyping,
    UserStoppedTyping,
    UserOnline,
    UserOffline,
}

/// Identifier of a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Listener {
    id: SubscriptionId,
    kinds: HashSet<EventKind>,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

/// Registered listeners, each with its own event queue
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Listener>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kinds: &[EventKind],
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.push(Listener {
            id,
            kinds: kinds.iter().copied().collect(),
            sender,
        });
        tracing::debug!("Listener {} registered for {:?}", id, kinds);
        (id, receiver)
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        let removed = self.listeners.len() != before;
        if removed {
            tracing::debug!("Listener {} unregistered", id);
        }
        removed
    }

    /// Deliver `event` to every listener interested in its kind.
    ///
    /// Listeners whose receiver is gone are dropped.
    pub fn dispatch(&mut self, event: &ChannelEvent) {
        let kind = event.kind();
        self.listeners.retain(|listener| {
            if !listener.kinds.contains(&kind) {
                return !listener.sender.is_closed();
            }
            listener.sender.send(event.clone()).is_ok()
        });
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Receiving end of a listener; dropping it unregisters the listener.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ChannelEvent>,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: mpsc::UnboundedReceiver<ChannelEvent>,
        registry: Weak<Mutex<ListenerRegistry>>,
    ) -> Self {
        Self {
            id,
            receiver,
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the listener has been unregistered.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).unregister(self.id);
        }
    }
}
