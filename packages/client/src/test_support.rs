//! Test doubles shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};

use crate::credential::Credential;
use crate::domain::{Message, MessageId, UserId, UserProfile};
use crate::error::TransportError;
use crate::infrastructure::dto::websocket::{ClientEvent, ServerEvent};
use crate::sync::lock;
use crate::transport::{Connector, DisconnectReason, Inbound, Link};

pub(crate) fn credential() -> Credential {
    Credential::parse("test-token").expect("valid test credential")
}

pub(crate) fn user(id: &str) -> UserId {
    UserId::new(id).expect("valid test user id")
}

pub(crate) fn profile(id: &str, first: &str, last: &str) -> UserProfile {
    UserProfile::new(user(id), first, last)
}

pub(crate) fn delivered(id: &str, from: &str, to: &str, content: &str) -> Message {
    Message::delivered(
        MessageId::new(id).expect("valid test message id"),
        user(from),
        user(to),
        content,
        chrono::Utc::now(),
    )
}

/// Result of one scripted handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeOutcome {
    Accept,
    /// Handshake fails with a transport error
    Refuse,
    /// Handshake is rejected with 401
    Unauthorized,
}

/// Server side of a channel opened by [`FakeConnector`]
pub(crate) struct FakeRemote {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
}

impl FakeRemote {
    pub(crate) fn push(&self, event: ServerEvent) {
        let _ = self.to_client.send(Inbound::Event(event));
    }

    pub(crate) fn close(&self, reason: DisconnectReason) {
        let _ = self.to_client.send(Inbound::Closed(reason));
    }

    pub(crate) async fn next_event(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    /// Everything the client has emitted so far.
    pub(crate) fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.from_client.try_recv() {
            events.push(event);
        }
        events
    }
}

/// In-memory [`Connector`] with scripted handshake outcomes
pub(crate) struct FakeConnector {
    script: Mutex<VecDeque<FakeOutcome>>,
    latency: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<Instant>>,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

impl FakeConnector {
    /// Connector that accepts every handshake unless scripted otherwise,
    /// and the stream of remotes for the channels it opens.
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, receiver) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            remotes,
        });
        (connector, receiver)
    }

    /// Queue outcomes for the next handshakes; later ones accept.
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = FakeOutcome>) {
        lock(&self.script).extend(outcomes);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    pub(crate) fn attempt_count(&self) -> usize {
        lock(&self.attempts).len()
    }

    /// Instants at which handshakes started
    pub(crate) fn attempts(&self) -> Vec<Instant> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _credential: &Credential) -> Result<Link, TransportError> {
        lock(&self.attempts).push(Instant::now());
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or(FakeOutcome::Accept);
        match outcome {
            FakeOutcome::Accept => {
                let (outbound, from_client) = mpsc::unbounded_channel();
                let (to_client, inbound) = mpsc::unbounded_channel();
                let _ = self.remotes.send(FakeRemote {
                    to_client,
                    from_client,
                });
                Ok(Link {
                    outbound,
                    inbound,
                    io_task: None,
                })
            }
            FakeOutcome::Refuse => Err(TransportError::Handshake("connection refused".to_string())),
            FakeOutcome::Unauthorized => Err(TransportError::Unauthorized(401)),
        }
    }
}
