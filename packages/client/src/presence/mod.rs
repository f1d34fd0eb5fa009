//! Connection lifecycle and peer presence.
//!
//! [`PresenceController`] wraps the [`ConnectionManager`] with the retry and
//! backoff policy and tracks which peers are online. A single actor task owns
//! the state machine; commands from the public API, timer and attempt notices,
//! and channel events are all handled there one at a time.

pub mod policy;

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::credential::{Credential, TokenResolver};
use crate::domain::{ConnectionState, ConnectionStatus, FailureReason, PeerPresenceSet, UserId};
use crate::error::TransportError;
use crate::infrastructure::dto::websocket::ServerEvent;
use crate::sync::{read, write};
use crate::transport::{ChannelEvent, ConnectionManager, DisconnectReason, EventKind, Subscription};

pub use policy::{BACKOFF_BASE, MAX_CONNECT_ATTEMPTS, RECOVERY_DELAY, ReconnectPolicy};

/// Channel events the controller reacts to
const PRESENCE_EVENTS: [EventKind; 5] = [
    EventKind::Connected,
    EventKind::Disconnected,
    EventKind::AuthError,
    EventKind::UserOnline,
    EventKind::UserOffline,
];

enum Command {
    Connect {
        credential: Option<Credential>,
        manual: bool,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Internal notifications; `epoch` identifies the cycle that produced them
enum Notice {
    Attempted {
        epoch: u64,
        attempt: u32,
        result: Result<(), TransportError>,
    },
    RetryDue {
        epoch: u64,
        attempt: u32,
    },
}

/// Snapshot for troubleshooting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub credential_present: bool,
    pub channel_open: bool,
    pub state: ConnectionState,
    pub attempt: Option<u32>,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub online_count: usize,
    pub listener_count: usize,
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "credential present: {}", self.credential_present)?;
        writeln!(f, "channel open:       {}", self.channel_open)?;
        writeln!(f, "state:              {:?}", self.state)?;
        match self.attempt {
            Some(attempt) => writeln!(f, "attempt:            {}/{}", attempt, self.max_attempts)?,
            None => writeln!(f, "attempt:            -")?,
        }
        writeln!(
            f,
            "last error:         {}",
            self.last_error.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "online peers:       {}", self.online_count)?;
        write!(f, "listeners:          {}", self.listener_count)
    }
}

/// Keeps the channel connected and tracks peer presence
pub struct PresenceController {
    manager: Arc<ConnectionManager>,
    resolver: Arc<TokenResolver>,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    presence: Arc<RwLock<PeerPresenceSet>>,
    actor: JoinHandle<()>,
}

impl PresenceController {
    /// Create the controller and spawn its actor. Nothing connects until
    /// [`Self::start`] or [`Self::connect`] is called.
    pub fn new(
        manager: Arc<ConnectionManager>,
        resolver: Arc<TokenResolver>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let presence = Arc::new(RwLock::new(PeerPresenceSet::new()));

        let actor = Actor {
            subscription: manager.subscribe(&PRESENCE_EVENTS),
            manager: Arc::clone(&manager),
            policy,
            status: status_tx,
            presence: Arc::clone(&presence),
            notices_tx,
            credential: None,
            state: ConnectionState::Disconnected,
            last_error: None,
            epoch: 0,
            attempt_task: None,
            retry_timer: None,
        };
        let actor = tokio::spawn(actor.run(commands_rx, notices_rx));

        Self {
            manager,
            resolver,
            policy,
            commands: commands_tx,
            status: status_rx,
            presence,
            actor,
        }
    }

    /// Resolve the credential and connect with it.
    pub fn start(&self) {
        let credential = self.resolver.resolve();
        self.send(Command::Connect {
            credential,
            manual: false,
        });
    }

    /// Start a fresh connection cycle; `None` fails with
    /// [`FailureReason::CredentialMissing`].
    pub fn connect(&self, credential: Option<Credential>) {
        self.send(Command::Connect {
            credential,
            manual: false,
        });
    }

    /// Manual retry with a freshly resolved credential.
    pub fn reconnect(&self) {
        let credential = self.resolver.resolve();
        self.send(Command::Connect {
            credential,
            manual: true,
        });
    }

    /// React to the external identity store replacing or removing the credential.
    pub async fn credential_changed(&self, credential: Option<Credential>) {
        match credential {
            Some(credential) => self.connect(Some(credential)),
            None => self.disconnect().await,
        }
    }

    /// Close the channel and cancel any pending retry. Idempotent.
    ///
    /// Presence is cleared before this returns.
    pub async fn disconnect(&self) {
        write(&self.presence).clear();
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Disconnect { done: done_tx });
        let _ = done_rx.await;
    }

    pub async fn logout(&self) {
        tracing::info!("Logging out");
        self.disconnect().await;
    }

    pub fn is_online(&self, peer: &UserId) -> bool {
        read(&self.presence).is_online(peer)
    }

    pub fn online_peers(&self) -> Vec<UserId> {
        read(&self.presence).sorted()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// "Connected", "Connecting... (n/3)", "Error: <reason>" or "Disconnected",
    /// the latter with the last transport error in parentheses
    pub fn status_text(&self) -> String {
        self.status.borrow().describe(self.policy.max_attempts)
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn debug_info(&self) -> DebugInfo {
        let status = self.status();
        DebugInfo {
            credential_present: self.resolver.resolve().is_some(),
            channel_open: self.manager.is_connected(),
            attempt: status.state.attempt(),
            state: status.state,
            max_attempts: self.policy.max_attempts,
            last_error: status.last_error,
            online_count: read(&self.presence).len(),
            listener_count: self.manager.listener_count(),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub(crate) fn presence_set(&self) -> Arc<RwLock<PeerPresenceSet>> {
        Arc::clone(&self.presence)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::error!("Presence actor is no longer running");
        }
    }
}

impl Drop for PresenceController {
    fn drop(&mut self) {
        self.actor.abort();
        self.manager.disconnect();
    }
}

struct Actor {
    manager: Arc<ConnectionManager>,
    policy: ReconnectPolicy,
    subscription: Subscription,
    status: watch::Sender<ConnectionStatus>,
    presence: Arc<RwLock<PeerPresenceSet>>,
    notices_tx: mpsc::UnboundedSender<Notice>,
    credential: Option<Credential>,
    state: ConnectionState,
    last_error: Option<String>,
    /// Bumped whenever pending work is cancelled; stale notices carry an older value
    epoch: u64,
    attempt_task: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notices: mpsc::UnboundedReceiver<Notice>,
    ) {
        loop {
            tokio::select! {
                biased;
                event = self.subscription.recv() => match event {
                    Some(event) => self.on_channel_event(event),
                    None => break,
                },
                Some(notice) = notices.recv() => self.on_notice(notice),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }
        tracing::debug!("Presence actor stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                credential: None, ..
            } => {
                tracing::warn!("No authentication token found, not connecting");
                self.shut_down();
                self.last_error = None;
                self.set_state(ConnectionState::Failed(FailureReason::CredentialMissing));
            }
            Command::Connect {
                credential: Some(credential),
                manual,
            } => {
                if manual {
                    tracing::info!("Manual reconnect requested");
                }
                self.cancel_pending();
                self.clear_presence();
                self.credential = Some(credential);
                self.last_error = None;
                self.start_attempt(1);
            }
            Command::Disconnect { done } => {
                self.shut_down();
                self.last_error = None;
                self.set_state(ConnectionState::Disconnected);
                let _ = done.send(());
            }
        }
    }

    fn on_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Attempted {
                epoch,
                attempt,
                result,
            } => {
                if epoch != self.epoch {
                    tracing::debug!("Ignoring result of stale attempt {}", attempt);
                    return;
                }
                self.attempt_task = None;
                match result {
                    Ok(()) if self.manager.is_connected() => self.on_connected(),
                    Ok(()) => {
                        self.last_error = Some("channel closed during handshake".to_string());
                        self.schedule_retry(attempt);
                    }
                    Err(TransportError::Superseded) => {}
                    Err(e) if e.is_auth() => self.fail_auth(e.to_string()),
                    Err(e) => {
                        tracing::warn!("Connection attempt {} failed: {}", attempt, e);
                        self.last_error = Some(e.to_string());
                        self.schedule_retry(attempt);
                    }
                }
            }
            Notice::RetryDue { epoch, attempt } => {
                if epoch != self.epoch {
                    tracing::debug!("Ignoring stale retry timer for attempt {}", attempt);
                    return;
                }
                self.retry_timer = None;
                self.start_attempt(attempt);
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                if matches!(self.state, ConnectionState::Connecting(_))
                    && self.manager.is_connected()
                {
                    self.on_connected();
                }
            }
            ChannelEvent::Disconnected(reason) => self.on_channel_lost(reason),
            ChannelEvent::AuthError(message) => {
                tracing::warn!("Server rejected credential: {}", message);
                self.fail_auth(message);
            }
            ChannelEvent::Server(ServerEvent::UserOnline(notice)) => match UserId::new(notice.user_id) {
                Ok(peer) => {
                    write(&self.presence).mark_online(peer);
                }
                Err(e) => tracing::warn!("Ignoring userOnline: {}", e),
            },
            ChannelEvent::Server(ServerEvent::UserOffline(notice)) => {
                if let Ok(peer) = UserId::new(notice.user_id) {
                    write(&self.presence).mark_offline(&peer);
                }
            }
            ChannelEvent::Server(_) => {}
        }
    }

    fn on_connected(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.last_error = None;
        if !self.state.is_connected() {
            tracing::info!("Connected");
        }
        self.set_state(ConnectionState::Connected);
    }

    fn on_channel_lost(&mut self, reason: DisconnectReason) {
        self.clear_presence();
        if !self.state.is_connected() {
            return;
        }
        self.last_error = Some(reason.to_string());
        self.set_state(ConnectionState::Disconnected);

        if self.policy.should_recover(&reason) {
            tracing::info!(
                "Channel lost ({}), reconnecting in {:?}",
                reason,
                self.policy.recovery_delay
            );
            self.cancel_pending();
            self.arm_retry(self.policy.recovery_delay, 1);
        } else {
            tracing::warn!("Channel lost ({}), not reconnecting", reason);
        }
    }

    fn start_attempt(&mut self, attempt: u32) {
        let Some(credential) = self.credential.clone() else {
            self.set_state(ConnectionState::Failed(FailureReason::CredentialMissing));
            return;
        };
        tracing::info!(
            "Connecting (attempt {}/{})",
            attempt,
            self.policy.max_attempts
        );
        self.set_state(ConnectionState::Connecting(attempt));

        let epoch = self.epoch;
        let manager = Arc::clone(&self.manager);
        let notices = self.notices_tx.clone();
        self.attempt_task = Some(tokio::spawn(async move {
            let result = manager.connect(&credential).await;
            let _ = notices.send(Notice::Attempted {
                epoch,
                attempt,
                result,
            });
        }));
    }

    fn schedule_retry(&mut self, failed_attempt: u32) {
        match self.policy.next_attempt(failed_attempt) {
            Some(next) => {
                let delay = self.policy.backoff_delay(failed_attempt);
                tracing::info!("Retrying in {:?}", delay);
                self.publish();
                self.arm_retry(delay, next);
            }
            None => {
                tracing::error!(
                    "Giving up after {} attempts",
                    self.policy.max_attempts
                );
                self.manager.disconnect();
                self.set_state(ConnectionState::Failed(FailureReason::MaxAttemptsExceeded));
            }
        }
    }

    fn arm_retry(&mut self, delay: std::time::Duration, attempt: u32) {
        let epoch = self.epoch;
        let notices = self.notices_tx.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = notices.send(Notice::RetryDue { epoch, attempt });
        }));
    }

    fn fail_auth(&mut self, message: String) {
        self.shut_down();
        self.last_error = Some(message);
        self.set_state(ConnectionState::Failed(FailureReason::AuthenticationFailed));
    }

    /// Invalidate the pending attempt and retry timer.
    fn cancel_pending(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn shut_down(&mut self) {
        self.cancel_pending();
        self.manager.disconnect();
        self.clear_presence();
    }

    fn clear_presence(&self) {
        write(&self.presence).clear();
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status
            .send_replace(ConnectionStatus::new(self.state, self.last_error.clone()));
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
