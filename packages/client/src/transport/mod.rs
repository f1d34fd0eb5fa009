//! The single persistent channel to the messaging endpoint.
//!
//! [`ConnectionManager`] owns at most one live channel at a time. Channels are
//! produced by a [`Connector`] (WebSocket in production) and handed over as a
//! [`Link`]: an outbound queue plus an inbound stream of server events. A pump
//! task forwards inbound events to the [`ListenerRegistry`] as long as the
//! channel is still the current one.

pub mod listener;

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::credential::Credential;
use crate::error::TransportError;
use crate::infrastructure::dto::websocket::{ClientEvent, ServerEvent};
use crate::sync::lock;

pub use listener::{ChannelEvent, EventKind, ListenerRegistry, Subscription, SubscriptionId};

/// Time an I/O task gets to finish its close handshake once its outbound
/// queue is dropped
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why an open channel was lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the channel
    ServerInitiated,
    /// The underlying stream ended without a close frame
    TransportClosed,
    /// Reading from the stream failed
    TransportError(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ServerInitiated => f.write_str("closed by server"),
            DisconnectReason::TransportClosed => f.write_str("transport closed"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Item read from an open channel
#[derive(Debug)]
pub enum Inbound {
    Event(ServerEvent),
    /// Terminal; nothing follows it
    Closed(DisconnectReason),
}

/// An open channel as produced by a [`Connector`]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Background I/O task, aborted when the channel is torn down
    pub io_task: Option<JoinHandle<()>>,
}

/// Opens channels to the messaging endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake with `credential` and return the open channel.
    async fn connect(&self, credential: &Credential) -> Result<Link, TransportError>;
}

#[derive(Default)]
struct ChannelState {
    /// Bumped on every connect and disconnect; stale pumps and attempts compare against it
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    pump: Option<JoinHandle<()>>,
    io_task: Option<JoinHandle<()>>,
}

impl ChannelState {
    /// Drop the outbound queue so the I/O task closes the channel, and stop
    /// forwarding inbound events.
    fn teardown(&mut self) {
        self.outbound = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(io_task) = self.io_task.take() {
            finish_io_task(io_task);
        }
    }
}

/// Let `io_task` finish on its own within [`CLOSE_GRACE`], then abort it.
///
/// Its outbound queue must already be dropped. Outside a runtime the task is
/// aborted at once.
fn finish_io_task(io_task: JoinHandle<()>) {
    if io_task.is_finished() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            let abort = io_task.abort_handle();
            runtime.spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, io_task).await.is_err() {
                    tracing::debug!("Channel did not close within {:?}, aborting", CLOSE_GRACE);
                    abort.abort();
                }
            });
        }
        Err(_) => io_task.abort(),
    }
}

/// Owner of the single channel and of the listener registry
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    channel: Arc<Mutex<ChannelState>>,
    listeners: Arc<Mutex<ListenerRegistry>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            channel: Arc::new(Mutex::new(ChannelState::default())),
            listeners: Arc::new(Mutex::new(ListenerRegistry::new())),
        }
    }

    /// Open a new channel, replacing any existing one.
    ///
    /// Dispatches [`ChannelEvent::Connected`] on success. Returns
    /// [`TransportError::Superseded`] if another connect or a disconnect
    /// happened while the handshake was in flight.
    pub async fn connect(&self, credential: &Credential) -> Result<(), TransportError> {
        let generation = {
            let mut channel = lock(&self.channel);
            channel.teardown();
            channel.generation += 1;
            channel.generation
        };

        tracing::debug!("Opening channel (generation {})", generation);
        let result = self.connector.connect(credential).await;

        let mut channel = lock(&self.channel);
        if channel.generation != generation {
            if let Ok(Link {
                outbound, io_task, ..
            }) = result
            {
                drop(outbound);
                if let Some(io_task) = io_task {
                    finish_io_task(io_task);
                }
            }
            tracing::debug!("Channel generation {} superseded", generation);
            return Err(TransportError::Superseded);
        }

        let link = result?;
        channel.outbound = Some(link.outbound);
        channel.io_task = link.io_task;
        channel.pump = Some(tokio::spawn(pump(
            generation,
            link.inbound,
            Arc::clone(&self.channel),
            Arc::clone(&self.listeners),
        )));
        tracing::info!("Channel open (generation {})", generation);
        lock(&self.listeners).dispatch(&ChannelEvent::Connected);
        Ok(())
    }

    /// Close the current channel without notifying listeners.
    ///
    /// Idempotent; also cancels a handshake in flight.
    pub fn disconnect(&self) {
        let mut channel = lock(&self.channel);
        channel.generation += 1;
        if channel.outbound.is_some() {
            tracing::info!("Channel closed by client");
        }
        channel.teardown();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.channel)
            .outbound
            .as_ref()
            .is_some_and(|outbound| !outbound.is_closed())
    }

    /// Queue `event` on the open channel.
    pub fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        let channel = lock(&self.channel);
        let outbound = channel.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        let name = event.name();
        outbound
            .send(event)
            .map_err(|_| TransportError::NotConnected)?;
        tracing::debug!("Emitted '{}'", name);
        Ok(())
    }

    /// Register a listener for `kinds`; it stays registered across reconnects
    /// until the returned handle is dropped or [`Self::unsubscribe`] is called.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (id, receiver) = lock(&self.listeners).register(kinds);
        Subscription::new(id, receiver, Arc::downgrade(&self.listeners))
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.listeners).unregister(id)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        lock(&self.channel).teardown();
    }
}

/// Forward inbound items of channel `generation` to the listeners.
async fn pump(
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    channel: Arc<Mutex<ChannelState>>,
    listeners: Arc<Mutex<ListenerRegistry>>,
) {
    let reason = loop {
        let Some(item) = inbound.recv().await else {
            break DisconnectReason::TransportClosed;
        };
        let event = match item {
            Inbound::Event(ServerEvent::AuthError(payload)) => {
                ChannelEvent::AuthError(payload.message().to_string())
            }
            Inbound::Event(event) => ChannelEvent::Server(event),
            Inbound::Closed(reason) => break reason,
        };
        {
            let state = lock(&channel);
            if state.generation != generation {
                return;
            }
            lock(&listeners).dispatch(&event);
        }
    };

    let mut state = lock(&channel);
    if state.generation != generation {
        return;
    }
    state.outbound = None;
    state.pump = None;
    if let Some(io_task) = state.io_task.take() {
        io_task.abort();
    }
    tracing::info!("Channel lost: {}", reason);
    lock(&listeners).dispatch(&ChannelEvent::Disconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::dto::websocket::PresenceNotice;
    use crate::test_support::{FakeConnector, FakeOutcome, credential};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sets its flag when the owning task is dropped or aborted
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Connector whose I/O task never finishes on its own
    struct StuckConnector {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for StuckConnector {
        async fn connect(&self, _credential: &Credential) -> Result<Link, TransportError> {
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            let flag = DropFlag(Arc::clone(&self.stopped));
            let io_task = tokio::spawn(async move {
                let _held = (flag, outbound_rx, inbound_tx);
                std::future::pending::<()>().await;
            });
            Ok(Link {
                outbound,
                inbound,
                io_task: Some(io_task),
            })
        }
    }

    fn online(user_id: &str) -> ServerEvent {
        ServerEvent::UserOnline(PresenceNotice {
            user_id: user_id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_connect_dispatches_connected() {
        // テスト項目: 接続に成功すると Connected イベントが配信される
        // given (前提条件):
        let (connector, _remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        let mut sub = manager.subscribe(&[EventKind::Connected]);

        // when (操作):
        let result = manager.connect(&credential()).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(manager.is_connected());
        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
    }

    #[tokio::test]
    async fn test_emit_without_channel_fails() {
        // テスト項目: 未接続の状態での送信は NotConnected エラーになる
        // given (前提条件):
        let (connector, _remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);

        // when (操作):
        let result = manager.emit(ClientEvent::JoinChat("bob".to_string()));

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_emit_reaches_remote() {
        // テスト項目: 送信したイベントがリモート側に届く
        // given (前提条件):
        let (connector, mut remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        manager.connect(&credential()).await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        // when (操作):
        manager
            .emit(ClientEvent::JoinChat("bob".to_string()))
            .unwrap();

        // then (期待する結果):
        assert_eq!(
            remote.next_event().await,
            Some(ClientEvent::JoinChat("bob".to_string()))
        );
    }

    #[tokio::test]
    async fn test_server_close_dispatches_disconnected() {
        // テスト項目: サーバーからのクローズで Disconnected が配信され未接続になる
        // given (前提条件):
        let (connector, mut remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        let mut sub = manager.subscribe(&[EventKind::Disconnected]);
        manager.connect(&credential()).await.unwrap();
        let remote = remotes.recv().await.unwrap();

        // when (操作):
        remote.close(DisconnectReason::ServerInitiated);

        // then (期待する結果):
        assert_eq!(
            sub.recv().await,
            Some(ChannelEvent::Disconnected(DisconnectReason::ServerInitiated))
        );
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_server_auth_error_is_dispatched_as_auth_error() {
        // テスト項目: サーバーの auth_error は AuthError イベントとして配信される
        // given (前提条件):
        let (connector, mut remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        let mut sub = manager.subscribe(&[EventKind::AuthError]);
        manager.connect(&credential()).await.unwrap();
        let remote = remotes.recv().await.unwrap();

        // when (操作):
        remote.push(ServerEvent::AuthError(
            crate::infrastructure::dto::websocket::AuthErrorPayload::Text("expired".to_string()),
        ));

        // then (期待する結果):
        assert_eq!(
            sub.recv().await,
            Some(ChannelEvent::AuthError("expired".to_string()))
        );
    }

    #[tokio::test]
    async fn test_events_from_superseded_channel_are_ignored() {
        // テスト項目: 置き換えられた古いチャネルのイベントは配信されない
        // given (前提条件):
        let (connector, mut remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        let mut sub = manager.subscribe(&[EventKind::UserOnline, EventKind::Disconnected]);
        manager.connect(&credential()).await.unwrap();
        let old_remote = remotes.recv().await.unwrap();
        manager.connect(&credential()).await.unwrap();
        let new_remote = remotes.recv().await.unwrap();

        // when (操作):
        old_remote.push(online("stale"));
        old_remote.close(DisconnectReason::ServerInitiated);
        new_remote.push(online("bob"));

        // then (期待する結果):
        assert_eq!(
            sub.recv().await,
            Some(ChannelEvent::Server(online("bob")))
        );
        assert!(sub.try_recv().is_none());
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_supersedes_attempt() {
        // テスト項目: ハンドシェイク中の切断で接続試行が Superseded になる
        // given (前提条件):
        let (connector, _remotes) = FakeConnector::new();
        connector.set_latency(std::time::Duration::from_millis(50));
        let manager = Arc::new(ConnectionManager::new(connector.clone()));
        let attempt = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(&credential()).await })
        };
        while connector.attempt_count() == 0 {
            tokio::task::yield_now().await;
        }

        // when (操作):
        manager.disconnect();
        let result = attempt.await.unwrap();

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::Superseded)));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_silent_and_idempotent() {
        // テスト項目: クライアント側の切断はイベントを配信せず、繰り返し呼べる
        // given (前提条件):
        let (connector, _remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        let mut sub = manager.subscribe(&[EventKind::Disconnected]);
        manager.connect(&credential()).await.unwrap();

        // when (操作):
        manager.disconnect();
        manager.disconnect();
        tokio::task::yield_now().await;

        // then (期待する結果):
        assert!(!manager.is_connected());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_failed_handshake_keeps_listeners() {
        // テスト項目: 接続失敗や再接続でリスナー数が変わらない
        // given (前提条件):
        let (connector, _remotes) = FakeConnector::new();
        connector.script([FakeOutcome::Refuse, FakeOutcome::Accept, FakeOutcome::Accept]);
        let manager = ConnectionManager::new(connector);
        let _sub = manager.subscribe(&[EventKind::Connected]);

        // when (操作):
        let first = manager.connect(&credential()).await;
        manager.connect(&credential()).await.unwrap();
        manager.connect(&credential()).await.unwrap();

        // then (期待する結果):
        assert!(matches!(first, Err(TransportError::Handshake(_))));
        assert_eq!(manager.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters() {
        // テスト項目: 購読ハンドルを破棄するとリスナーが解除される
        // given (前提条件):
        let (connector, _remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(connector);
        let sub = manager.subscribe(&[EventKind::Connected]);
        let id = sub.id();

        // when (操作):
        drop(sub);

        // then (期待する結果):
        assert_eq!(manager.listener_count(), 0);
        assert!(!manager.unsubscribe(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_gives_io_task_grace_then_aborts() {
        // テスト項目: 切断後の I/O タスクはクローズ猶予の間は残り、猶予を過ぎると中断される
        // given (前提条件):
        let stopped = Arc::new(AtomicBool::new(false));
        let manager = ConnectionManager::new(Arc::new(StuckConnector {
            stopped: Arc::clone(&stopped),
        }));
        manager.connect(&credential()).await.unwrap();

        // when (操作):
        manager.disconnect();
        tokio::time::sleep(CLOSE_GRACE / 2).await;
        let stopped_within_grace = stopped.load(Ordering::SeqCst);
        tokio::time::sleep(CLOSE_GRACE).await;

        // then (期待する結果):
        assert!(!stopped_within_grace);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!manager.is_connected());
    }
}
