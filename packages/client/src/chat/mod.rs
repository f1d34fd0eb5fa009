//! Per-conversation chat session.
//!
//! A [`ChatSession`] joins the conversation room, loads the peer profile and
//! history, and keeps an optimistic [`MessageTimeline`] reconciled with the
//! records the server confirms. The view observes a [`ConversationView`]
//! through a watch channel.

pub mod typing;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use kizuna_shared::time::Clock;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::domain::{
    ChatRepository, Message, MessageTimeline, TempId, TypingPeer, UserId, UserProfile,
};
use crate::error::{ApiError, ChatError, TransportError};
use crate::infrastructure::dto::websocket::{ClientEvent, MarkAsReadPayload, ServerEvent};
use crate::sync::lock;
use crate::transport::{ChannelEvent, ConnectionManager, EventKind, Subscription, SubscriptionId};

pub use typing::TypingIndicator;

/// Channel events a chat session reacts to
const CONVERSATION_EVENTS: [EventKind; 5] = [
    EventKind::Connected,
    EventKind::NewMessage,
    EventKind::MessageDelivered,
    EventKind::UserTyping,
    EventKind::UserStoppedTyping,
];

/// Dependencies shared by every chat session
#[derive(Clone)]
pub struct ChatContext {
    pub manager: Arc<ConnectionManager>,
    pub repository: Arc<dyn ChatRepository>,
    /// `None` until the identity store knows who is logged in
    pub local_user: Option<UserProfile>,
    pub clock: Arc<dyn Clock>,
    pub typing_debounce: Duration,
    pub request_timeout: Duration,
}

/// Everything the view needs to render one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub peer: UserProfile,
    pub timeline: MessageTimeline,
    /// Profile and history are still loading
    pub loading: bool,
    /// A send is in flight
    pub sending: bool,
    pub peer_typing: Option<TypingPeer>,
}

impl ConversationView {
    fn new(peer_id: UserId) -> Self {
        Self {
            peer: UserProfile::placeholder(peer_id),
            timeline: MessageTimeline::new(),
            loading: true,
            sending: false,
            peer_typing: None,
        }
    }
}

/// How a send completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Emitted on the channel; confirmation arrives as `messageDelivered`
    SentViaChannel { temp_id: TempId },
    /// Stored through the REST fallback and already reconciled
    SentViaHttp { message_id: String },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyContent,
    SendInProgress,
    NoLocalUser,
}

/// One-shot notice that a message could not be delivered and was rolled back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub temp_id: TempId,
    pub content: String,
    pub error: String,
}

/// Holds the in-flight flag for the duration of one send
struct InFlight<'a> {
    flag: &'a AtomicBool,
    view: &'a watch::Sender<ConversationView>,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, view: &'a watch::Sender<ConversationView>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        view.send_modify(|v| v.sending = true);
        Some(Self { flag, view })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.view.send_modify(|v| v.sending = false);
    }
}

/// An open conversation with one peer
pub struct ChatSession {
    peer_id: UserId,
    context: ChatContext,
    view: Arc<watch::Sender<ConversationView>>,
    typing: TypingIndicator,
    in_flight: AtomicBool,
    failures_tx: mpsc::UnboundedSender<SendFailure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<SendFailure>>>,
    subscription_id: SubscriptionId,
    task: JoinHandle<()>,
    released: AtomicBool,
}

impl ChatSession {
    /// Open the conversation with `peer_id`.
    ///
    /// Subscribes before anything is loaded so no event is missed; profile and
    /// history load in the background while [`ConversationView::loading`] is set.
    pub fn open(context: ChatContext, peer_id: UserId) -> Self {
        let subscription = context.manager.subscribe(&CONVERSATION_EVENTS);
        let subscription_id = subscription.id();
        let (view, _) = watch::channel(ConversationView::new(peer_id.clone()));
        let view = Arc::new(view);

        if context.manager.is_connected() {
            join_room(&context.manager, &peer_id);
        }

        let task = tokio::spawn(run_session(
            context.clone(),
            peer_id.clone(),
            Arc::clone(&view),
            subscription,
        ));
        let typing = TypingIndicator::new(
            Arc::clone(&context.manager),
            peer_id.clone(),
            context.typing_debounce,
        );
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        tracing::info!("Opened conversation with {}", peer_id);

        Self {
            peer_id,
            context,
            view,
            typing,
            in_flight: AtomicBool::new(false),
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
            subscription_id,
            task,
            released: AtomicBool::new(false),
        }
    }

    pub fn peer_id(&self) -> &UserId {
        &self.peer_id
    }

    /// Current snapshot of the conversation
    pub fn view(&self) -> ConversationView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.view.subscribe()
    }

    /// Receiver of [`SendFailure`] notices; only the first call gets it.
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<SendFailure>> {
        lock(&self.failures_rx).take()
    }

    /// Send `content` to the peer.
    ///
    /// The message appears in the timeline before any I/O. It goes out on the
    /// channel when connected, otherwise (or if emitting fails) through the
    /// REST endpoint; a failed fallback removes the message again and
    /// publishes a [`SendFailure`].
    pub async fn send(&self, content: &str) -> Result<SendOutcome, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(SendOutcome::Skipped(SkipReason::EmptyContent));
        }
        let Some(_in_flight) = InFlight::acquire(&self.in_flight, &self.view) else {
            return Ok(SendOutcome::Skipped(SkipReason::SendInProgress));
        };
        let Some(local_user) = self.context.local_user.as_ref() else {
            tracing::warn!("No local user, message not sent");
            return Ok(SendOutcome::Skipped(SkipReason::NoLocalUser));
        };

        self.typing.stop();

        let temp_id = TempId::generate();
        let optimistic = Message::optimistic(
            temp_id.clone(),
            local_user.id.clone(),
            self.peer_id.clone(),
            content,
            self.context.clock.now(),
        );
        self.view.send_modify(|v| {
            if let Err(e) = v.timeline.push_optimistic(optimistic) {
                tracing::error!("{}", e);
            }
        });

        if self.context.manager.is_connected() {
            let event = ClientEvent::send_message(self.peer_id.as_str(), content, temp_id.as_str());
            match self.context.manager.emit(event) {
                Ok(()) => return Ok(SendOutcome::SentViaChannel { temp_id }),
                Err(e) => tracing::warn!("Channel send failed, falling back to HTTP: {}", e),
            }
        }

        let result = tokio::time::timeout(
            self.context.request_timeout,
            self.context.repository.send_message(&self.peer_id, content),
        )
        .await
        .unwrap_or(Err(ApiError::Timeout));

        match result {
            Ok(confirmed) => {
                let message_id = confirmed.id.clone();
                self.view.send_modify(|v| {
                    if v.timeline.promote(&temp_id, confirmed.clone()).is_none() {
                        v.timeline.append(confirmed);
                    }
                });
                Ok(SendOutcome::SentViaHttp { message_id })
            }
            Err(e) => {
                tracing::error!("Failed to send message: {}", e);
                self.view.send_modify(|v| {
                    v.timeline.remove_optimistic(&temp_id);
                });
                let _ = self.failures_tx.send(SendFailure {
                    temp_id,
                    content: content.to_string(),
                    error: e.to_string(),
                });
                Err(ChatError::SendFailed(e))
            }
        }
    }

    /// Forward a change of the input field to the typing indicator.
    pub fn on_typing(&self, has_content: bool) {
        self.typing.on_input(has_content);
    }

    /// Tell the server the delivered messages from the peer have been read.
    ///
    /// Returns how many ids were reported.
    pub fn mark_as_read(&self) -> Result<usize, TransportError> {
        let message_ids = self.view.borrow().timeline.delivered_ids_from(&self.peer_id);
        if message_ids.is_empty() {
            return Ok(0);
        }
        let count = message_ids.len();
        self.context
            .manager
            .emit(ClientEvent::MarkAsRead(MarkAsReadPayload {
                target_user_id: self.peer_id.to_string(),
                message_ids,
            }))?;
        Ok(count)
    }

    /// Leave the conversation. The channel itself stays open.
    pub fn close(self) {
        self.release();
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.typing.stop();
        if let Err(e) = self
            .context
            .manager
            .emit(ClientEvent::LeaveChat(self.peer_id.to_string()))
        {
            tracing::debug!("leaveChat not sent: {}", e);
        }
        self.context.manager.unsubscribe(self.subscription_id);
        self.task.abort();
        tracing::info!("Closed conversation with {}", self.peer_id);
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn join_room(manager: &ConnectionManager, peer_id: &UserId) {
    if let Err(e) = manager.emit(ClientEvent::JoinChat(peer_id.to_string())) {
        tracing::debug!("joinChat not sent: {}", e);
    }
}

/// Load the conversation, then apply channel events until the session closes.
async fn run_session(
    context: ChatContext,
    peer_id: UserId,
    view: Arc<watch::Sender<ConversationView>>,
    mut subscription: Subscription,
) {
    let load = async {
        tokio::join!(
            load_profile(context.repository.as_ref(), &peer_id),
            load_history(context.repository.as_ref(), &peer_id),
        )
    };
    tokio::pin!(load);
    let mut loaded = false;

    loop {
        tokio::select! {
            (profile, history) = &mut load, if !loaded => {
                loaded = true;
                view.send_modify(|v| {
                    v.peer = profile;
                    v.timeline.prepend_history(history);
                    v.loading = false;
                });
                tracing::debug!("Conversation with {} loaded", peer_id);
            }
            event = subscription.recv() => match event {
                Some(ChannelEvent::Connected) => join_room(&context.manager, &peer_id),
                Some(event) => {
                    view.send_if_modified(|v| apply_inbound(v, &peer_id, event));
                }
                None => break,
            },
        }
    }
}

/// Profile of the peer, falling back to the connections list and then to a placeholder.
async fn load_profile(repository: &dyn ChatRepository, peer_id: &UserId) -> UserProfile {
    match repository.fetch_profile(peer_id).await {
        Ok(profile) => profile,
        Err(ApiError::NotFound | ApiError::EmptyResponse) => {
            match repository.fetch_connections().await {
                Ok(connections) => connections
                    .into_iter()
                    .find(|profile| &profile.id == peer_id)
                    .unwrap_or_else(|| UserProfile::placeholder(peer_id.clone())),
                Err(e) => {
                    tracing::warn!("Failed to load connections: {}", e);
                    UserProfile::placeholder(peer_id.clone())
                }
            }
        }
        Err(e) => {
            tracing::warn!("Failed to load profile of {}: {}", peer_id, e);
            UserProfile::placeholder(peer_id.clone())
        }
    }
}

async fn load_history(repository: &dyn ChatRepository, peer_id: &UserId) -> Vec<Message> {
    match repository.fetch_history(peer_id).await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!("Failed to load history with {}: {}", peer_id, e);
            Vec::new()
        }
    }
}

/// Apply a server event to the conversation. Returns whether the view changed.
pub fn apply_inbound(view: &mut ConversationView, peer_id: &UserId, event: ChannelEvent) -> bool {
    let ChannelEvent::Server(event) = event else {
        return false;
    };
    match event {
        ServerEvent::NewMessage(payload) => {
            if payload.from != peer_id.as_str() {
                return false;
            }
            match Message::try_from(payload.message) {
                Ok(message) => view.timeline.append(message),
                Err(e) => {
                    tracing::warn!("Ignoring malformed newMessage: {}", e);
                    false
                }
            }
        }
        ServerEvent::MessageDelivered(payload) => {
            let temp_id = TempId::from_wire(payload.message_id);
            match Message::try_from(payload.message) {
                Ok(confirmed) => view.timeline.promote(&temp_id, confirmed).is_some(),
                Err(e) => {
                    tracing::warn!("Ignoring malformed messageDelivered: {}", e);
                    false
                }
            }
        }
        ServerEvent::UserTyping(notice) => {
            if notice.user_id != peer_id.as_str() {
                return false;
            }
            view.peer_typing = TypingPeer::try_from(notice).ok();
            true
        }
        ServerEvent::UserStoppedTyping(notice) => {
            if notice.user_id != peer_id.as_str() {
                return false;
            }
            view.peer_typing.take().is_some()
        }
        _ => false,
    }
}
