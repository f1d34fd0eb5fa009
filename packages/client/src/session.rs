//! Composition root wiring the channel, presence and chat sessions together.

use std::sync::Arc;

use kizuna_shared::time::{Clock, SystemClock};

use crate::chat::{ChatContext, ChatSession};
use crate::config::ClientConfig;
use crate::credential::TokenResolver;
use crate::domain::{ChatRepository, UserId, UserProfile};
use crate::error::ApiError;
use crate::infrastructure::{HttpChatRepository, WebSocketConnector};
use crate::presence::PresenceController;
use crate::transport::{ConnectionManager, Connector};

/// One logged-in client: a single channel shared by presence tracking and
/// every open conversation
pub struct MessagingClient {
    config: ClientConfig,
    presence: PresenceController,
    chat: ChatContext,
}

impl MessagingClient {
    pub fn new(
        config: ClientConfig,
        resolver: Arc<TokenResolver>,
        connector: Arc<dyn Connector>,
        repository: Arc<dyn ChatRepository>,
        local_user: Option<UserProfile>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(connector));
        let presence = PresenceController::new(Arc::clone(&manager), resolver, config.reconnect);
        let chat = ChatContext {
            manager,
            repository,
            local_user,
            clock,
            typing_debounce: config.typing_debounce,
            request_timeout: config.request_timeout,
        };
        Self {
            config,
            presence,
            chat,
        }
    }

    /// Client talking WebSocket and REST to the endpoints in `config`.
    pub fn with_websocket(
        config: ClientConfig,
        resolver: Arc<TokenResolver>,
        local_user: Option<UserProfile>,
    ) -> Result<Self, ApiError> {
        let connector = Arc::new(WebSocketConnector::new(
            config.socket_url.clone(),
            config.handshake_timeout,
        ));
        let repository = Arc::new(HttpChatRepository::new(
            config.api_base_url.clone(),
            Arc::clone(&resolver),
            config.request_timeout,
        )?);
        Ok(Self::new(
            config,
            resolver,
            connector,
            repository,
            local_user,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceController {
        &self.presence
    }

    pub fn local_user(&self) -> Option<&UserProfile> {
        self.chat.local_user.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.chat.clock
    }

    /// Open the conversation with `peer`.
    pub fn open_chat(&self, peer: UserId) -> ChatSession {
        ChatSession::open(self.chat.clone(), peer)
    }

    /// Close the channel. Open chat sessions should be closed first.
    pub async fn shutdown(&self) {
        self.presence.disconnect().await;
    }
}
