//! REST implementation of [`ChatRepository`] built on reqwest.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, header};
use serde::de::DeserializeOwned;

use crate::credential::TokenResolver;
use crate::domain::{ChatRepository, Message, UserId, UserProfile};
use crate::error::ApiError;
use crate::infrastructure::dto::{
    conversion::messages_from_dtos,
    http::{ApiEnvelope, SendMessageRequest},
    websocket::{MessageDto, UserDto},
};

/// Chat REST endpoints, authenticated with the currently resolved credential
pub struct HttpChatRepository {
    client: reqwest::Client,
    base_url: String,
    resolver: Arc<TokenResolver>,
}

impl HttpChatRepository {
    pub fn new(
        base_url: impl Into<String>,
        resolver: Arc<TokenResolver>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resolver,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.resolver.resolve() {
            Some(credential) => builder
                .bearer_auth(credential.expose())
                .header(header::COOKIE, format!("token={}", credential.expose())),
            None => builder,
        }
    }

    async fn fetch_data<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.into_data().ok_or(ApiError::EmptyResponse)
    }
}

#[async_trait]
impl ChatRepository for HttpChatRepository {
    async fn fetch_profile(&self, user_id: &UserId) -> Result<UserProfile, ApiError> {
        let path = format!("/user/profile/{}", user_id);
        let dto: UserDto = self.fetch_data(self.request(Method::GET, &path)).await?;
        UserProfile::try_from(dto).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn fetch_connections(&self) -> Result<Vec<UserProfile>, ApiError> {
        let dtos: Vec<UserDto> = self
            .fetch_data(self.request(Method::GET, "/user/connections"))
            .await?;
        Ok(dtos
            .into_iter()
            .filter_map(|dto| UserProfile::try_from(dto).ok())
            .collect())
    }

    async fn fetch_history(&self, peer_id: &UserId) -> Result<Vec<Message>, ApiError> {
        let path = format!("/chat/{}", peer_id);
        let dtos: Vec<MessageDto> = self.fetch_data(self.request(Method::GET, &path)).await?;
        Ok(messages_from_dtos(dtos))
    }

    async fn send_message(&self, peer_id: &UserId, content: &str) -> Result<Message, ApiError> {
        let body = SendMessageRequest {
            target_user_id: peer_id.as_str(),
            content,
        };
        let builder = self.request(Method::POST, "/chat/send").json(&body);
        let dto: MessageDto = self.fetch_data(builder).await?;
        tracing::debug!("Message '{}' stored via HTTP", dto.id);
        Message::try_from(dto).map_err(|e| ApiError::Decode(e.to_string()))
    }
}
