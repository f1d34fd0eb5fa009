//! WebSocket [`Connector`] built on tokio-tungstenite.
//!
//! ## 責務
//!
//! - 認証情報付きのハンドシェイク（タイムアウト付き）
//! - JSON フレームとイベント DTO の相互変換
//! - ストリームの終了理由を [`DisconnectReason`] に分類

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderValue, header},
        protocol::Message,
    },
};

use crate::credential::Credential;
use crate::error::TransportError;
use crate::infrastructure::dto::websocket::{ClientEvent, ServerEvent};
use crate::transport::{Connector, DisconnectReason, Inbound, Link};

/// Opens the messaging channel over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            handshake_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Handshake request carrying the credential as bearer token and cookie.
    pub fn build_request(&self, credential: &Credential) -> Result<Request, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let cookie = HeaderValue::from_str(&format!("token={}", credential.expose()))
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(header::COOKIE, cookie);
        Ok(request)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, credential: &Credential) -> Result<Link, TransportError> {
        let request = self.build_request(credential)?;

        let (ws_stream, _response) =
            match tokio::time::timeout(self.handshake_timeout, connect_async(request)).await {
                Ok(Ok(result)) => result,
                Ok(Err(tungstenite::Error::Http(response))) => {
                    let status = response.status().as_u16();
                    if status == 401 || status == 403 {
                        tracing::warn!("Handshake rejected with status {}", status);
                        return Err(TransportError::Unauthorized(status));
                    }
                    return Err(TransportError::Handshake(format!("HTTP {}", status)));
                }
                Ok(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
                Err(_) => return Err(TransportError::Timeout(self.handshake_timeout)),
            };

        tracing::debug!("WebSocket handshake with {} complete", self.url);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let io_task = tokio::spawn(run_socket(ws_stream, outbound_rx, inbound_tx));

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            io_task: Some(io_task),
        })
    }
}

/// Shuttle frames between the socket and the link queues until either side ends.
async fn run_socket<S>(
    ws_stream: S,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<Inbound>,
) where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>>
        + futures_util::Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if inbound.send(Inbound::Event(event)).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring unrecognized frame: {}", e),
                },
                Some(Ok(Message::Close(_))) => break DisconnectReason::ServerInitiated,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    break DisconnectReason::TransportError(e.to_string());
                }
                None => break DisconnectReason::TransportClosed,
            },
            event = outbound.recv() => match event {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to encode '{}': {}", event.name(), e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        tracing::warn!("WebSocket write error: {}", e);
                        break DisconnectReason::TransportError(e.to_string());
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
        }
    };

    let _ = inbound.send(Inbound::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_carries_credential() {
        // テスト項目: ハンドシェイク要求に Bearer トークンと Cookie が付与される
        // given (前提条件):
        let connector = WebSocketConnector::new("ws://127.0.0.1:7777/socket", Duration::from_secs(10));
        let credential = Credential::parse("abc.def").unwrap();

        // when (操作):
        let request = connector.build_request(&credential).unwrap();

        // then (期待する結果):
        let headers = request.headers();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer abc.def");
        assert_eq!(headers[header::COOKIE], "token=abc.def");
        assert_eq!(request.uri().path(), "/socket");
    }

    #[test]
    fn test_build_request_rejects_invalid_url() {
        // テスト項目: 不正な URL はハンドシェイクエラーになる
        // given (前提条件):
        let connector = WebSocketConnector::new("not a url", Duration::from_secs(10));
        let credential = Credential::parse("abc").unwrap();

        // when (操作):
        let result = connector.build_request(&credential);

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_endpoint_fails() {
        // テスト項目: 接続先が存在しない場合はハンドシェイクエラーになる
        // given (前提条件):
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let connector = WebSocketConnector::new(
            format!("ws://127.0.0.1:{}/socket", port),
            Duration::from_secs(2),
        );

        // when (操作):
        let result = connector.connect(&Credential::parse("abc").unwrap()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_client_disconnect_sends_close_frame() {
        // テスト項目: クライアントからの切断時に Close フレームが送られ、正常なクローズハンドシェイクになる
        // given (前提条件):
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.next().await
        });
        let connector = std::sync::Arc::new(WebSocketConnector::new(
            format!("ws://{}/socket", addr),
            Duration::from_secs(2),
        ));
        let manager = crate::transport::ConnectionManager::new(connector);
        manager.connect(&Credential::parse("abc").unwrap()).await.unwrap();

        // when (操作):
        manager.disconnect();

        // then (期待する結果):
        let frame = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(
            matches!(frame, Some(Ok(Message::Close(_)))),
            "server saw {:?}",
            frame
        );
        assert!(!manager.is_connected());
    }
}
