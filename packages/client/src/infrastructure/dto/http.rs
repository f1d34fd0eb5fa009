//! REST request and response bodies.

use serde::{Deserialize, Serialize};

/// Envelope wrapping every REST response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Payload of a response that did not explicitly report failure.
    pub fn into_data(self) -> Option<T> {
        if self.success == Some(false) {
            return None;
        }
        self.data
    }
}

/// Body of `POST /chat/send`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
    pub target_user_id: &'a str,
    pub content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::dto::websocket::UserDto;

    #[test]
    fn test_envelope_reporting_failure_has_no_data() {
        // テスト項目: success が false の場合はデータが無いものとして扱われる
        // given (前提条件):
        let body = r#"{"success": false, "data": {"_id": "bob"}, "message": "blocked"}"#;

        // when (操作):
        let envelope: ApiEnvelope<UserDto> = serde_json::from_str(body).unwrap();

        // then (期待する結果):
        assert_eq!(envelope.message.as_deref(), Some("blocked"));
        assert!(envelope.into_data().is_none());
    }

    #[test]
    fn test_envelope_without_success_flag() {
        // テスト項目: success が省略されたレスポンスのデータが取り出せる
        // given (前提条件):
        let body = r#"{"data": [{"_id": "bob", "firstName": "Bob"}]}"#;

        // when (操作):
        let envelope: ApiEnvelope<Vec<UserDto>> = serde_json::from_str(body).unwrap();

        // then (期待する結果):
        let users = envelope.into_data().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].first_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_send_message_request_is_camel_case() {
        // テスト項目: 送信リクエストが camelCase でシリアライズされる
        // given (前提条件):
        let body = SendMessageRequest {
            target_user_id: "bob",
            content: "hello",
        };

        // when (操作):
        let json = serde_json::to_value(&body).unwrap();

        // then (期待する結果):
        assert_eq!(json, serde_json::json!({"targetUserId": "bob", "content": "hello"}));
    }
}
