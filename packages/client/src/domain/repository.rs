//! Repository trait 定義
//!
//! ドメイン層が必要とする REST エンドポイントのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。

use async_trait::async_trait;

use crate::error::ApiError;

use super::{Message, UserId, UserProfile};

/// Chat Repository trait
///
/// チャットセッションが必要とするリモートサーバーへのインターフェース。
/// メッセージの保存はサーバー側の責務であり、クライアントは取得と送信のみ行う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// ユーザーのプロフィールを取得
    ///
    /// ユーザーが存在しない場合は `ApiError::NotFound`、
    /// レスポンスにデータが無い場合は `ApiError::EmptyResponse` を返す。
    async fn fetch_profile(&self, user_id: &UserId) -> Result<UserProfile, ApiError>;

    /// ログイン中ユーザーのコネクション一覧を取得
    async fn fetch_connections(&self) -> Result<Vec<UserProfile>, ApiError>;

    /// 相手とのメッセージ履歴を取得
    async fn fetch_history(&self, peer_id: &UserId) -> Result<Vec<Message>, ApiError>;

    /// HTTP 経由でメッセージを送信し、サーバーが確定したレコードを返す
    async fn send_message(&self, peer_id: &UserId, content: &str) -> Result<Message, ApiError>;
}
