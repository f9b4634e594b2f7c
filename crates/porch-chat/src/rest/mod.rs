//! REST chat API contract and the reqwest-backed implementation.
//!
//! Every endpoint answers with the marketplace's `{success, data, message}`
//! envelope; callers always branch on `Result`, nothing here panics on a
//! failed fetch.

use std::time::Duration;

use async_trait::async_trait;
use porch_proto::{
    ApiEnvelope, ConversationPageWire, ConversationWire, CreateConversationWire, MessagePageWire,
    MessageWire, SendMessageWire, UnreadCountWire,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid api configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(StatusCode),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The REST surface the sync core depends on. Tests substitute their own
/// implementation; production uses [`ReqwestChatApi`].
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn conversations(&self, page: u32, limit: u32)
        -> Result<ConversationPageWire, ApiError>;

    async fn messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<MessagePageWire, ApiError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageWire,
    ) -> Result<MessageWire, ApiError>;

    async fn mark_read(&self, conversation_id: &str) -> Result<(), ApiError>;

    async fn unread_count(&self) -> Result<UnreadCountWire, ApiError>;

    async fn create_or_get_conversation(
        &self,
        request: &CreateConversationWire,
    ) -> Result<ConversationWire, ApiError>;
}

pub struct ReqwestChatApi {
    base_url: Url,
    token: String,
    client: reqwest::Client,
}

impl ReqwestChatApi {
    pub fn new(base_url: Url, token: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self {
            base_url,
            token: token.into(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|err| ApiError::InvalidConfig(format!("invalid endpoint {path}: {err}")))
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }
        let envelope = response.json::<ApiEnvelope<T>>().await?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(ApiError::Rejected(message));
        }
        envelope
            .data
            .ok_or_else(|| ApiError::InvalidResponse("missing data payload".into()))
    }

    async fn check_envelope(&self, response: reqwest::Response) -> Result<(), ApiError> {
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }
        let envelope = response.json::<ApiEnvelope<serde_json::Value>>().await?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(ApiError::Rejected(message));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for ReqwestChatApi {
    async fn conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<ConversationPageWire, ApiError> {
        let endpoint = self.endpoint("chat/conversations")?;
        let response = self
            .client
            .get(endpoint)
            .query(&[("page", page), ("limit", limit)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.unwrap_envelope(response).await
    }

    async fn messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<MessagePageWire, ApiError> {
        let endpoint = self.endpoint(&format!("chat/conversations/{conversation_id}/messages"))?;
        let response = self
            .client
            .get(endpoint)
            .query(&[("page", page), ("limit", limit)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.unwrap_envelope(response).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        request: &SendMessageWire,
    ) -> Result<MessageWire, ApiError> {
        let endpoint = self.endpoint(&format!("chat/conversations/{conversation_id}/messages"))?;
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.unwrap_envelope(response).await
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        let endpoint = self.endpoint(&format!("chat/conversations/{conversation_id}/read"))?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_envelope(response).await
    }

    async fn unread_count(&self) -> Result<UnreadCountWire, ApiError> {
        let endpoint = self.endpoint("chat/unread-count")?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.unwrap_envelope(response).await
    }

    async fn create_or_get_conversation(
        &self,
        request: &CreateConversationWire,
    ) -> Result<ConversationWire, ApiError> {
        let endpoint = self.endpoint("chat/conversations")?;
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.unwrap_envelope(response).await
    }
}
