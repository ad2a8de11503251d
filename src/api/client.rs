use reqwest::Client as HttpClient;
use serde_json::Value;
use std::future::Future;

use crate::api::models::{Conversation, ConversationId, CorrelationId, Message, WireMessage};
use crate::error::{Result, SyncError};

/// A confirmed message plus the server document it was decoded from.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub raw: Value,
}

/// Request/response collaborator for message history and sending.
pub trait MessageApi: Send + Sync + 'static {
    fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn send_message(
        &self,
        content: &str,
        conversation: &ConversationId,
        correlation: Option<CorrelationId>,
    ) -> impl Future<Output = Result<SentMessage>> + Send;
}

pub struct ApiClient {
    pub http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.to_string(),
            token,
        }
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn with_auth(mut req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value> {
        let req = Self::with_auth(self.http.get(endpoint), self.token.as_deref());
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::FetchFailed(format!("HTTP {}", resp.status())));
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Accepts either a bare array or a `{ "data": [...] }` envelope.
    fn items(json: Value) -> Vec<Value> {
        match json {
            Value::Array(arr) => arr,
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(arr)) => arr,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Fetch the chats the user belongs to, for the side list.
    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        let endpoint = format!("{}/chat", Self::base_api(&self.base_url));
        let json = self.get_json(&endpoint).await?;
        let mut out = Vec::new();
        for item in Self::items(json) {
            match serde_json::from_value::<Conversation>(item) {
                Ok(chat) if !chat.id.as_str().is_empty() => out.push(chat),
                Ok(_) => {}
                Err(e) => log::warn!("skipping undecodable chat: {}", e),
            }
        }
        Ok(out)
    }
}

impl MessageApi for ApiClient {
    async fn fetch_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        let endpoint = format!("{}/message/{}", Self::base_api(&self.base_url), conversation);
        let json = self.get_json(&endpoint).await?;
        let mut out = Vec::new();
        for item in Self::items(json) {
            match serde_json::from_value::<WireMessage>(item) {
                Ok(wire) => out.push(Message::from(wire)),
                Err(e) => log::warn!("skipping undecodable message in {}: {}", conversation, e),
            }
        }
        Ok(out)
    }

    async fn send_message(
        &self,
        content: &str,
        conversation: &ConversationId,
        correlation: Option<CorrelationId>,
    ) -> Result<SentMessage> {
        let endpoint = format!("{}/message", Self::base_api(&self.base_url));
        let mut body = serde_json::json!({
            "content": content,
            "chatId": conversation,
        });
        if let Some(cid) = correlation {
            body["clientId"] = Value::String(cid.to_string());
        }
        let req = Self::with_auth(self.http.post(&endpoint).json(&body), self.token.as_deref());
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::FetchFailed(format!("HTTP {}", resp.status())));
        }
        let raw: Value = resp.json().await?;
        let wire: WireMessage = serde_json::from_value(raw.clone())?;
        let mut message = Message::from(wire);
        if message.correlation_id.is_none() {
            message.correlation_id = correlation;
        }
        Ok(SentMessage { message, raw })
    }
}
