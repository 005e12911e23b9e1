use async_trait::async_trait;
use parley_core::{
    with_retry, ConversationInfo, Error, HealthStatus, Message, MessageDraft, Participant, Result,
    RetryPolicy,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::rate_limit::PublishRateLimiter;
use crate::transport::{RetrieveQuery, Transport, TransportCapabilities};

const TRANSPORT_NAME: &str = "http";

/// Response envelope used by the conversation service for every endpoint.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn into_data(self) -> Result<T> {
        if !self.success {
            let detail = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::transport(TRANSPORT_NAME, detail));
        }
        self.data
            .ok_or_else(|| Error::transport(TRANSPORT_NAME, "missing data in successful response"))
    }
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    #[serde(default)]
    user: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSender {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage {
    id: String,
    #[serde(default)]
    conversation_id: String,
    sender: ApiSender,
    content: String,
    #[serde(default)]
    language: Option<String>,
    timestamp: i64,
    #[serde(default)]
    translations: HashMap<String, String>,
    #[serde(default)]
    attachments: Vec<String>,
    #[serde(default)]
    reply_to: Option<String>,
}

impl ApiMessage {
    fn into_message(self, fallback_conversation: &str) -> Message {
        let conversation_id = if self.conversation_id.is_empty() {
            fallback_conversation.to_string()
        } else {
            self.conversation_id
        };
        Message {
            id: self.id,
            conversation_id,
            sender_id: self.sender.id,
            sender_name: self.sender.name,
            content: self.content,
            language: self.language.unwrap_or_else(|| "en".to_string()),
            timestamp_ms: self.timestamp,
            translations: self.translations,
            attachments: self.attachments,
            reply_to: self.reply_to,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    attachments: &'a [String],
}

/// Retry predicate for the network adapter: transient faults retry,
/// authentication failures and missing resources never do.
pub(crate) fn http_should_retry(e: &Error) -> bool {
    if matches!(e, Error::Auth(_) | Error::NotFound(_)) {
        return false;
    }
    e.recoverable()
}

/// Network-API transport adapter. Authenticates once with username and
/// password, then drives the conversation service with a bearer token.
pub struct HttpTransport {
    base_url: String,
    username: String,
    password: String,
    client: Client,
    token: RwLock<Option<String>>,
    retry: RetryPolicy,
    limiter: PublishRateLimiter,
    capabilities: TransportCapabilities,
}

impl HttpTransport {
    /// The per-request wall-clock timeout is load-bearing for this
    /// adapter; a client that cannot be built with it is a hard error.
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        request_timeout: Duration,
        messages_per_minute: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let capabilities = TransportCapabilities {
            can_edit: true,
            can_delete: true,
            can_search: true,
            realtime: true,
            messages_per_minute,
            messages_per_hour: messages_per_minute.saturating_mul(60),
            messages_per_day: messages_per_minute.saturating_mul(60 * 24),
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            client,
            token: RwLock::new(None),
            retry: RetryPolicy::default(),
            limiter: PublishRateLimiter::from_capabilities(&capabilities),
            capabilities,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Auth("no session token; transport not initialized".to_string()))
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> Error {
        match status.as_u16() {
            401 | 403 => Error::Auth(format!("service rejected credentials: {}", body)),
            404 => Error::NotFound(body.to_string()),
            429 => Error::RateLimited { retry_after_ms: None },
            code => Error::Network {
                status: code,
                detail: body.chars().take(200).collect(),
            },
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Error::transport(TRANSPORT_NAME, format!("invalid response body: {}", e)))?;
        envelope.into_data()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(self.api_url(path))
            .bearer_auth(&token)
            .query(query)
            .send()
            .await
            .map_err(|e| Self::map_reqwest(e))?;
        Self::decode(response).await
    }

    fn map_reqwest(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!("request timed out: {}", e))
        } else {
            Error::transport(TRANSPORT_NAME, format!("request failed: {}", e))
        }
    }

    async fn publish_once(&self, draft: &MessageDraft) -> Result<ApiMessage> {
        let token = self.bearer().await?;
        let path = format!("/conversations/{}/messages", draft.conversation_id);
        let request = PublishRequest {
            content: &draft.content,
            reply_to: draft.reply_to.as_deref(),
            attachments: &draft.attachments,
        };
        let response = self
            .client
            .post(self.api_url(&path))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest)?;
        Self::decode(response).await
    }

    async fn edit_once(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ApiMessage> {
        let token = self.bearer().await?;
        let path = format!("/conversations/{}/messages/{}", conversation_id, message_id);
        let response = self
            .client
            .put(self.api_url(&path))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(Self::map_reqwest)?;
        Self::decode(response).await
    }

    async fn delete_once(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let token = self.bearer().await?;
        let path = format!("/conversations/{}/messages/{}", conversation_id, message_id);
        let response = self
            .client
            .delete(self.api_url(&path))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(Self::map_reqwest)?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        let request = AuthRequest {
            username: &self.username,
            password: &self.password,
        };
        let response = self
            .client
            .post(self.api_url("/auth/login"))
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("login rejected: {}", body)));
        }
        let auth: AuthResponse = Self::decode(response).await?;
        debug!(user = %auth.user, "Authenticated with conversation service");
        *self.token.write().await = Some(auth.token);
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn initialize(&self) -> Result<()> {
        // Credential exchange is not retried: a rejection is final.
        self.authenticate().await?;
        info!(base_url = %self.base_url, "HTTP transport initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        *self.token.write().await = None;
        info!("HTTP transport shut down");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn retrieve_messages(&self, query: &RetrieveQuery) -> Result<Vec<Message>> {
        let path = format!("/conversations/{}/messages", query.conversation_id);
        let mut params = vec![("limit", query.limit.to_string())];
        if let Some(since) = query.since_ms {
            params.push(("since", since.to_string()));
        }
        let raw: Vec<ApiMessage> = with_retry(&self.retry, http_should_retry, || {
            self.get_json(&path, &params)
        })
        .await?;
        Ok(raw
            .into_iter()
            .map(|m| m.into_message(&query.conversation_id))
            .collect())
    }

    async fn publish_message(&self, draft: &MessageDraft) -> Result<Message> {
        self.limiter.acquire().await;
        let raw = with_retry(&self.retry, http_should_retry, || self.publish_once(draft)).await?;
        Ok(raw.into_message(&draft.conversation_id))
    }

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message> {
        let raw = with_retry(&self.retry, http_should_retry, || {
            self.edit_once(conversation_id, message_id, content)
        })
        .await?;
        Ok(raw.into_message(conversation_id))
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        with_retry(&self.retry, http_should_retry, || {
            self.delete_once(conversation_id, message_id)
        })
        .await
    }

    async fn conversation_info(&self, conversation_id: &str) -> Result<ConversationInfo> {
        let path = format!("/conversations/{}", conversation_id);
        with_retry(&self.retry, http_should_retry, || self.get_json(&path, &[])).await
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        let path = format!("/conversations/{}/participants", conversation_id);
        with_retry(&self.retry, http_should_retry, || self.get_json(&path, &[])).await
    }

    async fn search_messages(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let path = format!("/conversations/{}/messages/search", conversation_id);
        let params = vec![("q", query.to_string()), ("limit", limit.to_string())];
        let raw: Vec<ApiMessage> = with_retry(&self.retry, http_should_retry, || {
            self.get_json(&path, &params)
        })
        .await?;
        Ok(raw
            .into_iter()
            .map(|m| m.into_message(conversation_id))
            .collect())
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.api_url("/health"))
            .send()
            .await
            .map_err(Self::map_reqwest);
        match response {
            Ok(r) if r.status().is_success() => {
                Ok(HealthStatus::healthy(started.elapsed().as_millis() as u64))
            }
            Ok(r) => Ok(HealthStatus::unhealthy(&format!(
                "service returned {}",
                r.status()
            ))),
            Err(e) => {
                warn!(error = %e, "Health check failed");
                Ok(HealthStatus::unhealthy(&e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success_yields_data() {
        let raw = r#"{"success": true, "data": {"token": "t", "user": {"id": "u1"}}, "error": null, "message": null}"#;
        let env: ApiEnvelope<AuthResponse> = serde_json::from_str(raw).unwrap();
        let auth = env.into_data().unwrap();
        assert_eq!(auth.token, "t");
    }

    #[test]
    fn test_envelope_failure_yields_error() {
        let raw = r#"{"success": false, "data": null, "error": "conversation closed", "message": null}"#;
        let env: ApiEnvelope<serde_json::Value> = serde_json::from_str(raw).unwrap();
        let err = env.into_data().unwrap_err();
        assert_eq!(err.code(), "transport");
        assert!(err.to_string().contains("conversation closed"));
    }

    #[test]
    fn test_api_message_normalization() {
        let raw = r#"{
            "id": "m1",
            "sender": {"id": "u1", "name": "Ada"},
            "content": "bonjour",
            "language": "fr",
            "timestamp": 1700000000000,
            "replyTo": "m0"
        }"#;
        let api: ApiMessage = serde_json::from_str(raw).unwrap();
        let msg = api.into_message("c9");
        assert_eq!(msg.conversation_id, "c9");
        assert_eq!(msg.sender_name, "Ada");
        assert_eq!(msg.language, "fr");
        assert_eq!(msg.reply_to.as_deref(), Some("m0"));
    }

    #[test]
    fn test_retry_predicate_never_retries_auth_or_missing() {
        assert!(!http_should_retry(&Error::Auth("denied".into())));
        assert!(!http_should_retry(&Error::NotFound("gone".into())));
        assert!(http_should_retry(&Error::Network {
            status: 502,
            detail: "bad gateway".into()
        }));
        assert!(http_should_retry(&Error::RateLimited { retry_after_ms: None }));
        assert!(http_should_retry(&Error::Timeout("slow".into())));
    }

    #[test]
    fn test_new_builds_client_with_timeout() {
        let t = HttpTransport::new(
            "http://localhost:9000/",
            "bot",
            "secret",
            Duration::from_secs(5),
            10,
        )
        .unwrap();
        assert_eq!(t.base_url, "http://localhost:9000");
        assert_eq!(t.capabilities.messages_per_minute, 10);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            HttpTransport::map_status(reqwest::StatusCode::UNAUTHORIZED, "no").code(),
            "auth"
        );
        assert_eq!(
            HttpTransport::map_status(reqwest::StatusCode::NOT_FOUND, "no").code(),
            "not_found"
        );
        assert_eq!(
            HttpTransport::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "no").code(),
            "rate_limited"
        );
        assert_eq!(
            HttpTransport::map_status(reqwest::StatusCode::BAD_GATEWAY, "no").code(),
            "network"
        );
    }
}
