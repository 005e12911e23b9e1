use async_trait::async_trait;
use parley_core::{ConversationInfo, HealthStatus, Message, MessageDraft, Participant, Result};
use serde::{Deserialize, Serialize};

/// Static declaration of what a transport can do and how hard it may be
/// driven. Fixed at adapter construction; the orchestrator consults it
/// instead of probing for unsupported operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCapabilities {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_search: bool,
    pub realtime: bool,
    pub messages_per_minute: u32,
    pub messages_per_hour: u32,
    pub messages_per_day: u32,
}

/// Bounded retrieval window for the observe phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveQuery {
    pub conversation_id: String,
    /// Only messages strictly newer than this timestamp are returned.
    pub since_ms: Option<i64>,
    pub limit: usize,
}

impl RetrieveQuery {
    pub fn new(conversation_id: &str, since_ms: Option<i64>, limit: usize) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            since_ms,
            limit,
        }
    }
}

/// Capability-tagged contract every conversation transport implements.
/// Both adapters normalize to the same [`Message`] shape, keeping the
/// orchestrator and the metrics engine transport-agnostic.
///
/// Operations a transport cannot perform return
/// [`parley_core::Error::Unsupported`]; callers can avoid the round trip
/// by checking [`Transport::capabilities`] first.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
    async fn is_connected(&self) -> bool;

    async fn retrieve_messages(&self, query: &RetrieveQuery) -> Result<Vec<Message>>;
    async fn publish_message(&self, draft: &MessageDraft) -> Result<Message>;
    async fn edit_message(&self, conversation_id: &str, message_id: &str, content: &str)
        -> Result<Message>;
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn conversation_info(&self, conversation_id: &str) -> Result<ConversationInfo>;
    async fn participants(&self, conversation_id: &str) -> Result<Vec<Participant>>;
    async fn search_messages(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>>;

    fn capabilities(&self) -> &TransportCapabilities;
    async fn health_check(&self) -> Result<HealthStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieve_query_construction() {
        let q = RetrieveQuery::new("c1", Some(1_700_000_000_000), 50);
        assert_eq!(q.conversation_id, "c1");
        assert_eq!(q.since_ms, Some(1_700_000_000_000));
        assert_eq!(q.limit, 50);
    }
}
