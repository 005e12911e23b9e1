use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One conversation message as seen by the orchestrator. Both transport
/// adapters normalize their wire formats into this shape, so everything
/// above the transport layer is adapter-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    #[serde(default = "default_language")]
    pub language: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub translations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Message {
    pub fn new(conversation_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: String::new(),
            content: content.to_string(),
            language: default_language(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            translations: HashMap::new(),
            attachments: Vec::new(),
            reply_to: None,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Content to be published. Separate from [`Message`] because the
/// transport assigns id, sender and timestamp on the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub conversation_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl MessageDraft {
    pub fn new(conversation_id: &str, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    pub fn reply(conversation_id: &str, content: &str, reply_to: &str) -> Self {
        Self {
            reply_to: Some(reply_to.to_string()),
            ..Self::new(conversation_id, content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults_on_deserialize() {
        let raw = r#"{
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "u1",
            "content": "hello",
            "timestamp_ms": 1700000000000
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.language, "en");
        assert!(msg.translations.is_empty());
        assert!(msg.attachments.is_empty());
        assert!(!msg.is_reply());
    }

    #[test]
    fn test_draft_reply_carries_reference() {
        let draft = MessageDraft::reply("c1", "sure", "m42");
        assert_eq!(draft.reply_to.as_deref(), Some("m42"));
        assert_eq!(draft.conversation_id, "c1");
    }
}
