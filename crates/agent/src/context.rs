use std::collections::HashMap;

use parley_core::{AgentState, Message, Participant};
use parley_storage::WorkingMemory;

/// Tokens too common to count as conversation topics.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "been", "before", "being", "cannot", "could", "does", "doing",
    "down", "each", "from", "have", "having", "here", "into", "just", "like", "more", "most",
    "only", "other", "over", "really", "same", "should", "some", "something", "such", "than",
    "that", "their", "them", "then", "there", "these", "they", "this", "thing", "very", "view",
    "want", "well", "were", "what", "when", "where", "which", "while", "will", "with", "would",
    "your",
];

/// Who the agent is, as far as sender matching is concerned.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub handle: String,
    pub display_name: String,
}

/// Ephemeral per-tick view of the conversation. Built fresh every tick
/// from working memory and never persisted.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    /// Recent messages, oldest first.
    pub messages: Vec<Message>,
    pub participants: HashMap<String, Participant>,
    /// Most frequent non-stopword tokens appearing in at least two
    /// recent messages, capped at five.
    pub active_topics: Vec<String>,
    pub agent: AgentIdentity,
    pub state: AgentState,
}

impl ContextSnapshot {
    pub fn build(
        memory: &WorkingMemory,
        participants: HashMap<String, Participant>,
        agent: AgentIdentity,
        state: AgentState,
        recent: usize,
    ) -> Self {
        let mut messages: Vec<Message> = memory
            .get_recent(recent)
            .into_iter()
            .map(|e| e.message.clone())
            .collect();
        messages.reverse();
        let active_topics = derive_topics(&messages);
        Self {
            messages,
            participants,
            active_topics,
            agent,
            state,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True if `message` was sent by this agent: exact sender-id match,
    /// or sender name equal to the handle (case-insensitive, "@"
    /// stripped).
    pub fn is_own_message(&self, message: &Message) -> bool {
        if message.sender_id == self.agent.agent_id {
            return true;
        }
        let handle = self.agent.handle.trim_start_matches('@');
        message.sender_name.eq_ignore_ascii_case(handle)
    }
}

/// Tokens seen in at least two distinct recent messages, most frequent
/// first with the token itself as a deterministic tie-break, capped at
/// five.
fn derive_topics(messages: &[Message]) -> Vec<String> {
    let mut message_counts: HashMap<String, usize> = HashMap::new();
    for message in messages {
        let mut seen: Vec<String> = tokenize(&message.content);
        seen.sort();
        seen.dedup();
        for token in seen {
            *message_counts.entry(token).or_insert(0) += 1;
        }
    }
    let mut topics: Vec<(String, usize)> = message_counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .collect();
    topics.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    topics.truncate(5);
    topics.into_iter().map(|(token, _)| token).collect()
}

pub(crate) fn tokenize(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 4 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity() -> AgentIdentity {
        AgentIdentity {
            agent_id: "agent-1".into(),
            handle: "parley".into(),
            display_name: "Parley".into(),
        }
    }

    fn message(id: &str, sender: &str, content: &str, ts: i64) -> Message {
        let mut m = Message::new("c1", sender, content);
        m.id = id.to_string();
        m.timestamp_ms = ts;
        m
    }

    #[test]
    fn test_snapshot_messages_oldest_first() {
        let mut memory = WorkingMemory::new(50, Duration::from_secs(3600));
        let now = chrono::Utc::now().timestamp_millis();
        memory.add(message("m1", "u1", "first", now - 200));
        memory.add(message("m2", "u1", "second", now - 100));
        let snapshot = ContextSnapshot::build(
            &memory,
            HashMap::new(),
            identity(),
            AgentState::new(5000),
            50,
        );
        assert_eq!(snapshot.messages[0].id, "m1");
        assert_eq!(snapshot.messages[1].id, "m2");
    }

    #[test]
    fn test_topics_require_two_messages_and_cap() {
        let mut memory = WorkingMemory::new(50, Duration::from_secs(3600));
        let now = chrono::Utc::now().timestamp_millis();
        memory.add(message("m1", "u1", "the rustlang compiler is strict", now - 300));
        memory.add(message("m2", "u2", "rustlang lifetimes again", now - 200));
        memory.add(message("m3", "u3", "lunch anyone?", now - 100));
        let snapshot = ContextSnapshot::build(
            &memory,
            HashMap::new(),
            identity(),
            AgentState::new(5000),
            50,
        );
        assert_eq!(snapshot.active_topics, vec!["rustlang".to_string()]);
    }

    #[test]
    fn test_own_message_by_id_and_handle() {
        let memory = WorkingMemory::new(50, Duration::from_secs(3600));
        let snapshot = ContextSnapshot::build(
            &memory,
            HashMap::new(),
            identity(),
            AgentState::new(5000),
            50,
        );
        let by_id = message("m1", "agent-1", "hi", 0);
        assert!(snapshot.is_own_message(&by_id));

        let mut by_name = message("m2", "other-id", "hi", 0);
        by_name.sender_name = "PARLEY".into();
        assert!(snapshot.is_own_message(&by_name));

        let stranger = message("m3", "u9", "hi", 0);
        assert!(!snapshot.is_own_message(&stranger));
    }

    #[test]
    fn test_tokenize_filters_short_and_stopwords() {
        let tokens = tokenize("What do you think about async Rust traits?");
        assert!(tokens.contains(&"async".to_string()));
        assert!(tokens.contains(&"rust".to_string()));
        assert!(tokens.contains(&"traits".to_string()));
        assert!(!tokens.contains(&"about".to_string()));
        assert!(!tokens.contains(&"you".to_string()));
    }
}
