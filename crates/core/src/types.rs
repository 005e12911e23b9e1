use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent. `Stopped` and `Error` are terminal;
/// recovery from either requires constructing a fresh agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Running,
    Paused,
    Stopped,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Stopped | AgentStatus::Error)
    }
}

/// Mutable run-time status record, owned by the orchestrator and exposed
/// read-only through a snapshot handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub started_at_ms: Option<i64>,
    pub last_activity_ms: i64,
    pub last_decision_ms: Option<i64>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub polling_interval_ms: u64,
}

impl AgentState {
    pub fn new(polling_interval_ms: u64) -> Self {
        Self {
            status: AgentStatus::Initializing,
            started_at_ms: None,
            last_activity_ms: chrono::Utc::now().timestamp_millis(),
            last_decision_ms: None,
            messages_sent: 0,
            messages_received: 0,
            errors: 0,
            polling_interval_ms,
        }
    }
}

/// Outcome of the think phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Act {
        content: String,
        reasoning: String,
        confidence: f64,
    },
    Wait {
        reasoning: String,
        confidence: f64,
    },
}

impl Decision {
    pub fn is_act(&self) -> bool {
        matches!(self, Decision::Act { .. })
    }

    pub fn reasoning(&self) -> &str {
        match self {
            Decision::Act { reasoning, .. } | Decision::Wait { reasoning, .. } => reasoning,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Decision::Act { confidence, .. } | Decision::Wait { confidence, .. } => *confidence,
        }
    }
}

/// A conversation participant as reported by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// Conversation metadata as reported by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: String,
    pub title: Option<String>,
    pub participant_count: usize,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// Result of a transport health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub detail: Option<String>,
}

impl HealthStatus {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms: Some(latency_ms),
            detail: None,
        }
    }

    pub fn unhealthy(detail: &str) -> Self {
        Self {
            healthy: false,
            latency_ms: None,
            detail: Some(detail.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(AgentStatus::Stopped.is_terminal());
        assert!(AgentStatus::Error.is_terminal());
        assert!(!AgentStatus::Paused.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
    }

    #[test]
    fn test_decision_tagged_serialization() {
        let d = Decision::Act {
            content: "hello".into(),
            reasoning: "mentioned".into(),
            confidence: 0.8,
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["decision"], "act");
        assert_eq!(v["content"], "hello");

        let w = Decision::Wait {
            reasoning: "quiet".into(),
            confidence: 0.2,
        };
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["decision"], "wait");
        assert!(v.get("content").is_none());
    }
}
