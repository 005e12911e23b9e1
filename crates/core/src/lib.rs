pub mod config;
pub mod error;
pub mod message;
pub mod retry;
pub mod types;

pub use config::{AgentConfig, TransportKind};
pub use error::{Error, Result};
pub use message::{Message, MessageDraft};
pub use retry::{with_retry, RetryPolicy};
pub use types::{AgentState, AgentStatus, ConversationInfo, Decision, HealthStatus, Participant};
