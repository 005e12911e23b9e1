//! The agent orchestrator: context snapshots, conversation metrics,
//! the content-generation seam and the observe/think/act/learn/adapt
//! runtime loop.

pub mod context;
pub mod generator;
pub mod metrics;
pub mod runtime;

pub use context::{AgentIdentity, ContextSnapshot};
pub use generator::{ContentGenerator, PlaceholderGenerator};
pub use metrics::{
    calculate_metrics, distance_from_targets, meets_targets, trend, ConversationMetrics, Trend,
};
pub use runtime::Agent;
