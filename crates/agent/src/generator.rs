use async_trait::async_trait;
use parley_core::Result;

use crate::context::ContextSnapshot;

/// Pluggable content generation seam. Real natural-language generation
/// lives behind this trait in host processes; the engine itself ships
/// only the deterministic placeholder.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, snapshot: &ContextSnapshot, reasoning: &str) -> Result<String>;
}

/// Deterministic template generator keyed by the personality knobs.
pub struct PlaceholderGenerator {
    formality: f64,
    style: String,
}

impl PlaceholderGenerator {
    pub fn new(formality: f64, style: &str) -> Self {
        Self {
            formality,
            style: style.to_string(),
        }
    }

    fn formal(&self) -> bool {
        self.formality >= 0.6
    }
}

#[async_trait]
impl ContentGenerator for PlaceholderGenerator {
    async fn generate(&self, snapshot: &ContextSnapshot, reasoning: &str) -> Result<String> {
        let topic = snapshot.active_topics.first().map(String::as_str);
        let content = match (self.formal(), topic) {
            (true, Some(topic)) => format!(
                "Regarding the ongoing discussion about {}: I would be glad to contribute further.",
                topic
            ),
            (true, None) => {
                "I am following this conversation and happy to help where useful.".to_string()
            }
            (false, Some(topic)) => format!("Interesting points about {}, count me in!", topic),
            (false, None) => "Happy to jump in here!".to_string(),
        };
        tracing::debug!(style = %self.style, reasoning = %reasoning, "Generated placeholder content");
        Ok(content)
    }
}
