use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parley_core::Message;
use serde::{Deserialize, Serialize};

use crate::context::{tokenize, ContextSnapshot};

const HOUR_MS: i64 = 3_600_000;
const GAP_THRESHOLD_MS: i64 = 30 * 60 * 1000;

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "love", "nice", "thanks", "thank", "awesome", "excellent", "happy", "agree",
    "perfect", "yes",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hate", "wrong", "terrible", "awful", "annoying", "broken", "problem", "disagree",
    "sorry", "no",
];

/// Scored view of one context snapshot. Recomputed every tick and not
/// retained; trend helpers take history supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub density: f64,
    pub quality: f64,
    pub message_frequency: f64,
    pub continuity: f64,
    pub participation: f64,
    pub content_quality: f64,
    pub topic_coherence: f64,
    pub engagement: f64,
    /// Raw keyword sentiment in [-1, 1].
    pub sentiment: f64,
    pub diversity: f64,
    pub average_reply_depth: f64,
    pub active_topic_count: usize,
    /// Fraction of recent messages sent by the agent itself.
    pub agent_contribution_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Score a snapshot. All outputs are clamped to [0, 1] (sentiment to
/// [-1, 1]); an empty snapshot yields density 0 and a quality built
/// from neutral defaults, never NaN.
pub fn calculate_metrics(snapshot: &ContextSnapshot) -> ConversationMetrics {
    let messages = &snapshot.messages;
    let now = Utc::now().timestamp_millis();

    let last_hour: Vec<&Message> = messages
        .iter()
        .filter(|m| now - m.timestamp_ms <= HOUR_MS)
        .collect();

    let message_frequency = clamp01(last_hour.len() as f64 / 20.0);
    let continuity = continuity_score(messages);
    let participation = participation_score(&last_hour, snapshot.participants.len());
    let density = clamp01(0.5 * message_frequency + 0.3 * continuity + 0.2 * participation);

    let content_quality = content_quality_score(messages);
    let topic_coherence = coherence_score(messages, &snapshot.active_topics);
    let engagement = if messages.is_empty() {
        0.0
    } else {
        messages.iter().filter(|m| m.is_reply()).count() as f64 / messages.len() as f64
    };
    let sentiment = sentiment_score(messages);
    let normalized_sentiment = (sentiment + 1.0) / 2.0;
    let diversity = diversity_score(messages, snapshot.active_topics.len());
    let quality = clamp01(
        0.3 * content_quality
            + 0.25 * topic_coherence
            + 0.2 * engagement
            + 0.15 * normalized_sentiment
            + 0.1 * diversity,
    );

    let own = messages.iter().filter(|m| snapshot.is_own_message(m)).count();
    let agent_contribution_rate = if messages.is_empty() {
        0.0
    } else {
        own as f64 / messages.len() as f64
    };

    ConversationMetrics {
        density,
        quality,
        message_frequency,
        continuity,
        participation,
        content_quality,
        topic_coherence,
        engagement,
        sentiment,
        diversity,
        average_reply_depth: average_reply_depth(messages),
        active_topic_count: snapshot.active_topics.len(),
        agent_contribution_rate,
    }
}

/// 1 minus the fraction of consecutive gaps exceeding 30 minutes. Zero
/// for an empty snapshot so density stays at 0; a single message has no
/// gaps and counts as fully continuous.
fn continuity_score(messages: &[Message]) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    if messages.len() == 1 {
        return 1.0;
    }
    let long_gaps = messages
        .windows(2)
        .filter(|pair| pair[1].timestamp_ms - pair[0].timestamp_ms > GAP_THRESHOLD_MS)
        .count();
    clamp01(1.0 - long_gaps as f64 / (messages.len() - 1) as f64)
}

fn participation_score(last_hour: &[&Message], known_participants: usize) -> f64 {
    if known_participants == 0 {
        return 0.0;
    }
    let active: HashSet<&str> = last_hour.iter().map(|m| m.sender_id.as_str()).collect();
    clamp01(active.len() as f64 / known_participants as f64)
}

/// Per-message blend of length bucket, lexical variety, and terminal
/// punctuation, averaged. Neutral 0.5 with no messages.
fn content_quality_score(messages: &[Message]) -> f64 {
    if messages.is_empty() {
        return 0.5;
    }
    let total: f64 = messages
        .iter()
        .map(|m| {
            let len = m.content.chars().count();
            let length_score = if len < 10 {
                0.2
            } else if len <= 100 {
                0.7
            } else if len <= 500 {
                1.0
            } else {
                0.5
            };
            let tokens = tokenize(&m.content);
            let variety = if tokens.is_empty() {
                0.0
            } else {
                let unique: HashSet<&String> = tokens.iter().collect();
                unique.len() as f64 / tokens.len() as f64
            };
            let punctuation = if m.content.trim_end().ends_with(['.', '!', '?']) {
                1.0
            } else {
                0.5
            };
            0.5 * length_score + 0.3 * variety + 0.2 * punctuation
        })
        .sum();
    clamp01(total / messages.len() as f64)
}

/// Fraction of messages matching any active-topic keyword; neutral 0.5
/// when no topics are active.
fn coherence_score(messages: &[Message], topics: &[String]) -> f64 {
    if topics.is_empty() || messages.is_empty() {
        return 0.5;
    }
    let matching = messages
        .iter()
        .filter(|m| {
            let content = m.content.to_lowercase();
            topics.iter().any(|t| content.contains(t.as_str()))
        })
        .count();
    clamp01(matching as f64 / messages.len() as f64)
}

/// Keyword-counted sentiment in [-1, 1]; 0 with no hits or no messages.
fn sentiment_score(messages: &[Message]) -> f64 {
    let mut positive = 0usize;
    let mut negative = 0usize;
    for message in messages {
        for token in tokenize_all(&message.content) {
            if POSITIVE_WORDS.contains(&token.as_str()) {
                positive += 1;
            } else if NEGATIVE_WORDS.contains(&token.as_str()) {
                negative += 1;
            }
        }
    }
    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    let score = (positive as f64 - negative as f64) / total as f64;
    score.clamp(-1.0, 1.0)
}

/// Like [`tokenize`] but without the length/stopword filter, so short
/// sentiment words ("yes", "no", "bad") are kept.
fn tokenize_all(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Blend of distinct-sender ratio and active-topic count capped at 5.
fn diversity_score(messages: &[Message], topic_count: usize) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    let senders: HashSet<&str> = messages.iter().map(|m| m.sender_id.as_str()).collect();
    let sender_ratio = senders.len() as f64 / messages.len() as f64;
    let topic_ratio = topic_count.min(5) as f64 / 5.0;
    clamp01(0.5 * sender_ratio + 0.5 * topic_ratio)
}

/// Average reply-chain depth: a standalone message has depth 1, a reply
/// to a message in the snapshot has its parent's depth plus one.
fn average_reply_depth(messages: &[Message]) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    let by_id: HashMap<&str, &Message> = messages.iter().map(|m| (m.id.as_str(), m)).collect();
    let total: usize = messages.iter().map(|m| chain_depth(m, &by_id, 0)).sum();
    total as f64 / messages.len() as f64
}

fn chain_depth(message: &Message, by_id: &HashMap<&str, &Message>, hops: usize) -> usize {
    // Depth is bounded by the snapshot size; the hop cap guards against
    // a reply cycle in malformed input.
    if hops >= by_id.len() {
        return hops + 1;
    }
    match message.reply_to.as_deref().and_then(|id| by_id.get(id)) {
        Some(parent) => 1 + chain_depth(parent, by_id, hops + 1),
        None => 1,
    }
}

/// Both scores at or above their targets; equality counts as met.
pub fn meets_targets(metrics: &ConversationMetrics, density_target: f64, quality_target: f64) -> bool {
    metrics.density >= density_target && metrics.quality >= quality_target
}

/// Euclidean distance from the target point in density/quality space.
pub fn distance_from_targets(
    metrics: &ConversationMetrics,
    density_target: f64,
    quality_target: f64,
) -> f64 {
    let dd = metrics.density - density_target;
    let dq = metrics.quality - quality_target;
    (dd * dd + dq * dq).sqrt()
}

/// Compare the mean of the last three values against the mean of the
/// three before them, with a ±0.05 hysteresis band. Histories shorter
/// than six samples read as stable.
pub fn trend(history: &[f64]) -> Trend {
    if history.len() < 6 {
        return Trend::Stable;
    }
    let recent: f64 = history[history.len() - 3..].iter().sum::<f64>() / 3.0;
    let prior: f64 = history[history.len() - 6..history.len() - 3].iter().sum::<f64>() / 3.0;
    let delta = recent - prior;
    if delta > 0.05 {
        Trend::Improving
    } else if delta < -0.05 {
        Trend::Declining
    } else {
        Trend::Stable
    }
}
