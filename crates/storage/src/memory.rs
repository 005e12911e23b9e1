use chrono::Utc;
use parley_core::{Error, Message, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// A message plus bookkeeping. Owned exclusively by [`WorkingMemory`];
/// mutated only when accessed (counters) or evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub message: Message,
    /// Free-form analysis attached after ingest (topics, sentiment, ...).
    pub analysis: Option<serde_json::Value>,
    pub inserted_at_ms: i64,
    pub access_count: u64,
    pub last_access_ms: Option<i64>,
    /// Strictly increasing per store; breaks timestamp ties in favor of
    /// the later insertion.
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub unique_conversations: usize,
    pub unique_senders: usize,
    pub average_age_ms: i64,
    pub oldest_timestamp_ms: Option<i64>,
    pub newest_timestamp_ms: Option<i64>,
}

/// Bounded, queryable short-term store of recently seen messages.
///
/// Each orchestrator owns a private instance. Maintenance runs after
/// every insert: entries past `max_age` are dropped first, then the
/// newest `max_entries` by timestamp are kept. Linear scans throughout;
/// the intended scale is low hundreds of entries.
pub struct WorkingMemory {
    entries: Vec<MemoryEntry>,
    max_entries: usize,
    max_age: Duration,
    next_seq: u64,
}

impl WorkingMemory {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
            max_age,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.iter().any(|e| e.message.id == message_id)
    }

    /// Append a message. Does NOT deduplicate by message id; callers are
    /// expected to check [`WorkingMemory::contains`] first. Triggers
    /// maintenance.
    pub fn add(&mut self, message: Message) {
        let entry = MemoryEntry {
            message,
            analysis: None,
            inserted_at_ms: Utc::now().timestamp_millis(),
            access_count: 0,
            last_access_ms: None,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.push(entry);
        self.cleanup();
    }

    pub fn add_many(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.add(message);
        }
    }

    /// Look up by message id; bumps the access counter and last-access
    /// time as a side effect.
    pub fn get(&mut self, message_id: &str) -> Option<&MemoryEntry> {
        let idx = self.entries.iter().position(|e| e.message.id == message_id)?;
        let entry = &mut self.entries[idx];
        entry.access_count += 1;
        entry.last_access_ms = Some(Utc::now().timestamp_millis());
        Some(&self.entries[idx])
    }

    /// The `n` most recent entries, timestamp descending with the
    /// insertion sequence as a deterministic tie-break (later insertion
    /// wins).
    pub fn get_recent(&self, n: usize) -> Vec<&MemoryEntry> {
        let mut sorted: Vec<&MemoryEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            b.message
                .timestamp_ms
                .cmp(&a.message.timestamp_ms)
                .then(b.seq.cmp(&a.seq))
        });
        sorted.truncate(n);
        sorted
    }

    pub fn get_by_conversation(&self, conversation_id: &str) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.message.conversation_id == conversation_id)
            .collect()
    }

    pub fn get_by_user(&self, sender_id: &str) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.message.sender_id == sender_id)
            .collect()
    }

    pub fn get_by_time_range(&self, start_ms: i64, end_ms: i64) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.message.timestamp_ms >= start_ms && e.message.timestamp_ms <= end_ms)
            .collect()
    }

    /// Case-insensitive substring search over message content.
    pub fn search(&self, query: &str) -> Vec<&MemoryEntry> {
        let needle = query.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.message.content.to_lowercase().contains(&needle))
            .collect()
    }

    /// Attach or replace analysis on an existing entry.
    pub fn update_analysis(&mut self, message_id: &str, analysis: serde_json::Value) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.message.id == message_id)
            .ok_or_else(|| Error::Memory(format!("no entry for message '{}'", message_id)))?;
        entry.analysis = Some(analysis);
        Ok(())
    }

    pub fn remove(&mut self, message_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.message.id != message_id);
        self.entries.len() != before
    }

    pub fn remove_by_conversation(&mut self, conversation_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.message.conversation_id != conversation_id);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Manual pruning of low-value entries: never accessed and older
    /// than half the max age.
    pub fn compact(&mut self) -> usize {
        let threshold_ms = Utc::now().timestamp_millis() - (self.max_age.as_millis() as i64) / 2;
        let before = self.entries.len();
        self.entries
            .retain(|e| e.access_count > 0 || e.message.timestamp_ms >= threshold_ms);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Compacted working memory");
        }
        removed
    }

    pub fn stats(&self) -> MemoryStats {
        let now = Utc::now().timestamp_millis();
        let conversations: HashSet<&str> = self
            .entries
            .iter()
            .map(|e| e.message.conversation_id.as_str())
            .collect();
        let senders: HashSet<&str> = self
            .entries
            .iter()
            .map(|e| e.message.sender_id.as_str())
            .collect();
        let average_age_ms = if self.entries.is_empty() {
            0
        } else {
            let total: i64 = self
                .entries
                .iter()
                .map(|e| (now - e.message.timestamp_ms).max(0))
                .sum();
            total / self.entries.len() as i64
        };
        MemoryStats {
            total_entries: self.entries.len(),
            unique_conversations: conversations.len(),
            unique_senders: senders.len(),
            average_age_ms,
            oldest_timestamp_ms: self.entries.iter().map(|e| e.message.timestamp_ms).min(),
            newest_timestamp_ms: self.entries.iter().map(|e| e.message.timestamp_ms).max(),
        }
    }

    /// Maintenance pass, run after every add: age filter first, then
    /// size cap (keep newest by timestamp).
    fn cleanup(&mut self) {
        let cutoff_ms = Utc::now().timestamp_millis() - self.max_age.as_millis() as i64;
        self.entries.retain(|e| e.message.timestamp_ms >= cutoff_ms);

        if self.entries.len() > self.max_entries {
            self.entries.sort_by(|a, b| {
                b.message
                    .timestamp_ms
                    .cmp(&a.message.timestamp_ms)
                    .then(b.seq.cmp(&a.seq))
            });
            self.entries.truncate(self.max_entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, timestamp_ms: i64) -> Message {
        let mut m = Message::new("c1", "u1", &format!("content of {}", id));
        m.id = id.to_string();
        m.timestamp_ms = timestamp_ms;
        m
    }

    fn fresh_now() -> i64 {
        Utc::now().timestamp_millis()
    }

    #[test]
    fn test_cap_evicts_oldest() {
        // Scenario: 3-entry cap, 1-hour max age, 4 inserts with
        // increasing timestamps -> oldest is evicted.
        let mut mem = WorkingMemory::new(3, Duration::from_secs(3600));
        let now = fresh_now();
        for (i, id) in ["m1", "m2", "m3", "m4"].iter().enumerate() {
            mem.add(message(id, now - 1000 + i as i64));
        }
        assert_eq!(mem.len(), 3);
        assert!(!mem.contains("m1"));
        assert!(mem.contains("m2"));
        assert!(mem.contains("m4"));
    }

    #[test]
    fn test_age_eviction() {
        let mut mem = WorkingMemory::new(100, Duration::from_secs(3600));
        let now = fresh_now();
        mem.add(message("old", now - 2 * 3600 * 1000));
        mem.add(message("new", now));
        assert_eq!(mem.len(), 1);
        assert!(mem.contains("new"));
    }

    #[test]
    fn test_cap_never_exceeded_over_many_inserts() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        let now = fresh_now();
        for i in 0..50 {
            mem.add(message(&format!("m{}", i), now - 500 + i));
            assert!(mem.len() <= 10);
        }
        assert_eq!(mem.len(), 10);
    }

    #[test]
    fn test_get_recent_order_and_tie_break() {
        let mut mem = WorkingMemory::new(100, Duration::from_secs(3600));
        let now = fresh_now();
        mem.add(message("a", now - 100));
        mem.add(message("tie1", now - 50));
        mem.add(message("tie2", now - 50)); // same timestamp, later insertion
        mem.add(message("b", now - 10));
        let recent: Vec<&str> = mem
            .get_recent(4)
            .iter()
            .map(|e| e.message.id.as_str())
            .collect();
        assert_eq!(recent, vec!["b", "tie2", "tie1", "a"]);
        // Prefix property: get_recent(2) is a prefix of get_recent(4).
        let top2: Vec<&str> = mem
            .get_recent(2)
            .iter()
            .map(|e| e.message.id.as_str())
            .collect();
        assert_eq!(top2, vec!["b", "tie2"]);
    }

    #[test]
    fn test_access_count_increments_per_get() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        mem.add(message("m1", fresh_now()));
        for _ in 0..3 {
            assert!(mem.get("m1").is_some());
        }
        let entry = mem.get("m1").unwrap();
        assert_eq!(entry.access_count, 4);
        assert!(entry.last_access_ms.is_some());
    }

    #[test]
    fn test_update_analysis_missing_entry_fails() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        let err = mem
            .update_analysis("ghost", serde_json::json!({"topics": []}))
            .unwrap_err();
        assert_eq!(err.code(), "memory");
        assert!(err.recoverable());
    }

    #[test]
    fn test_update_analysis_attaches_value() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        mem.add(message("m1", fresh_now()));
        mem.update_analysis("m1", serde_json::json!({"sentiment": 0.4}))
            .unwrap();
        let entry = mem.get("m1").unwrap();
        assert_eq!(entry.analysis.as_ref().unwrap()["sentiment"], 0.4);
    }

    #[test]
    fn test_search_and_filters() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        let now = fresh_now();
        let mut m = message("m1", now - 100);
        m.content = "Rust borrow checker".into();
        mem.add(m);
        let mut m = message("m2", now);
        m.sender_id = "u2".into();
        m.content = "lunch plans?".into();
        mem.add(m);

        assert_eq!(mem.search("BORROW").len(), 1);
        assert_eq!(mem.get_by_user("u2").len(), 1);
        assert_eq!(mem.get_by_conversation("c1").len(), 2);
        assert_eq!(mem.get_by_time_range(now - 10, now).len(), 1);
    }

    #[test]
    fn test_compact_drops_unaccessed_old_entries() {
        let mut mem = WorkingMemory::new(100, Duration::from_secs(3600));
        let now = fresh_now();
        mem.add(message("stale", now - 40 * 60 * 1000)); // 40min, past half age
        mem.add(message("accessed", now - 40 * 60 * 1000));
        mem.add(message("fresh", now));
        mem.get("accessed");
        let removed = mem.compact();
        assert_eq!(removed, 1);
        assert!(!mem.contains("stale"));
        assert!(mem.contains("accessed"));
        assert!(mem.contains("fresh"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        let now = fresh_now();
        mem.add(message("m1", now));
        let mut other = message("m2", now);
        other.conversation_id = "c2".into();
        mem.add(other);

        assert!(mem.remove("m1"));
        assert!(!mem.remove("m1"));
        assert_eq!(mem.remove_by_conversation("c2"), 1);
        assert!(mem.is_empty());

        mem.add(message("m3", now));
        mem.clear();
        assert!(mem.is_empty());
    }

    #[test]
    fn test_stats() {
        let mut mem = WorkingMemory::new(10, Duration::from_secs(3600));
        let now = fresh_now();
        mem.add(message("m1", now - 1000));
        let mut m = message("m2", now);
        m.sender_id = "u2".into();
        mem.add(m);
        let stats = mem.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.unique_conversations, 1);
        assert_eq!(stats.unique_senders, 2);
        assert_eq!(stats.oldest_timestamp_ms, Some(now - 1000));
        assert_eq!(stats.newest_timestamp_ms, Some(now));
        assert!(stats.average_age_ms >= 500);
    }
}
