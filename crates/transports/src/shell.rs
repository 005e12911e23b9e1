use async_trait::async_trait;
use parley_core::{
    ConversationInfo, Error, HealthStatus, Message, MessageDraft, Participant, Result,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::transport::{RetrieveQuery, Transport, TransportCapabilities};

const TRANSPORT_NAME: &str = "shell";

/// Hard cap on captured tool output. The external process gets no
/// wall-clock timeout; the size cap is the only resource bound.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Markers the publish tool may print to signal success. Matched
/// case-insensitively as whole words (or word sequences), so "ok"
/// inside "token" or "broken" does not count.
const SUCCESS_MARKERS: &[&str] = &["success", "message sent", "published", "ok"];

fn has_success_marker(output: &str) -> bool {
    let words: Vec<String> = output
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    SUCCESS_MARKERS.iter().any(|marker| {
        let marker_words: Vec<&str> = marker.split_whitespace().collect();
        words
            .windows(marker_words.len())
            .any(|window| window.iter().map(String::as_str).eq(marker_words.iter().copied()))
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShellSender {
    Name(String),
    Full { id: String, #[serde(default)] name: String },
}

impl ShellSender {
    fn into_parts(self) -> (String, String) {
        match self {
            ShellSender::Name(name) => (name.clone(), name),
            ShellSender::Full { id, name } => {
                let display = if name.is_empty() { id.clone() } else { name };
                (id, display)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ShellTimestamp {
    Millis(i64),
    Text(String),
}

impl ShellTimestamp {
    fn into_millis(self) -> i64 {
        match self {
            ShellTimestamp::Millis(ms) => ms,
            ShellTimestamp::Text(s) => chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellMessage {
    id: String,
    content: String,
    timestamp: ShellTimestamp,
    sender: ShellSender,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    translations: HashMap<String, String>,
    #[serde(default)]
    attachments: Vec<String>,
    #[serde(default)]
    reply_to: Option<String>,
}

impl ShellMessage {
    fn into_message(self, conversation_id: &str) -> Message {
        let (sender_id, sender_name) = self.sender.into_parts();
        Message {
            id: self.id,
            conversation_id: conversation_id.to_string(),
            sender_id,
            sender_name,
            content: self.content,
            language: self.language.unwrap_or_else(|| "en".to_string()),
            timestamp_ms: self.timestamp.into_millis(),
            translations: self.translations,
            attachments: self.attachments,
            reply_to: self.reply_to,
        }
    }
}

/// Extract the first bracketed JSON array from output that may interleave
/// log lines with the payload. Tracks string literals and escapes so
/// brackets inside message content do not truncate the array; candidates
/// that do not parse as JSON (log text like "[stage 1]") are skipped.
fn extract_json_array(output: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(found) = output[search_from..].find('[') {
        let start = search_from + found;
        if let Some(candidate) = balanced_bracket_slice(&output[start..]) {
            if serde_json::from_str::<serde_json::Value>(candidate)
                .map(|v| v.is_array())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        search_from = start + 1;
    }
    None
}

fn balanced_bracket_slice(from_bracket: &str) -> Option<&str> {
    let bytes = from_bracket.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' if !in_string => depth += 1,
            b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&from_bracket[..offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Shell-mediated transport adapter. Retrieval and publishing are
/// delegated to two external executables; credentials are passed on
/// every invocation rather than exchanged for a session.
pub struct ShellTransport {
    fetch_command: String,
    send_command: String,
    base_url: String,
    username: String,
    password: String,
    connected: AtomicBool,
    capabilities: TransportCapabilities,
}

impl ShellTransport {
    pub fn new(
        fetch_command: &str,
        send_command: &str,
        base_url: &str,
        username: &str,
        password: &str,
        messages_per_minute: u32,
    ) -> Self {
        Self {
            fetch_command: fetch_command.to_string(),
            send_command: send_command.to_string(),
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            connected: AtomicBool::new(false),
            capabilities: TransportCapabilities {
                can_edit: false,
                can_delete: false,
                // Local substring filter over a fetch, not a service query.
                can_search: true,
                realtime: false,
                messages_per_minute,
                messages_per_hour: messages_per_minute.saturating_mul(60),
                messages_per_day: messages_per_minute.saturating_mul(60 * 24),
            },
        }
    }

    fn credential_args(&self, conversation_id: &str) -> Vec<String> {
        vec![
            "--username".into(),
            self.username.clone(),
            "--password".into(),
            self.password.clone(),
            "--conversation".into(),
            conversation_id.to_string(),
            "--base-url".into(),
            self.base_url.clone(),
            "--format".into(),
            "json".into(),
        ]
    }

    /// Run one of the external tools and capture its stdout, truncated at
    /// the output cap. The tool's own retry behavior is trusted; no
    /// structured retry happens at this layer.
    async fn run_tool(&self, command: &str, args: &[String]) -> Result<String> {
        debug!(command, "Invoking external tool");
        let output = Command::new(command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::transport(TRANSPORT_NAME, format!("failed to run {}: {}", command, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::transport(
                TRANSPORT_NAME,
                format!(
                    "{} exited with {:?}: {}",
                    command,
                    output.status.code(),
                    stderr.chars().take(200).collect::<String>()
                ),
            ));
        }

        let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stdout.len() > MAX_OUTPUT_BYTES {
            warn!(command, bytes = stdout.len(), "Tool output truncated at cap");
            let mut cut = MAX_OUTPUT_BYTES;
            while !stdout.is_char_boundary(cut) {
                cut -= 1;
            }
            stdout.truncate(cut);
        }
        Ok(stdout)
    }

    async fn fetch_all(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let args = self.credential_args(conversation_id);
        let stdout = self.run_tool(&self.fetch_command, &args).await?;
        let payload = extract_json_array(&stdout).ok_or_else(|| {
            Error::transport(TRANSPORT_NAME, "no JSON array found in retrieval tool output")
        })?;
        let raw: Vec<ShellMessage> = serde_json::from_str(payload).map_err(|e| {
            Error::transport(TRANSPORT_NAME, format!("invalid message payload: {}", e))
        })?;
        Ok(raw
            .into_iter()
            .map(|m| m.into_message(conversation_id))
            .collect())
    }
}

#[async_trait]
impl Transport for ShellTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn initialize(&self) -> Result<()> {
        for command in [&self.fetch_command, &self.send_command] {
            tokio::fs::metadata(command).await.map_err(|_| {
                Error::Config(format!("external tool not found: {}", command))
            })?;
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(
            fetch = %self.fetch_command,
            send = %self.send_command,
            "Shell transport initialized"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Shell transport shut down");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn retrieve_messages(&self, query: &RetrieveQuery) -> Result<Vec<Message>> {
        let mut messages = self.fetch_all(&query.conversation_id).await?;
        if let Some(since) = query.since_ms {
            messages.retain(|m| m.timestamp_ms > since);
        }
        messages.sort_by_key(|m| m.timestamp_ms);
        if messages.len() > query.limit {
            // Keep the newest `limit` messages.
            messages.drain(..messages.len() - query.limit);
        }
        Ok(messages)
    }

    async fn publish_message(&self, draft: &MessageDraft) -> Result<Message> {
        let mut args = self.credential_args(&draft.conversation_id);
        args.push("--message".into());
        args.push(draft.content.clone());
        if let Some(reply_to) = &draft.reply_to {
            args.push("--reply-to".into());
            args.push(reply_to.clone());
        }
        let stdout = self.run_tool(&self.send_command, &args).await?;
        if !has_success_marker(&stdout) {
            return Err(Error::transport(
                TRANSPORT_NAME,
                format!(
                    "publish tool reported no success marker: {}",
                    stdout.chars().take(200).collect::<String>()
                ),
            ));
        }
        let mut message = Message::new(&draft.conversation_id, &self.username, &draft.content);
        message.reply_to = draft.reply_to.clone();
        Ok(message)
    }

    async fn edit_message(&self, _: &str, _: &str, _: &str) -> Result<Message> {
        Err(Error::Unsupported("shell transport cannot edit messages".into()))
    }

    async fn delete_message(&self, _: &str, _: &str) -> Result<()> {
        Err(Error::Unsupported("shell transport cannot delete messages".into()))
    }

    async fn conversation_info(&self, conversation_id: &str) -> Result<ConversationInfo> {
        let messages = self.fetch_all(conversation_id).await?;
        let mut senders: Vec<&str> = messages.iter().map(|m| m.sender_id.as_str()).collect();
        senders.sort_unstable();
        senders.dedup();
        let mut languages: Vec<String> = messages.iter().map(|m| m.language.clone()).collect();
        languages.sort_unstable();
        languages.dedup();
        Ok(ConversationInfo {
            id: conversation_id.to_string(),
            title: None,
            participant_count: senders.len(),
            languages,
        })
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        let messages = self.fetch_all(conversation_id).await?;
        let mut seen: HashMap<String, String> = HashMap::new();
        for m in &messages {
            seen.entry(m.sender_id.clone())
                .or_insert_with(|| m.sender_name.clone());
        }
        let mut participants: Vec<Participant> = seen
            .into_iter()
            .map(|(id, name)| Participant {
                id,
                name,
                is_bot: false,
            })
            .collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(participants)
    }

    async fn search_messages(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Message> = self
            .fetch_all(conversation_id)
            .await?
            .into_iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }

    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        for command in [&self.fetch_command, &self.send_command] {
            if tokio::fs::metadata(command).await.is_err() {
                return Ok(HealthStatus::unhealthy(&format!(
                    "external tool missing: {}",
                    command
                )));
            }
        }
        Ok(HealthStatus::healthy(started.elapsed().as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_array_from_mixed_output() {
        let output = "2024-01-01 INFO fetching...\n[{\"id\": \"m1\"}]\ndone\n";
        assert_eq!(extract_json_array(output), Some("[{\"id\": \"m1\"}]"));
    }

    #[test]
    fn test_extract_array_skips_log_brackets() {
        let output = "INFO [stage one] fetching\n[{\"id\": \"m1\", \"content\": \"see ] here\"}]\n";
        let got = extract_json_array(output).unwrap();
        assert_eq!(got, "[{\"id\": \"m1\", \"content\": \"see ] here\"}]");
    }

    #[test]
    fn test_extract_array_handles_escaped_quotes() {
        let output = r#"[{"id": "m1", "content": "quote \" and bracket ["}]"#;
        let got = extract_json_array(output).unwrap();
        assert_eq!(got, output);
    }

    #[test]
    fn test_extract_array_none_when_unbalanced() {
        assert!(extract_json_array("no array here").is_none());
        assert!(extract_json_array("[{\"id\": \"m1\"}").is_none());
    }

    #[test]
    fn test_shell_message_sender_shapes() {
        let raw = r#"[
            {"id": "m1", "content": "hi", "timestamp": 1700000000000, "sender": "ada", "language": "en"},
            {"id": "m2", "content": "yo", "timestamp": "2024-01-15T10:30:00Z", "sender": {"id": "u2", "name": "Grace"}}
        ]"#;
        let parsed: Vec<ShellMessage> = serde_json::from_str(raw).unwrap();
        let m1 = parsed
            .into_iter()
            .map(|m| m.into_message("c1"))
            .collect::<Vec<_>>();
        assert_eq!(m1[0].sender_id, "ada");
        assert_eq!(m1[0].sender_name, "ada");
        assert_eq!(m1[1].sender_id, "u2");
        assert_eq!(m1[1].sender_name, "Grace");
        assert!(m1[1].timestamp_ms > 0);
        assert_eq!(m1[1].language, "en");
    }

    #[test]
    fn test_capabilities_declare_unsupported_ops() {
        let t = ShellTransport::new("/bin/fetch", "/bin/send", "http://x", "u", "p", 10);
        let caps = t.capabilities();
        assert!(!caps.can_edit);
        assert!(!caps.can_delete);
        assert!(!caps.realtime);
        assert!(caps.can_search);
    }

    #[test]
    fn test_success_marker_detection() {
        assert!(has_success_marker("2024-01-01 sent message OK"));
        assert!(has_success_marker("Message sent successfully"));
        assert!(has_success_marker("result: published"));
        assert!(!has_success_marker("error: refused"));
    }

    #[test]
    fn test_failure_output_is_not_a_success() {
        // "ok" buried inside "token"/"broken" and "sent" preceded by
        // "not" must not read as success.
        assert!(!has_success_marker("error: invalid token, message not sent"));
        assert!(!has_success_marker("send failed: broken pipe"));
        assert!(!has_success_marker("unsuccessful delivery"));
    }
}
