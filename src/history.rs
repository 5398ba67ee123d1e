use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::protocol::message::{ContentBlock, Message, Role};

const INSTRUCTION_PREVIEW_LEN: usize = 100;

/// Metadata recorded alongside each persisted snapshot, keyed by save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub timestamp: String,
    pub message_count: usize,
    pub estimated_tokens: Option<u64>,
    pub instruction: String,
}

/// Owns the ordered message log for one run session: append, truncation for
/// transmission, tool_use/tool_result pairing repair, disk snapshots and
/// id-based retrieval.
pub struct HistoryManager {
    session_id: String,
    instructions: String,
    messages: Vec<Message>,
    /// id -> position side table for O(1) retrieval.
    id_index: HashMap<String, usize>,
    history_file: PathBuf,
    index_file: PathBuf,
    index: BTreeMap<String, IndexRecord>,
}

impl HistoryManager {
    /// One snapshot file set per run session, keyed by the run start time.
    pub fn new(data_dir: Option<PathBuf>) -> PilotResult<Self> {
        let dir = data_dir
            .or_else(|| dirs::data_local_dir().map(|d| d.join("screenpilot").join("history")))
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let session_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let history_file = dir.join(format!("session_{session_id}_history.json"));
        let index_file = dir.join(format!("session_{session_id}_index.json"));
        tracing::info!(session = %session_id, path = %history_file.display(), "history session opened");

        Ok(Self {
            session_id,
            instructions: String::new(),
            messages: Vec::new(),
            id_index: HashMap::new(),
            history_file,
            index_file,
            index: BTreeMap::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Reset the log for a fresh run and seed it with the task instruction.
    pub fn begin_run(&mut self, instructions: &str) {
        self.instructions = instructions.to_string();
        self.messages.clear();
        self.id_index.clear();
        self.append(Message::text(Role::User, instructions));
    }

    /// Append a message, assigning a synthetic `{role}_{session}_{index}` id
    /// when it arrives without one. Messages are immutable after this point.
    pub fn append(&mut self, mut message: Message) -> &Message {
        let position = self.messages.len();
        if message.id.is_none() {
            message.id = Some(format!(
                "{}_{}_{}",
                message.role.as_str(),
                self.session_id,
                position
            ));
        }
        if let Some(id) = &message.id {
            self.id_index.insert(id.clone(), position);
        }
        self.messages.push(message);
        &self.messages[position]
    }

    /// Transmit-ready view: full history while short; beyond the threshold,
    /// the first message (task framing) plus a synthetic summary notice plus
    /// the most recent `ceil(threshold * keep_ratio)` messages (at least 3).
    pub fn transmit_slice(&self, threshold: usize, keep_ratio: f64) -> Vec<Message> {
        if self.messages.len() <= threshold {
            return self.messages.clone();
        }

        let recent_count = ((threshold as f64 * keep_ratio).ceil() as usize)
            .max(3)
            .min(self.messages.len() - 1);
        let recent_start = self.messages.len() - recent_count;
        let dropped = &self.messages[1..recent_start];

        let notice = Message::text(
            Role::System,
            format!(
                "Some earlier conversation history ({} messages) has been summarized \
                 for brevity: {} If needed, complete messages can be retrieved from \
                 local storage.",
                dropped.len(),
                summarize_dropped(dropped),
            ),
        );

        tracing::info!(
            from = self.messages.len(),
            to = 2 + recent_count,
            dropped = dropped.len(),
            "truncated conversation history for transmission"
        );

        let mut slice = Vec::with_capacity(2 + recent_count);
        slice.push(self.messages[0].clone());
        slice.push(notice);
        slice.extend_from_slice(&self.messages[recent_start..]);
        slice
    }

    /// Serialize the full in-memory sequence plus an index record. Failures
    /// are logged and absorbed; the in-memory history stays authoritative.
    pub fn persist(&mut self, estimated_tokens: Option<u64>) {
        if let Err(err) = self.write_snapshot(estimated_tokens) {
            tracing::error!(error = %err, "failed to save history to disk");
        }
    }

    fn write_snapshot(&mut self, estimated_tokens: Option<u64>) -> PilotResult<()> {
        let payload = serde_json::to_string(&self.messages)?;
        std::fs::write(&self.history_file, payload)
            .map_err(|e| PilotError::Storage(format!("{}: {e}", self.history_file.display())))?;

        let timestamp = chrono::Utc::now().to_rfc3339();
        let instruction = if self.instructions.len() > INSTRUCTION_PREVIEW_LEN {
            let cut = self
                .instructions
                .char_indices()
                .take_while(|(i, _)| *i < INSTRUCTION_PREVIEW_LEN)
                .map(|(i, c)| i + c.len_utf8())
                .last()
                .unwrap_or(0);
            format!("{}...", &self.instructions[..cut])
        } else {
            self.instructions.clone()
        };
        self.index.insert(
            timestamp.clone(),
            IndexRecord {
                timestamp,
                message_count: self.messages.len(),
                estimated_tokens,
                instruction,
            },
        );
        let index_payload = serde_json::to_string_pretty(&self.index)?;
        std::fs::write(&self.index_file, index_payload)
            .map_err(|e| PilotError::Storage(format!("{}: {e}", self.index_file.display())))?;

        tracing::debug!(
            messages = self.messages.len(),
            tokens = ?estimated_tokens,
            "history snapshot saved"
        );
        Ok(())
    }

    /// In-memory side table first, then the on-disk snapshot. Absence is a
    /// `None`, never an error.
    pub fn retrieve_by_id(&self, id: &str) -> Option<Message> {
        if let Some(&position) = self.id_index.get(id) {
            return self.messages.get(position).cloned();
        }

        let content = std::fs::read_to_string(&self.history_file).ok()?;
        let stored: Vec<Message> = serde_json::from_str(&content).ok()?;
        stored.into_iter().find(|m| m.id.as_deref() == Some(id))
    }
}

/// Drop assistant messages whose `ToolUse` blocks have no later matching
/// `ToolResult`: the remote contract fails the whole request on a mismatch,
/// so a one-sided tool call is worse than a missing turn. An emptied slice
/// is replaced by a single default system message.
pub fn repair_pairing(slice: Vec<Message>) -> Vec<Message> {
    let result_ids: HashSet<String> = slice
        .iter()
        .flat_map(|msg| msg.content.iter())
        .filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
        .collect();

    let repaired: Vec<Message> = slice
        .into_iter()
        .filter(|msg| {
            if msg.role != Role::Assistant {
                return true;
            }
            let orphaned = msg.content.iter().any(|block| match block {
                ContentBlock::ToolUse { id, .. } => !result_ids.contains(id),
                _ => false,
            });
            if orphaned {
                tracing::warn!(id = ?msg.id, "dropping assistant message with unmatched tool_use");
            }
            !orphaned
        })
        .collect();

    if repaired.is_empty() {
        return vec![Message::text(
            Role::System,
            "The conversation context was reset. Continue with the task.",
        )];
    }
    repaired
}

/// Advisory digest of a dropped span: screenshot count, distinct action
/// types, and a glimpse of the text. Never re-parsed.
fn summarize_dropped(messages: &[Message]) -> String {
    let screenshot_count: usize = messages.iter().map(|m| m.image_count()).sum();

    let actions: BTreeSet<&str> = messages
        .iter()
        .filter_map(|m| m.metadata.get("action_type"))
        .filter_map(|v| v.as_str())
        .collect();

    let texts: Vec<&str> = messages.iter().filter_map(|m| m.first_text()).collect();

    let mut parts: Vec<String> = Vec::new();
    if screenshot_count > 0 {
        parts.push(format!("{screenshot_count} screenshots"));
    }
    if !actions.is_empty() {
        parts.push(format!(
            "Actions: {}",
            actions.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    match texts.as_slice() {
        [] => {}
        [only] => {
            let preview: String = only.chars().take(30).collect();
            let ellipsis = if only.chars().count() > 30 { "..." } else { "" };
            parts.push(format!("Message: \"{preview}{ellipsis}\""));
        }
        many => parts.push(format!("{} text messages", many.len())),
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{ImageSource, ToolResultBlock};
    use serde_json::json;

    fn manager() -> (HistoryManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = HistoryManager::new(Some(dir.path().to_path_buf())).unwrap();
        (mgr, dir)
    }

    #[test]
    fn synthetic_ids_follow_role_session_index() {
        let (mut mgr, _dir) = manager();
        mgr.begin_run("open a browser");
        mgr.append(Message::text(Role::Assistant, "ok"));
        let session = mgr.session_id().to_string();
        assert_eq!(
            mgr.messages()[0].id.as_deref(),
            Some(format!("user_{session}_0").as_str())
        );
        assert_eq!(
            mgr.messages()[1].id.as_deref(),
            Some(format!("assistant_{session}_1").as_str())
        );
    }

    #[test]
    fn short_history_transmits_unchanged() {
        let (mut mgr, _dir) = manager();
        mgr.begin_run("task");
        for i in 0..5 {
            mgr.append(Message::text(Role::Assistant, format!("step {i}")));
        }
        assert_eq!(mgr.transmit_slice(10, 0.75).len(), 6);
    }

    #[test]
    fn truncation_keeps_first_notice_and_recent() {
        let (mut mgr, _dir) = manager();
        mgr.begin_run("the task");
        for i in 1..16 {
            mgr.append(Message::text(Role::Assistant, format!("step number {i}")));
        }
        assert_eq!(mgr.len(), 16);

        let slice = mgr.transmit_slice(10, 0.75);
        // first + notice + ceil(10 * 0.75) = 10 total
        assert_eq!(slice.len(), 10);
        assert_eq!(slice[0].first_text(), Some("the task"));
        assert_eq!(slice[1].role, Role::System);
        let notice = slice[1].first_text().unwrap();
        assert!(notice.contains("7 messages"), "notice was: {notice}");
        // the 8 most recent survive in order
        assert_eq!(slice[2].first_text(), Some("step number 8"));
        assert_eq!(slice[9].first_text(), Some("step number 15"));
    }

    #[test]
    fn truncation_summary_counts_screenshots_and_actions() {
        let (mut mgr, _dir) = manager();
        mgr.begin_run("task");
        for i in 0..15 {
            let mut msg = Message::tool_result(
                format!("tu_{i}"),
                vec![ToolResultBlock::Image {
                    source: ImageSource::base64_jpeg("AAAA".into()),
                }],
            );
            msg.metadata
                .insert("action_type".into(), json!("left_click"));
            mgr.append(msg);
        }
        let slice = mgr.transmit_slice(10, 0.75);
        let notice = slice[1].first_text().unwrap();
        assert!(notice.contains("screenshots"));
        assert!(notice.contains("left_click"));
    }

    #[test]
    fn repair_drops_dangling_tool_use_messages() {
        let assistant = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "t1".into(),
                name: "computer".into(),
                input: json!({"action": "screenshot"}),
            }],
            id: None,
            metadata: serde_json::Map::new(),
        };
        let user = Message::text(Role::User, "hello");
        let repaired = repair_pairing(vec![user.clone(), assistant]);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0], user);
    }

    #[test]
    fn repair_keeps_paired_tool_use() {
        let assistant = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "t1".into(),
                name: "computer".into(),
                input: json!({"action": "screenshot"}),
            }],
            id: None,
            metadata: serde_json::Map::new(),
        };
        let result = Message::tool_result("t1", vec![ToolResultBlock::Text { text: "ok".into() }]);
        let repaired = repair_pairing(vec![assistant.clone(), result.clone()]);
        assert_eq!(repaired, vec![assistant, result]);
    }

    #[test]
    fn repair_never_returns_empty() {
        let assistant = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: "t1".into(),
                name: "computer".into(),
                input: json!({}),
            }],
            id: None,
            metadata: serde_json::Map::new(),
        };
        let repaired = repair_pairing(vec![assistant]);
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].role, Role::System);
    }

    #[test]
    fn retrieve_by_id_hits_memory_then_disk() {
        let (mut mgr, _dir) = manager();
        mgr.begin_run("task");
        mgr.append(Message::text(Role::Assistant, "remembered"));
        let id = mgr.messages()[1].id.clone().unwrap();
        mgr.persist(Some(42));

        assert!(mgr.retrieve_by_id(&id).is_some());
        assert!(mgr.retrieve_by_id("missing").is_none());

        // A fresh manager over the same dir misses in memory; disk lookup
        // goes through its own (new) session file, so absence stays None.
        let fresh = HistoryManager::new(Some(
            mgr.history_file.parent().unwrap().to_path_buf(),
        ))
        .unwrap();
        assert!(fresh.retrieve_by_id(&id).is_none());
    }

    #[test]
    fn persist_writes_snapshot_and_index() {
        let (mut mgr, _dir) = manager();
        mgr.begin_run("a task instruction");
        mgr.persist(Some(7));
        let stored: Vec<Message> =
            serde_json::from_str(&std::fs::read_to_string(&mgr.history_file).unwrap()).unwrap();
        assert_eq!(stored.len(), 1);
        let index: BTreeMap<String, IndexRecord> =
            serde_json::from_str(&std::fs::read_to_string(&mgr.index_file).unwrap()).unwrap();
        let record = index.values().next().unwrap();
        assert_eq!(record.message_count, 1);
        assert_eq!(record.estimated_tokens, Some(7));
        assert_eq!(record.instruction, "a task instruction");
    }
}
