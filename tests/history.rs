use serde_json::json;

use screenpilot::history::{repair_pairing, HistoryManager, IndexRecord};
use screenpilot::protocol::message::{
    ContentBlock, ImageSource, Message, Role, ToolResultBlock,
};

fn assistant_tool_use(tool_use_id: &str) -> Message {
    Message {
        role: Role::Assistant,
        content: vec![
            ContentBlock::Text {
                text: format!("Taking a screenshot ({tool_use_id})"),
            },
            ContentBlock::ToolUse {
                id: tool_use_id.into(),
                name: "computer".into(),
                input: json!({"action": "screenshot"}),
            },
        ],
        id: None,
        metadata: serde_json::Map::new(),
    }
}

fn screenshot_result(tool_use_id: &str) -> Message {
    let mut msg = Message::tool_result(
        tool_use_id,
        vec![ToolResultBlock::Image {
            source: ImageSource::base64_jpeg("c2NyZWVu".into()),
        }],
    );
    msg.metadata
        .insert("action_type".into(), json!("screenshot"));
    msg
}

/// Simulated agent session: instruction, then `steps` tool-use/result pairs.
fn session(steps: usize) -> (HistoryManager, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut history = HistoryManager::new(Some(dir.path().to_path_buf())).unwrap();
    history.begin_run("organize my desktop icons");
    for step in 0..steps {
        let id = format!("tu_{step}");
        history.append(assistant_tool_use(&id));
        history.append(screenshot_result(&id));
    }
    (history, dir)
}

#[test]
fn long_sessions_truncate_to_the_configured_shape() {
    let (history, _dir) = session(10); // 21 messages total
    let slice = history.transmit_slice(10, 0.75);

    // first + notice + ceil(10 * 0.75)
    assert_eq!(slice.len(), 10);
    assert_eq!(slice[0].first_text(), Some("organize my desktop icons"));
    assert_eq!(slice[1].role, Role::System);

    let notice = slice[1].first_text().unwrap();
    assert!(notice.contains("12 messages"), "notice was: {notice}");
    assert!(notice.contains("screenshot"));

    // The tail is the most recent messages, order preserved.
    let last = slice.last().unwrap();
    assert_eq!(last.image_count(), 1);
}

#[test]
fn truncated_slices_survive_pairing_repair() {
    let (history, _dir) = session(10);
    let slice = history.transmit_slice(10, 0.75);
    let repaired = repair_pairing(slice);

    // Every remaining tool_use has its matching tool_result.
    let result_ids: Vec<String> = repaired
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
        .collect();
    for msg in &repaired {
        for block in &msg.content {
            if let ContentBlock::ToolUse { id, .. } = block {
                assert!(result_ids.contains(id), "unpaired tool_use {id}");
            }
        }
    }
}

#[test]
fn snapshot_round_trips_through_disk() {
    let (mut history, dir) = session(3);
    history.persist(Some(1234));

    let id = history.messages()[2].id.clone().unwrap();
    let restored = history.retrieve_by_id(&id).unwrap();
    assert_eq!(restored.image_count(), 1);

    let index_path = dir
        .path()
        .join(format!("session_{}_index.json", history.session_id()));
    let index: std::collections::BTreeMap<String, IndexRecord> =
        serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
    let record = index.values().next().unwrap();
    assert_eq!(record.message_count, 7);
    assert_eq!(record.estimated_tokens, Some(1234));
    assert_eq!(record.instruction, "organize my desktop icons");
}

#[test]
fn begin_run_resets_prior_state() {
    let (mut history, _dir) = session(2);
    assert_eq!(history.len(), 5);
    history.begin_run("a brand new task");
    assert_eq!(history.len(), 1);
    assert_eq!(history.messages()[0].first_text(), Some("a brand new task"));
}
