use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const IMAGE_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One block of a message body, tagged the way the remote contract tags it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolResultBlock>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64_jpeg(data: String) -> Self {
        Self {
            kind: "base64".into(),
            media_type: IMAGE_MEDIA_TYPE.into(),
            data,
        }
    }
}

/// A conversation turn. `id` and `metadata` are local bookkeeping and never
/// reach the wire; `WireMessage` below is what gets transmitted and hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
            id: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content,
            }],
            id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Count of embedded screenshot images across all tool results.
    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult { content, .. } => content
                    .iter()
                    .filter(|c| matches!(c, ToolResultBlock::Image { .. }))
                    .count(),
                _ => 0,
            })
            .sum()
    }

    /// First non-trivial text fragment, for summaries and previews.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } if text.trim().len() > 5 => Some(text.as_str()),
            _ => None,
        })
    }

    /// Flattened text rendering used for token estimation; image payloads
    /// are replaced by a fixed marker so base64 never inflates the estimate.
    pub fn flattened_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for block in &self.content {
            match block {
                ContentBlock::Text { text } => parts.push(text.clone()),
                ContentBlock::ToolUse { name, input, .. } => {
                    parts.push(format!("{name} {input}"));
                }
                ContentBlock::ToolResult { content, .. } => {
                    for item in content {
                        match item {
                            ToolResultBlock::Text { text } => parts.push(text.clone()),
                            ToolResultBlock::Image { .. } => parts.push("[IMAGE DATA]".into()),
                        }
                    }
                }
            }
        }
        parts.join(" ")
    }
}

/// Wire projection of a `Message`: role + content only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}
