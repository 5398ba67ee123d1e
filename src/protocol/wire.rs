use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::message::{ContentBlock, WireMessage};

/// Beta flag required for the screen-control tool family.
pub const COMPUTER_USE_BETA: &str = "computer-use-2024-10-22";
pub const COMPUTER_TOOL_TYPE: &str = "computer_20241022";

pub const COMPUTER_TOOL_NAME: &str = "computer";
pub const FINISH_TOOL_NAME: &str = "finish_run";

/// Tool declarations as the remote API expects them. The screen-control
/// tool is a typed builtin; the finish tool carries a JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDef {
    Builtin {
        #[serde(rename = "type")]
        kind: String,
        name: String,
        display_width_px: u32,
        display_height_px: u32,
        display_number: u32,
    },
    Schema {
        name: String,
        description: String,
        input_schema: serde_json::Value,
    },
}

pub fn computer_tool(display_width_px: u32, display_height_px: u32, display_number: u32) -> ToolDef {
    ToolDef::Builtin {
        kind: COMPUTER_TOOL_TYPE.into(),
        name: COMPUTER_TOOL_NAME.into(),
        display_width_px,
        display_height_px,
        display_number,
    }
}

pub fn finish_tool() -> ToolDef {
    ToolDef::Schema {
        name: FINISH_TOOL_NAME.into(),
        description: "Call this function when you have achieved the goal of the task.".into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "success": {
                    "type": "boolean",
                    "description": "Whether the task was successful"
                },
                "error": {
                    "type": "string",
                    "description": "The error message if the task was not successful"
                }
            },
            "required": ["success"]
        }),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolDef>,
    pub system: String,
}

/// Remote response: an ordered sequence of text and/or tool-use blocks.
/// Treated as immutable on receipt; the no-tool-call repair builds on a
/// local copy rather than editing what came off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ApiResponse {
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenCountResponse {
    pub input_tokens: u32,
}
