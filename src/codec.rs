use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::message::ContentBlock;
use crate::protocol::wire::{ApiResponse, COMPUTER_TOOL_NAME, FINISH_TOOL_NAME};

/// Normalized instruction decoded from the model's tool-use block.
/// One is produced per loop iteration and consumed once by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub capture: CaptureOptions,
    /// Id of the tool-use block this action came from; the resulting
    /// tool_result must reference it.
    pub tool_use_id: String,
    /// Previous action, attached by the orchestrator for region-of-interest
    /// heuristics.
    pub last_action: Option<ActionKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    MouseMove {
        x: f64,
        y: f64,
    },
    Click {
        kind: ClickKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
    },
    Drag {
        x: f64,
        y: f64,
    },
    TypeText {
        text: String,
    },
    Key {
        text: String,
    },
    Screenshot,
    CursorPosition,
    Finish {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    Left,
    Right,
    Middle,
    Double,
}

/// Screenshot-shaping flags carried alongside the action proper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub grayscale: bool,
    pub bw_mode: bool,
    pub skip_before_screenshot: bool,
    pub skip_after_screenshot: bool,
    pub region: Option<Region>,
    pub element_type: Option<ElementType>,
}

/// Screen-space capture rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    TextField,
    Button,
    Menu,
    Dialog,
    BrowserAddress,
}

/// Each decode failure keeps the offending payload for diagnostics.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no tool use block in response")]
    MissingToolUse,

    #[error("unexpected tool: {name} (input: {input})")]
    UnknownTool { name: String, input: Value },

    #[error("action discriminator not found in input: {input}")]
    MissingActionType { input: Value },

    #[error("unsupported action: {action} (input: {input})")]
    UnsupportedAction { action: String, input: Value },

    #[error("invalid coordinate for {action}: {input}")]
    InvalidCoordinate { action: String, input: Value },

    #[error("missing text for keyboard action: {input}")]
    MissingText { input: Value },
}

/// Decode the latest response into a normalized action. The first tool-use
/// block wins; staged parsing, first successful match per stage.
pub fn decode(response: &ApiResponse) -> Result<Action, DecodeError> {
    for block in &response.content {
        let ContentBlock::ToolUse { id, name, input } = block else {
            continue;
        };

        if name == FINISH_TOOL_NAME {
            return Ok(Action {
                kind: ActionKind::Finish {
                    success: input["success"].as_bool().unwrap_or(true),
                    error: input["error"].as_str().map(str::to_string),
                },
                capture: CaptureOptions::default(),
                tool_use_id: id.clone(),
                last_action: None,
            });
        }

        if name != COMPUTER_TOOL_NAME {
            return Err(DecodeError::UnknownTool {
                name: name.clone(),
                input: input.clone(),
            });
        }

        let action_type = input["action_type"]
            .as_str()
            .or_else(|| input["action"].as_str())
            .ok_or_else(|| DecodeError::MissingActionType {
                input: input.clone(),
            })?
            .to_string();

        let kind = decode_kind(&action_type, input)?;
        return Ok(Action {
            kind,
            capture: decode_capture_options(input),
            tool_use_id: id.clone(),
            last_action: None,
        });
    }

    Err(DecodeError::MissingToolUse)
}

fn decode_kind(action_type: &str, input: &Value) -> Result<ActionKind, DecodeError> {
    match action_type {
        "mouse_move" => {
            let (x, y) = require_coordinate(action_type, input)?;
            Ok(ActionKind::MouseMove { x, y })
        }
        "left_click_drag" => {
            let (x, y) = require_coordinate(action_type, input)?;
            Ok(ActionKind::Drag { x, y })
        }
        "left_click" | "mouse_click" => Ok(click(ClickKind::Left, input)),
        "right_click" => Ok(click(ClickKind::Right, input)),
        "middle_click" => Ok(click(ClickKind::Middle, input)),
        "double_click" => Ok(click(ClickKind::Double, input)),
        "type" | "keyboard_type" => Ok(ActionKind::TypeText {
            text: require_text(input)?,
        }),
        "key" => Ok(ActionKind::Key {
            text: require_text(input)?,
        }),
        "screenshot" => Ok(ActionKind::Screenshot),
        "cursor_position" => Ok(ActionKind::CursorPosition),
        other => Err(DecodeError::UnsupportedAction {
            action: other.to_string(),
            input: input.clone(),
        }),
    }
}

fn decode_capture_options(input: &Value) -> CaptureOptions {
    let region = input["region"].as_array().and_then(|list| {
        if list.len() != 4 {
            return None;
        }
        Some(Region {
            x: list[0].as_u64()? as u32,
            y: list[1].as_u64()? as u32,
            width: list[2].as_u64()? as u32,
            height: list[3].as_u64()? as u32,
        })
    });

    let element_type = input["element_type"]
        .as_str()
        .and_then(|name| serde_json::from_value(Value::String(name.to_string())).ok());

    CaptureOptions {
        grayscale: input["grayscale"].as_bool().unwrap_or(false),
        bw_mode: input["bw_mode"].as_bool().unwrap_or(false),
        skip_before_screenshot: input["skip_before_screenshot"].as_bool().unwrap_or(false),
        skip_after_screenshot: input["skip_after_screenshot"].as_bool().unwrap_or(false),
        region,
        element_type,
    }
}

/// Coordinate pair from either a two-element `coordinate` list or separate
/// `x`/`y` fields, tried in that order.
fn coordinate(input: &Value) -> Option<(f64, f64)> {
    if let Some(list) = input["coordinate"].as_array() {
        if list.len() == 2 {
            return Some((list[0].as_f64()?, list[1].as_f64()?));
        }
    }
    match (input["x"].as_f64(), input["y"].as_f64()) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    }
}

fn require_coordinate(action: &str, input: &Value) -> Result<(f64, f64), DecodeError> {
    coordinate(input).ok_or_else(|| DecodeError::InvalidCoordinate {
        action: action.to_string(),
        input: input.clone(),
    })
}

fn require_text(input: &Value) -> Result<String, DecodeError> {
    input["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DecodeError::MissingText {
            input: input.clone(),
        })
}

fn click(kind: ClickKind, input: &Value) -> ActionKind {
    let (x, y) = match coordinate(input) {
        Some((x, y)) => (Some(x), Some(y)),
        None => (None, None),
    };
    ActionKind::Click { kind, x, y }
}

/// Lossy human-readable rendering for status reporting. Never re-parsed.
pub fn describe(action: &Action) -> String {
    match &action.kind {
        ActionKind::MouseMove { x, y } => format!("moved mouse to ({x:.0}, {y:.0})"),
        ActionKind::Click { kind, x, y } => {
            let label = match kind {
                ClickKind::Left => "clicked",
                ClickKind::Right => "right-clicked",
                ClickKind::Middle => "middle-clicked",
                ClickKind::Double => "double-clicked",
            };
            match (x, y) {
                (Some(x), Some(y)) => format!("{label} ({x:.0}, {y:.0})"),
                _ => label.to_string(),
            }
        }
        ActionKind::Drag { x, y } => format!("dragged to ({x:.0}, {y:.0})"),
        ActionKind::TypeText { text } => format!("typed {text:?}"),
        ActionKind::Key { text } => format!("pressed key {text:?}"),
        ActionKind::Screenshot => "took a screenshot".into(),
        ActionKind::CursorPosition => "queried cursor position".into(),
        ActionKind::Finish { success, error } => match (success, error) {
            (true, _) => "finished the task".into(),
            (false, Some(err)) => format!("finished with error: {err}"),
            (false, None) => "finished unsuccessfully".into(),
        },
    }
}
