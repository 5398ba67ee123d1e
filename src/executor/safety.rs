use thiserror::Error;

use crate::codec::{Action, ActionKind};
use crate::executor::coords::ScreenGeometry;

/// Substrings that must never reach the keyboard, matched case-insensitively
/// against typed text and key sequences.
const DENYLIST: &[&str] = &[
    "sudo ",
    "rm -rf",
    "format",
    "mkfs",
    ";shutdown",
    ";reboot",
    ";halt",
    "dd if=",
    "> /dev/",
    "> /etc/",
    "chmod 777",
    "chown root",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SafetyViolation {
    #[error("blocked potentially dangerous input matching {pattern:?}")]
    BlockedText { pattern: &'static str },

    #[error("coordinates ({x}, {y}) outside the allowed display area")]
    OutOfBounds { x: f64, y: f64 },
}

/// Gate every action before it touches the OS. Text is screened against the
/// denylist; pointer targets must fall inside the slack-extended model area.
pub fn validate(action: &Action, geometry: &ScreenGeometry) -> Result<(), SafetyViolation> {
    match &action.kind {
        ActionKind::TypeText { text } | ActionKind::Key { text } => screen_text(text),
        ActionKind::MouseMove { x, y } | ActionKind::Drag { x, y } => {
            check_bounds(geometry, *x, *y)
        }
        ActionKind::Click {
            x: Some(x),
            y: Some(y),
            ..
        } => check_bounds(geometry, *x, *y),
        _ => Ok(()),
    }
}

fn screen_text(text: &str) -> Result<(), SafetyViolation> {
    let lowered = text.to_lowercase();
    for pattern in DENYLIST {
        if lowered.contains(pattern) {
            tracing::warn!(pattern, "refusing to type blocked input");
            return Err(SafetyViolation::BlockedText { pattern });
        }
    }
    Ok(())
}

fn check_bounds(geometry: &ScreenGeometry, x: f64, y: f64) -> Result<(), SafetyViolation> {
    if geometry.in_model_bounds(x, y) {
        Ok(())
    } else {
        tracing::warn!(x, y, "refusing pointer action outside display bounds");
        Err(SafetyViolation::OutOfBounds { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CaptureOptions, ClickKind};

    fn geometry() -> ScreenGeometry {
        ScreenGeometry {
            screen_width: 1920,
            screen_height: 1080,
            model_width: 1024,
            model_height: 640,
        }
    }

    fn action(kind: ActionKind) -> Action {
        Action {
            kind,
            capture: CaptureOptions::default(),
            tool_use_id: "tu_1".into(),
            last_action: None,
        }
    }

    #[test]
    fn dangerous_shell_text_is_blocked() {
        let a = action(ActionKind::TypeText {
            text: "please run Sudo rm -rf / now".into(),
        });
        assert!(matches!(
            validate(&a, &geometry()),
            Err(SafetyViolation::BlockedText { .. })
        ));
    }

    #[test]
    fn benign_text_passes() {
        let a = action(ActionKind::TypeText {
            text: "hello world, what a nice day".into(),
        });
        assert_eq!(validate(&a, &geometry()), Ok(()));
    }

    #[test]
    fn key_sequences_are_screened_too() {
        let a = action(ActionKind::Key {
            text: "dd if=/dev/zero".into(),
        });
        assert!(matches!(
            validate(&a, &geometry()),
            Err(SafetyViolation::BlockedText { .. })
        ));
    }

    #[test]
    fn out_of_bounds_click_is_blocked() {
        let a = action(ActionKind::Click {
            kind: ClickKind::Left,
            x: Some(2000.0),
            y: Some(100.0),
        });
        assert!(matches!(
            validate(&a, &geometry()),
            Err(SafetyViolation::OutOfBounds { .. })
        ));
    }

    #[test]
    fn in_bounds_move_passes() {
        let a = action(ActionKind::MouseMove { x: 512.0, y: 320.0 });
        assert_eq!(validate(&a, &geometry()), Ok(()));
    }

    #[test]
    fn coordinate_free_click_passes() {
        let a = action(ActionKind::Click {
            kind: ClickKind::Double,
            x: None,
            y: None,
        });
        assert_eq!(validate(&a, &geometry()), Ok(()));
    }
}
