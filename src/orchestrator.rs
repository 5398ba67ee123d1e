use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::codec::{self, Action, ActionKind, ClickKind};
use crate::config::{HistoryConfig, Optimization};
use crate::errors::PilotResult;
use crate::executor::{Outcome, ScreenExecutor};
use crate::gateway::Gateway;
use crate::history::{repair_pairing, HistoryManager};
use crate::protocol::message::{ImageSource, Message, Role, ToolResultBlock};

pub const STOP_NOTICE: &str = "Agent run stopped by user.";

/// The agent loop: transmit history, decode the model's next action, execute
/// it, feed the observation back. Owns every component for the duration of a
/// run; not Send because the executor holds the OS input backend.
pub struct Orchestrator {
    gateway: Gateway,
    executor: ScreenExecutor,
    history: HistoryManager,
    history_config: HistoryConfig,
    optimization: Optimization,
    status: UnboundedSender<String>,
    running: Arc<AtomicBool>,
    last_action: Option<ActionKind>,
}

impl Orchestrator {
    pub fn new(
        gateway: Gateway,
        executor: ScreenExecutor,
        history: HistoryManager,
        history_config: HistoryConfig,
        optimization: Optimization,
        status: UnboundedSender<String>,
    ) -> Self {
        Self {
            gateway,
            executor,
            history,
            history_config,
            optimization,
            status,
            running: Arc::new(AtomicBool::new(false)),
            last_action: None,
        }
    }

    /// Clearing this flag from another task stops the loop at the next
    /// iteration boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub async fn run(&mut self, instructions: &str) -> PilotResult<()> {
        self.running.store(true, Ordering::SeqCst);
        self.last_action = None;
        self.history.begin_run(instructions);
        let instruction_tokens = self.gateway.count_tokens(instructions).await;
        tracing::info!(instructions, instruction_tokens, "agent run started");

        let result = self.drive().await;

        self.executor.cleanup();
        let estimate = self.estimate_history_tokens().await;
        self.history.persist(Some(estimate));
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn drive(&mut self) -> PilotResult<()> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!("stop requested, ending run");
                self.history.append(stop_marker());
                self.emit(STOP_NOTICE);
                return Ok(());
            }

            let slice = if self.history_config.truncate {
                self.history.transmit_slice(
                    self.history_config.truncation_threshold,
                    self.history_config.keep_ratio,
                )
            } else {
                self.history.messages().to_vec()
            };
            let slice = repair_pairing(slice);

            let response = match self.gateway.next_action(&slice).await {
                Ok(response) => response,
                Err(err) => {
                    self.emit(format!("Error: {err}"));
                    return Err(err);
                }
            };

            if let Some(text) = response.first_text() {
                self.emit(text.to_string());
            }

            let mut assistant = Message {
                role: Role::Assistant,
                content: response.content.clone(),
                id: (!response.id.is_empty()).then(|| response.id.clone()),
                metadata: serde_json::Map::new(),
            };

            let mut action = match codec::decode(&response) {
                Ok(action) => action,
                Err(err) => {
                    self.emit(format!("Error: {err}"));
                    self.history.append(assistant);
                    return Err(err.into());
                }
            };
            apply_optimization(self.optimization, &mut action);
            action.last_action = self.last_action.clone();

            assistant
                .metadata
                .insert("action_type".into(), action_type_label(&action.kind));
            self.history.append(assistant);
            self.maybe_persist();

            self.emit(codec::describe(&action));

            if let ActionKind::Finish { success, error } = &action.kind {
                tracing::info!(success = *success, error = ?error, "run finished");
                return Ok(());
            }

            match self.executor.perform(&action).await {
                Ok(outcome) => {
                    let observation = self.observation_message(&action, outcome);
                    self.history.append(observation);
                }
                Err(err) => {
                    tracing::error!(error = %err, "action execution failed");
                    self.emit(format!("Action failed: {err}"));
                    self.history
                        .append(Message::text(Role::User, format!("Action failed: {err}")));
                }
            }
            self.last_action = Some(action.kind.clone());
            self.maybe_persist();
        }
    }

    fn observation_message(&self, action: &Action, outcome: Outcome) -> Message {
        let mut message = match outcome {
            Outcome::Image(frame) => Message::tool_result(
                action.tool_use_id.clone(),
                vec![ToolResultBlock::Image {
                    source: ImageSource::base64_jpeg(frame),
                }],
            ),
            Outcome::Coordinates { x, y } => Message::tool_result(
                action.tool_use_id.clone(),
                vec![ToolResultBlock::Text {
                    text: format!("X={x:.0},Y={y:.0}"),
                }],
            ),
            Outcome::Ack => Message::tool_result(
                action.tool_use_id.clone(),
                vec![ToolResultBlock::Text {
                    text: "Action completed successfully.".into(),
                }],
            ),
        };

        let meta = &mut message.metadata;
        meta.insert("action_type".into(), action_type_label(&action.kind));
        if let Some(region) = &action.capture.region {
            if let Ok(value) = serde_json::to_value(region) {
                meta.insert("region".into(), value);
            }
        }
        meta.insert("grayscale".into(), action.capture.grayscale.into());
        meta.insert("bw_mode".into(), action.capture.bw_mode.into());
        message
    }

    fn maybe_persist(&mut self) {
        let every = self.history_config.persist_every.max(1);
        if self.history.len() % every == 0 {
            self.history.persist(None);
        }
    }

    /// One counting call over the flattened transcript; advisory only.
    async fn estimate_history_tokens(&mut self) -> u64 {
        let flattened: Vec<String> = self
            .history
            .messages()
            .iter()
            .map(Message::flattened_text)
            .collect();
        u64::from(self.gateway.count_tokens(&flattened.join("\n")).await)
    }

    fn emit(&self, line: impl Into<String>) {
        // Receiver loss only means nobody is watching; the run continues.
        let _ = self.status.send(line.into());
    }
}

/// Terminal marker recorded when a run is stopped. User role, so the model
/// sees the interruption as the operator's doing if the session resumes.
fn stop_marker() -> Message {
    Message::text(Role::User, STOP_NOTICE)
}

/// The optimization profile widens which screenshots are skipped; it never
/// un-skips what the model asked to skip.
fn apply_optimization(profile: Optimization, action: &mut Action) {
    let low_information = matches!(
        action.kind,
        ActionKind::MouseMove { .. }
            | ActionKind::CursorPosition
            | ActionKind::Click {
                kind: ClickKind::Left | ClickKind::Right,
                ..
            }
    );
    let pointer_only = matches!(
        action.kind,
        ActionKind::MouseMove { .. } | ActionKind::CursorPosition
    );

    match profile {
        Optimization::Minimal => {}
        Optimization::Balanced => {
            if low_information {
                action.capture.skip_before_screenshot = true;
            }
        }
        Optimization::Aggressive => {
            if low_information {
                action.capture.skip_before_screenshot = true;
            }
            if pointer_only {
                action.capture.skip_after_screenshot = true;
            }
            if !action.capture.bw_mode {
                action.capture.grayscale = true;
            }
        }
    }
}

fn action_type_label(kind: &ActionKind) -> serde_json::Value {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.get("type").cloned())
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CaptureOptions;

    fn action(kind: ActionKind) -> Action {
        Action {
            kind,
            capture: CaptureOptions::default(),
            tool_use_id: "tu_1".into(),
            last_action: None,
        }
    }

    #[test]
    fn minimal_profile_keeps_everything() {
        let mut a = action(ActionKind::MouseMove { x: 1.0, y: 2.0 });
        apply_optimization(Optimization::Minimal, &mut a);
        assert!(!a.capture.skip_before_screenshot);
        assert!(!a.capture.skip_after_screenshot);
    }

    #[test]
    fn balanced_profile_skips_before_on_pointer_actions() {
        let mut a = action(ActionKind::Click {
            kind: ClickKind::Left,
            x: Some(1.0),
            y: Some(2.0),
        });
        apply_optimization(Optimization::Balanced, &mut a);
        assert!(a.capture.skip_before_screenshot);
        assert!(!a.capture.skip_after_screenshot);

        let mut typing = action(ActionKind::TypeText { text: "hi".into() });
        apply_optimization(Optimization::Balanced, &mut typing);
        assert!(!typing.capture.skip_before_screenshot);
    }

    #[test]
    fn aggressive_profile_skips_both_for_moves_and_grayscales() {
        let mut a = action(ActionKind::MouseMove { x: 1.0, y: 2.0 });
        apply_optimization(Optimization::Aggressive, &mut a);
        assert!(a.capture.skip_before_screenshot);
        assert!(a.capture.skip_after_screenshot);
        assert!(a.capture.grayscale);
    }

    #[test]
    fn aggressive_profile_respects_bw_mode() {
        let mut a = action(ActionKind::Screenshot);
        a.capture.bw_mode = true;
        apply_optimization(Optimization::Aggressive, &mut a);
        assert!(!a.capture.grayscale);
    }

    #[test]
    fn stop_marker_is_recorded_as_the_user_speaking() {
        let marker = stop_marker();
        assert_eq!(marker.role, Role::User);
        assert_eq!(marker.first_text(), Some(STOP_NOTICE));
    }

    #[test]
    fn action_type_labels_use_wire_names() {
        assert_eq!(
            action_type_label(&ActionKind::Screenshot),
            serde_json::json!("screenshot")
        );
        assert_eq!(
            action_type_label(&ActionKind::TypeText { text: "x".into() }),
            serde_json::json!("type_text")
        );
    }
}
