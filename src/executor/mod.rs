pub mod capture;
pub mod coords;
pub mod input;
pub mod region;
pub mod safety;

use std::time::Duration;

use xcap::Monitor;

use crate::codec::{Action, ActionKind, CaptureOptions, ClickKind, ElementType, Region};
use crate::config::ScreenConfig;
use crate::errors::{PilotError, PilotResult};
use capture::ScreenCapturer;
use coords::ScreenGeometry;
use input::InputDriver;

/// Assumed physical resolution when no monitor can be enumerated.
const FALLBACK_RESOLUTION: (u32, u32) = (1920, 1080);

/// What one executed action hands back to the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Base64 JPEG of the screen after the action.
    Image(String),
    /// Cursor position reported in model space.
    Coordinates { x: f64, y: f64 },
    /// Action completed and all screenshots were skipped.
    Ack,
}

/// Performs decoded actions against the real screen: coordinate mapping,
/// safety gating, input synthesis, and screenshot capture. Owns the input
/// backend, so it stays on the task it was created on.
pub struct ScreenExecutor {
    geometry: ScreenGeometry,
    input: InputDriver,
    capturer: ScreenCapturer,
    settle: Duration,
    auto_bw_for_text: bool,
    /// Screen-space position of the last focus-granting click.
    last_click: Option<(i32, i32)>,
}

impl ScreenExecutor {
    pub fn new(config: &ScreenConfig, monitor_index: usize) -> PilotResult<Self> {
        let (screen_width, screen_height) = detect_resolution(monitor_index);
        let geometry = ScreenGeometry {
            screen_width,
            screen_height,
            model_width: config.model_width,
            model_height: config.model_height,
        };
        tracing::info!(
            screen_width,
            screen_height,
            model_width = config.model_width,
            model_height = config.model_height,
            "screen executor ready"
        );

        Ok(Self {
            geometry,
            input: InputDriver::new()?,
            capturer: ScreenCapturer::new(
                monitor_index,
                config.screenshot_quality,
                config.screenshot_cache_ttl_secs,
                config.model_width,
                config.model_height,
            ),
            settle: Duration::from_millis(config.action_settle_ms),
            auto_bw_for_text: config.auto_bw_for_text,
            last_click: None,
        })
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    /// Run one action end to end. Safety violations and capture failures do
    /// not abort the run: both surface to the model as the red error frame.
    pub async fn perform(&mut self, action: &Action) -> PilotResult<Outcome> {
        if let Err(violation) = safety::validate(action, &self.geometry) {
            tracing::warn!(error = %violation, "action blocked by safety gate");
            return Ok(Outcome::Image(capture::error_image()));
        }

        let options = self.shape_capture(action)?;

        if matches!(action.kind, ActionKind::Finish { .. }) {
            return Err(PilotError::Executor(
                "finish action is terminal and cannot be executed".into(),
            ));
        }
        if matches!(action.kind, ActionKind::CursorPosition) {
            let (sx, sy) = self.input.cursor_position()?;
            let (x, y) = self.geometry.to_model(sx, sy);
            return Ok(Outcome::Coordinates { x, y });
        }

        // Pre-action frame: doubles as the fallback observation when the
        // post-action capture is skipped, and warms the capture cache.
        let before = if !options.skip_before_screenshot
            && !matches!(action.kind, ActionKind::Screenshot)
        {
            match self.capturer.capture(&options) {
                Ok(frame) => Some(frame),
                Err(err) => {
                    tracing::debug!(error = %err, "pre-action capture failed");
                    None
                }
            }
        } else {
            None
        };

        self.apply_input(action).await?;

        if options.skip_after_screenshot {
            return Ok(match before {
                Some(frame) => Outcome::Image(frame),
                None => Outcome::Ack,
            });
        }
        match self.capturer.capture(&options) {
            Ok(frame) => Ok(Outcome::Image(frame)),
            Err(err) => {
                tracing::error!(error = %err, "post-action capture failed");
                Ok(Outcome::Image(capture::error_image()))
            }
        }
    }

    pub fn cleanup(&mut self) {
        self.capturer.clear_cache();
    }

    async fn apply_input(&mut self, action: &Action) -> PilotResult<()> {
        match &action.kind {
            ActionKind::MouseMove { x, y } => {
                let (sx, sy) = self.geometry.to_screen(*x, *y);
                self.input.move_mouse(sx, sy)?;
            }
            ActionKind::Click { kind, x, y } => {
                let target = if let (Some(x), Some(y)) = (x, y) {
                    let (sx, sy) = self.geometry.to_screen(*x, *y);
                    self.input.move_mouse(sx, sy)?;
                    (sx, sy)
                } else {
                    // Coordinate-free click: the click lands wherever the
                    // pointer already is, so that is the focus target.
                    self.input.cursor_position()?
                };
                self.input.click(*kind)?;
                if matches!(kind, ClickKind::Left | ClickKind::Double) {
                    self.last_click = Some(target);
                }
            }
            ActionKind::Drag { x, y } => {
                let (sx, sy) = self.geometry.to_screen(*x, *y);
                self.input.drag(sx, sy)?;
            }
            ActionKind::TypeText { text } => {
                // Keyboard focus follows clicks, not pointer motion: if the
                // pointer drifted off the last click target, click back into
                // it before typing.
                let current = self.input.cursor_position()?;
                if let Some((tx, ty)) = reassert_target(self.last_click, current) {
                    self.input.move_mouse(tx, ty)?;
                    self.input.click(ClickKind::Left)?;
                }
                self.input.type_text(text)?;
            }
            ActionKind::Key { text } => {
                self.input.press_key(text)?;
            }
            ActionKind::Screenshot => return Ok(()),
            ActionKind::CursorPosition | ActionKind::Finish { .. } => return Ok(()),
        }
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// Resolve the effective capture options: explicit regions are clamped
    /// to the screen, element presets are anchored at the cursor, and
    /// text-bearing elements drop to two-tone when configured.
    fn shape_capture(&mut self, action: &Action) -> PilotResult<CaptureOptions> {
        let mut options = action.capture.clone();

        options.region = match (options.region, options.element_type) {
            (Some(explicit), _) => Some(self.clamp(explicit)),
            (None, Some(element)) => {
                let cursor = self.input.cursor_position()?;
                Some(region::element_region(
                    element,
                    cursor,
                    self.geometry.screen_width,
                    self.geometry.screen_height,
                ))
            }
            (None, None) => None,
        };

        if wants_auto_bw(self.auto_bw_for_text, &options) {
            options.bw_mode = true;
        }

        Ok(options)
    }

    fn clamp(&self, region: Region) -> Region {
        region::clamp_region(
            region,
            self.geometry.screen_width,
            self.geometry.screen_height,
        )
    }
}

/// Where to click back before typing: the last click target, but only when
/// the pointer has actually drifted off it. A bare pointer move does not
/// transfer keyboard focus, so restoring it takes a click, not a move.
fn reassert_target(last_click: Option<(i32, i32)>, current: (i32, i32)) -> Option<(i32, i32)> {
    last_click.filter(|target| *target != current)
}

/// Text-focused element captures drop to two-tone unless the model asked
/// for an explicit color mode of its own.
fn wants_auto_bw(enabled: bool, options: &CaptureOptions) -> bool {
    enabled
        && !options.bw_mode
        && !options.grayscale
        && matches!(
            options.element_type,
            Some(ElementType::TextField) | Some(ElementType::BrowserAddress)
        )
}

fn detect_resolution(monitor_index: usize) -> (u32, u32) {
    match Monitor::all() {
        Ok(monitors) if !monitors.is_empty() => {
            let chosen = monitors
                .get(monitor_index)
                .or_else(|| monitors.iter().find(|m| m.is_primary()))
                .or_else(|| monitors.first());
            match chosen {
                Some(m) => (m.width(), m.height()),
                None => FALLBACK_RESOLUTION,
            }
        }
        Ok(_) => {
            tracing::warn!("no monitors detected, assuming 1920x1080");
            FALLBACK_RESOLUTION
        }
        Err(err) => {
            tracing::warn!(error = %err, "monitor enumeration failed, assuming 1920x1080");
            FALLBACK_RESOLUTION
        }
    }
}
