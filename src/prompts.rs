use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
The user will ask you to perform a task and you should use their computer to \
do so. After each step, take a screenshot and carefully evaluate if you have \
achieved the right outcome. Explicitly show your thinking: 'I have evaluated \
step X...' If not correct, try again. Only when you confirm a step was \
executed correctly should you move on to the next one.

Important screenshot capabilities:
1. You can take focused screenshots of specific regions by specifying \
'element_type' in your action: 'browser_address', 'text_field', 'button', \
'menu' or 'dialog'.
2. You can optimize screenshots with 'grayscale', 'bw_mode', \
'skip_before_screenshot', 'skip_after_screenshot' and 'region' parameters.

Note that you have to click into the browser address bar before typing a URL. \
You should always call a tool! Always return a tool call. Remember to call \
the finish_run tool when you have achieved the goal of the task. Do not \
explain that you have finished the task, just call the tool. Use keyboard \
shortcuts to navigate whenever possible.";

#[derive(Debug, Serialize, Deserialize)]
struct PromptFile {
    system_prompt: String,
}

/// Holds the current system prompt, loaded from prompts.json under the
/// config dir, with display dimensions appended so the model knows its
/// coordinate space.
#[derive(Debug, Clone)]
pub struct PromptManager {
    prompt: String,
    display_line: Option<String>,
}

impl PromptManager {
    /// Load from disk; any failure falls back to the default prompt.
    pub fn load() -> Self {
        let prompt = prompt_file_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str::<PromptFile>(&content).ok())
            .map(|file| file.system_prompt)
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            prompt,
            display_line: None,
        }
    }

    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            display_line: None,
        }
    }

    pub fn set_display_info(&mut self, model_width: u32, model_height: u32, screen_count: usize) {
        self.display_line = Some(format!(
            "The screen is presented to you at {model_width}x{model_height} pixels \
             ({screen_count} display(s) attached). All coordinates you emit are in \
             that space."
        ));
        tracing::info!(model_width, model_height, screen_count, "display info set in prompt");
    }

    pub fn current_prompt(&self) -> String {
        match &self.display_line {
            Some(line) => format!("{}\n\n{line}", self.prompt),
            None => self.prompt.clone(),
        }
    }
}

fn prompt_file_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("screenpilot").join("prompts.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_info_is_appended() {
        let mut prompts = PromptManager::with_prompt("base");
        assert_eq!(prompts.current_prompt(), "base");
        prompts.set_display_info(1024, 640, 1);
        let rendered = prompts.current_prompt();
        assert!(rendered.starts_with("base"));
        assert!(rendered.contains("1024x640"));
    }
}
