pub mod rate_limit;
pub mod retry;
pub mod tokens;
pub mod transport;

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::cache::TtlCache;
use crate::errors::{PilotError, PilotResult};
use crate::prompts::PromptManager;
use crate::protocol::message::{ContentBlock, Message, WireMessage};
use crate::protocol::wire::{computer_tool, finish_tool, ApiRequest, ApiResponse, FINISH_TOOL_NAME};
use rate_limit::RateLimiter;
use retry::RetryPolicy;
use tokens::approximate_tokens;
use transport::ApiTransport;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub model: String,
    pub max_tokens: u32,
    pub enable_caching: bool,
    pub cache_ttl: Duration,
    pub rate_limit_window: Duration,
    pub max_calls_per_window: usize,
    pub display_width: u32,
    pub display_height: u32,
    pub display_number: u32,
}

/// Owns the remote round trip: request shaping, response caching, rate
/// limiting, retries, and local repair of tool-less responses. One instance
/// per run; all mutable state lives on the instance.
pub struct Gateway {
    config: GatewayConfig,
    prompts: PromptManager,
    transport: Box<dyn ApiTransport>,
    retry: RetryPolicy,
    limiter: RateLimiter,
    token_counts: TtlCache<String, u32>,
    /// conversation hash -> response hash; responses are stored once and
    /// shared between identical conversations.
    conversation_index: TtlCache<String, String>,
    responses: TtlCache<String, ApiResponse>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        prompts: PromptManager,
        transport: Box<dyn ApiTransport>,
    ) -> Self {
        tracing::info!(
            caching = config.enable_caching,
            ttl_secs = config.cache_ttl.as_secs(),
            max_calls = config.max_calls_per_window,
            window_secs = config.rate_limit_window.as_secs(),
            "gateway initialized"
        );
        let ttl = config.cache_ttl;
        let limiter = RateLimiter::new(config.rate_limit_window, config.max_calls_per_window);
        Self {
            config,
            prompts,
            transport,
            retry: RetryPolicy::default(),
            limiter,
            token_counts: TtlCache::new(ttl),
            conversation_index: TtlCache::new(ttl),
            responses: TtlCache::new(ttl),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the model for the next action given the transmit-ready slice.
    pub async fn next_action(&mut self, slice: &[Message]) -> PilotResult<ApiResponse> {
        self.purge_caches();

        let wire: Vec<WireMessage> = slice.iter().map(WireMessage::from).collect();
        let system = self.prompts.current_prompt();

        let conversation_hash = if self.config.enable_caching {
            let key = self.fingerprint(&wire, &system);
            if let Some(response_hash) = self.conversation_index.get(&key) {
                if let Some(cached) = self.responses.get(&response_hash) {
                    tracing::info!("using cached response for identical conversation");
                    return Ok(cached);
                }
            }
            Some(key)
        } else {
            None
        };

        let request = ApiRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: wire,
            tools: vec![
                computer_tool(
                    self.config.display_width,
                    self.config.display_height,
                    self.config.display_number,
                ),
                finish_tool(),
            ],
            system,
        };

        let response = self.call_with_retry(&request).await?;
        let response = ensure_tool_use(response);

        if let Some(conversation_hash) = conversation_hash {
            let response_hash = hash_str(&canonical_json(
                &serde_json::to_value(&response.content).unwrap_or(Value::Null),
            ));
            self.responses.insert(response_hash.clone(), response.clone());
            self.conversation_index.insert(conversation_hash, response_hash);
        }

        Ok(response)
    }

    async fn call_with_retry(&mut self, request: &ApiRequest) -> PilotResult<ApiResponse> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            if attempt > 0 {
                tracing::info!(
                    attempt = attempt + 1,
                    max = self.retry.max_retries,
                    "API request retry"
                );
            }
            self.limiter.record(Instant::now());

            match self.transport.create_message(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    if attempt + 1 >= self.retry.max_retries {
                        tracing::error!(
                            status = err.status(),
                            attempts = attempt + 1,
                            "API error persisted after retries"
                        );
                        return Err(PilotError::RetryExhausted {
                            status: err.status(),
                            message: err.message().to_string(),
                        });
                    }
                    let wait = self.retry.backoff_with_jitter(attempt);
                    tracing::warn!(
                        status = err.status(),
                        wait_ms = wait.as_millis() as u64,
                        attempt = attempt + 1,
                        "transient API error, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(status = err.status(), "non-retryable API error");
                    return Err(PilotError::Api {
                        status: err.status(),
                        message: err.message().to_string(),
                    });
                }
            }
        }
    }

    /// Token accounting is advisory: cache first, then the remote counter,
    /// then a character-class approximation. Never fails.
    pub async fn count_tokens(&mut self, text: &str) -> u32 {
        let key = hash_str(text);
        if self.config.enable_caching {
            if let Some(count) = self.token_counts.get(&key) {
                return count;
            }
        }

        self.limiter.acquire().await;
        self.limiter.record(Instant::now());

        match self.transport.count_tokens(&self.config.model, text).await {
            Ok(count) => {
                if self.config.enable_caching {
                    self.token_counts.insert(key, count);
                }
                count
            }
            Err(err) => {
                tracing::warn!(error = %err.message(), "token counting API failed, using approximation");
                approximate_tokens(text)
            }
        }
    }

    fn purge_caches(&mut self) {
        self.token_counts.purge_expired();
        self.conversation_index.purge_expired();
        self.responses.purge_expired();
    }

    /// Deterministic identity of a request: role+content of the slice plus
    /// system prompt, model and max-token setting, key order normalized.
    fn fingerprint(&self, messages: &[WireMessage], system: &str) -> String {
        let value = json!({
            "messages": messages,
            "system": system,
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
        });
        hash_str(&canonical_json(&value))
    }
}

/// If the model replied with prose only, append a synthetic finish call so
/// the loop always has an action to act on.
pub fn ensure_tool_use(response: ApiResponse) -> ApiResponse {
    if response.has_tool_use() {
        return response;
    }
    let text = response.first_text().unwrap_or_default().to_string();
    tracing::info!(text = %text, "no tool use in response, synthesizing finish call");
    let mut repaired = response;
    repaired.content.push(ContentBlock::ToolUse {
        id: format!("synthetic_finish_{}", uuid::Uuid::new_v4()),
        name: FINISH_TOOL_NAME.into(),
        input: json!({
            "success": false,
            "error": format!("Model returned no action: {text}"),
        }),
    });
    repaired
}

/// Render a JSON value with object keys sorted at every level, so hashing
/// is insensitive to field order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", json!(k), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"d": 2, "c": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"c": 3, "d": 2}, "b": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn canonical_json_distinguishes_content() {
        let a: Value = serde_json::from_str(r#"{"a": 1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 2}"#).unwrap();
        assert_ne!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_str("abc"), hash_str("abc"));
        assert_ne!(hash_str("abc"), hash_str("abd"));
    }

    #[test]
    fn synthetic_finish_appended_to_text_only_response() {
        let response = ApiResponse {
            id: "msg_1".into(),
            content: vec![ContentBlock::Text {
                text: "I need more information".into(),
            }],
            stop_reason: None,
        };
        let repaired = ensure_tool_use(response);
        assert!(repaired.has_tool_use());
        let Some(ContentBlock::ToolUse { name, input, .. }) = repaired.content.last() else {
            panic!("expected appended tool use");
        };
        assert_eq!(name, FINISH_TOOL_NAME);
        assert_eq!(input["success"], false);
        assert!(input["error"]
            .as_str()
            .unwrap()
            .contains("I need more information"));
    }

    #[test]
    fn responses_with_tool_use_are_untouched() {
        let response = ApiResponse {
            id: "msg_1".into(),
            content: vec![ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "computer".into(),
                input: json!({"action": "screenshot"}),
            }],
            stop_reason: None,
        };
        let repaired = ensure_tool_use(response.clone());
        assert_eq!(repaired.content, response.content);
    }
}
