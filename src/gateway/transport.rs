use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::protocol::wire::{ApiRequest, ApiResponse, TokenCountResponse, COMPUTER_USE_BETA};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Failure modes of a single remote attempt, before retry policy applies.
#[derive(Debug, Clone)]
pub enum TransportError {
    RateLimited { message: String },
    Timeout { message: String },
    Status { status: u16, message: String },
    Network { message: String },
}

impl TransportError {
    /// HTTP status to surface in typed gateway errors.
    pub fn status(&self) -> u16 {
        match self {
            TransportError::RateLimited { .. } => 429,
            TransportError::Timeout { .. } => 504,
            TransportError::Status { status, .. } => *status,
            TransportError::Network { .. } => 0,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TransportError::RateLimited { message }
            | TransportError::Timeout { message }
            | TransportError::Status { message, .. }
            | TransportError::Network { message } => message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::RateLimited { .. } | TransportError::Timeout { .. } => true,
            TransportError::Status { status, .. } => super::retry::is_retryable_status(*status),
            TransportError::Network { .. } => false,
        }
    }
}

/// The network seam. The gateway only ever talks to this trait, so tests
/// drive it with scripted in-process transports.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn create_message(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;

    async fn count_tokens(&self, model: &str, text: &str) -> Result<u32, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", COMPUTER_USE_BETA)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(TransportError::RateLimited { message });
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            message: err.to_string(),
        }
    } else {
        TransportError::Network {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn create_message(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let response = self
            .request("/v1/messages")
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = Self::check_status(response).await?;
        response
            .json::<ApiResponse>()
            .await
            .map_err(map_reqwest_error)
    }

    async fn count_tokens(&self, model: &str, text: &str) -> Result<u32, TransportError> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": text}],
        });
        let response = self
            .request("/v1/messages/count_tokens")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = Self::check_status(response).await?;
        let counted = response
            .json::<TokenCountResponse>()
            .await
            .map_err(map_reqwest_error)?;
        Ok(counted.input_tokens)
    }
}
