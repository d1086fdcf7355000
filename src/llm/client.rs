use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use super::error::ApiError;
use super::types::{ChatRequest, ChatResponse};

/// Anything that can answer a chat completion request.
///
/// The translator is generic over this so tests can swap in a scripted sender.
pub trait ChatSender: Send + Sync {
    fn send_chat(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, ApiError>> + Send;
}

pub struct ChatClient {
    api_key: String,
    client: Client,
    endpoint: String,
}

impl ChatClient {
    /// Build a client for an OpenAI-compatible base URL such as
    /// `https://api.openai.com/v1`.
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatSender for ChatClient {
    async fn send_chat(&self, req: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { ApiError::Timeout } else { e.into() })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| (secs * 1000.0) as u64);
            return Err(ApiError::RateLimited { retry_after_ms });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(body)
    }
}
