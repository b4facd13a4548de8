use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::YeoshinError;

pub(crate) const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
pub(crate) const ANTHROPIC_BASE_ENV: &str = "YEOSHIN_ANTHROPIC_BASE";
pub(crate) const ANTHROPIC_API_KEY_ENV: &str = "CLAUDE_API_KEY";
const ANTHROPIC_API: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageResponse {
    /// Concatenated text of all `text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

impl AnthropicClient {
    pub fn new() -> Result<Self, YeoshinError> {
        Self::with_key(crate::sources::env_value(ANTHROPIC_API_KEY_ENV))
    }

    /// Fails with `ApiKeyRequired` when no key was resolved.
    pub fn with_key(api_key: Option<String>) -> Result<Self, YeoshinError> {
        let api_key = api_key.ok_or_else(|| YeoshinError::ApiKeyRequired {
            api: ANTHROPIC_API.into(),
            env_var: ANTHROPIC_API_KEY_ENV.into(),
        })?;
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(ANTHROPIC_BASE, ANTHROPIC_BASE_ENV),
            api_key,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String, api_key: &str) -> Result<Self, YeoshinError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn create_message(
        &self,
        request: &MessageRequest<'_>,
    ) -> Result<MessageResponse, YeoshinError> {
        let url = self.endpoint("v1/messages");
        let req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request);
        let resp = crate::sources::apply_cache_mode_with_auth(req, true)
            .send()
            .await?;

        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, ANTHROPIC_API).await?;
        if !status.is_success() {
            let message = match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
                Ok(envelope) => format!(
                    "HTTP {status}: {} ({})",
                    envelope.error.message, envelope.error.kind
                ),
                Err(_) => format!("HTTP {status}: {}", crate::sources::body_excerpt(&bytes)),
            };
            return Err(YeoshinError::Api {
                api: ANTHROPIC_API.to_string(),
                message,
            });
        }

        crate::sources::ensure_json_content_type(ANTHROPIC_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| YeoshinError::ApiJson {
            api: ANTHROPIC_API.to_string(),
            source,
        })
    }

    /// Sends a single user prompt and returns the answer text.
    pub async fn complete(
        &self,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        prompt: &str,
    ) -> Result<String, YeoshinError> {
        let request = MessageRequest {
            model,
            max_tokens,
            temperature,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self.create_message(&request).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(YeoshinError::Api {
                api: ANTHROPIC_API.to_string(),
                message: format!(
                    "Empty response (stop_reason: {})",
                    response.stop_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }
        Ok(text)
    }
}
