//! `OpenRouter`-backed [`LlmAdapter`], used for article generation where a
//! higher-capacity model than the Gemini default is wanted.

use async_trait::async_trait;
use pipeline_core::{LlmAdapter, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

const CHAT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Thin client over `OpenRouter`'s OpenAI-compatible chat completions
/// endpoint.
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterAdapter {
    /// Construct an adapter authenticating every call with `api_key`.
    #[must_use]
    pub const fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl LlmAdapter for OpenRouterAdapter {
    async fn complete(&self, model: &str, prompt: &str) -> PipelineResult<String> {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| PipelineError::transient("openrouter.complete", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transient(
                "openrouter.complete",
                format!("openrouter returned {status}: {body}"),
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::transient("openrouter.complete", err))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::poison("openrouter returned no choices"))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}
