//! Gemini-backed [`SpeechAdapter`] and [`LlmAdapter`] implementation, used
//! for transcription, timestamp extraction, and summarization.

use std::path::Path;

use async_trait::async_trait;
use pipeline_core::{LlmAdapter, PipelineError, PipelineResult, SpeechAdapter};
use serde::{Deserialize, Serialize};

const GENERATE_CONTENT_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";

/// Thin client over the Gemini `generateContent` REST endpoint.
pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiAdapter {
    /// Construct an adapter bound to `model`, authenticating every call
    /// with `api_key`.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    async fn generate_content(&self, parts: Vec<Part>) -> PipelineResult<String> {
        let url = format!(
            "{GENERATE_CONTENT_URL}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|err| PipelineError::transient("gemini.generate_content", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transient(
                "gemini.generate_content",
                format!("gemini returned {status}: {body}"),
            ));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::transient("gemini.generate_content", err))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text.unwrap_or_default())
            .ok_or_else(|| PipelineError::poison("gemini returned no candidates"))
    }
}

#[async_trait]
impl SpeechAdapter for GeminiAdapter {
    async fn transcribe(&self, chunk_path: &Path, prompt: &str) -> PipelineResult<String> {
        let audio_bytes = tokio::fs::read(chunk_path)
            .await
            .map_err(|err| PipelineError::transient("gemini.transcribe.read_chunk", err))?;
        let mime_type = mime_guess::from_path(chunk_path)
            .first_raw()
            .unwrap_or("audio/wav")
            .to_string();

        let parts = vec![
            Part::text(prompt),
            Part::inline_audio(mime_type, audio_bytes),
        ];
        self.generate_content(parts).await
    }
}

#[async_trait]
impl LlmAdapter for GeminiAdapter {
    async fn complete(&self, model: &str, prompt: &str) -> PipelineResult<String> {
        let url = format!(
            "{GENERATE_CONTENT_URL}/{model}:generateContent?key={}",
            self.api_key
        );
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::text(prompt)],
            }],
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|err| PipelineError::transient("gemini.complete", err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transient(
                "gemini.complete",
                format!("gemini returned {status}: {body}"),
            ));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::transient("gemini.complete", err))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text.unwrap_or_default())
            .ok_or_else(|| PipelineError::poison("gemini returned no candidates"))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline_audio(mime_type: String, bytes: Vec<u8>) -> Self {
        use base64::Engine;
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
