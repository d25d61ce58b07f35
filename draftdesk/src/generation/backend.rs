//! Hosted-model backends.
//!
//! `GenerationBackend` is the seam between prompt construction and the wire:
//! the client builds a [`GenerationRequest`], a backend turns it into one
//! request/response exchange. Tests substitute their own backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::GenerationError;
use crate::config::Config;

pub type SharedGenerationBackend = Arc<dyn GenerationBackend>;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestPart {
    Text(String),
    InlineData { mime_type: String, data: String },
}

/// One stateless exchange with the model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Which operation issued the call; used for logs only.
    pub callsite: &'static str,
    pub system_instruction: Option<String>,
    pub parts: Vec<RequestPart>,
    /// When set the backend must ask for JSON matching this schema.
    pub response_schema: Option<serde_json::Value>,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Returns the model's text. Empty or blocked responses yield `Ok("")`.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

// ============================================================================
// Gemini generateContent
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiBackend {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiBackend {
    /// Fails with `GenerationError::Config` when no credential is configured.
    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        let api_key = config.require_api_key()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let callsite = request.callsite;
        let body = GenerateContentBody::from(request);
        let started = Instant::now();

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| raw.chars().take(500).collect());
            tracing::warn!(
                callsite,
                model = %self.model,
                status = status.as_u16(),
                latency_ms,
                "Model backend returned an error"
            );
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&raw)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        if let Some(reason) = parsed.block_reason() {
            tracing::warn!(callsite, model = %self.model, reason, "Prompt blocked by backend");
        }
        let text = parsed.text();
        tracing::info!(
            callsite,
            model = %self.model,
            latency_ms,
            response_chars = text.chars().count(),
            "Model call completed"
        );
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl From<GenerationRequest> for GenerateContentBody {
    fn from(request: GenerationRequest) -> Self {
        let parts = request
            .parts
            .into_iter()
            .map(|part| match part {
                RequestPart::Text(text) => Part {
                    text: Some(text),
                    inline_data: None,
                },
                RequestPart::InlineData { mime_type, data } => Part {
                    text: None,
                    inline_data: Some(InlineData { mime_type, data }),
                },
            })
            .collect();
        Self {
            system_instruction: request.system_instruction.map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text),
                    inline_data: None,
                }],
            }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: request.response_schema.map(|schema| GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
