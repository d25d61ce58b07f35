//! Generation client: draft, refine, and scan over a hosted model.
//!
//! Each operation is a single stateless request/response exchange. Nothing
//! here retries: a failed call may be billable, so retrying is left to an
//! explicit user action.

mod backend;
pub mod prompts;

use serde::Deserialize;
use shared_types::Suggestion;
use std::collections::HashSet;

pub use backend::{
    GeminiBackend, GenerationBackend, GenerationRequest, RequestPart, SharedGenerationBackend,
};

use crate::attachment::Attachment;
use crate::config::{ConfigError, GenerationSettings};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("could not parse scan output: {0}")]
    ScanParse(String),
}

/// Result of a refine call. A failure still yields text (the original
/// selection) but is tagged so callers can tell it from a no-op rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refinement {
    Rewritten(String),
    Fallback {
        original: String,
        error: GenerationError,
    },
}

pub struct GenerationClient {
    backend: SharedGenerationBackend,
    settings: GenerationSettings,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GenerationClient {
    pub fn new(backend: SharedGenerationBackend, settings: GenerationSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Draft a whole document. Empty instructions with no attachments is a
    /// no-op that returns `""` without contacting the backend.
    pub async fn generate_draft(
        &self,
        instructions: &str,
        attachments: &[Attachment],
    ) -> Result<String, GenerationError> {
        if instructions.trim().is_empty() && attachments.is_empty() {
            return Ok(String::new());
        }

        let mut parts: Vec<RequestPart> = attachments
            .iter()
            .map(|a| RequestPart::InlineData {
                mime_type: a.mime_type().to_string(),
                data: a.payload().to_string(),
            })
            .collect();
        parts.push(RequestPart::Text(prompts::draft_directive(
            instructions,
            attachments,
        )));

        tracing::info!(
            attachments = attachments.len(),
            spoken = attachments.iter().any(|a| a.media_kind().is_spoken()),
            "Requesting draft"
        );
        let raw = self
            .backend
            .generate(GenerationRequest {
                callsite: "draft",
                system_instruction: Some(prompts::DRAFT_SYSTEM_PROMPT.to_string()),
                parts,
                response_schema: None,
            })
            .await?;
        Ok(prompts::strip_wrapping_fence(&raw).to_string())
    }

    /// Rewrite `selection` per `instruction`, with a bounded excerpt of
    /// `document` around char offset `selection_start` as context. Never
    /// fails outright; see [`Refinement`].
    pub async fn refine_selection(
        &self,
        selection: &str,
        instruction: &str,
        document: &str,
        selection_start: Option<usize>,
    ) -> Refinement {
        let excerpt = prompts::context_excerpt(
            document,
            selection,
            selection_start,
            self.settings.refine_context_chars,
        );
        tracing::info!(
            selection_chars = selection.chars().count(),
            context_chars = excerpt.chars().count(),
            "Requesting refinement"
        );

        let result = self
            .backend
            .generate(GenerationRequest {
                callsite: "refine",
                system_instruction: Some(prompts::REFINE_SYSTEM_PROMPT.to_string()),
                parts: vec![RequestPart::Text(prompts::refine_prompt(
                    &excerpt,
                    selection,
                    instruction,
                ))],
                response_schema: None,
            })
            .await;

        let fallback = |error: GenerationError| {
            tracing::warn!(error = %error, "Refinement failed; keeping original selection");
            Refinement::Fallback {
                original: selection.to_string(),
                error,
            }
        };
        match result {
            Ok(raw) => {
                let cleaned = prompts::clean_refinement(&raw, selection);
                if cleaned.is_empty() {
                    fallback(GenerationError::InvalidResponse(
                        "empty refinement".to_string(),
                    ))
                } else {
                    Refinement::Rewritten(cleaned)
                }
            }
            Err(error) => fallback(error),
        }
    }

    /// Ask for a small batch of literal-substring suggestions.
    ///
    /// Documents under `scan_min_chars` return `[]` without a backend call.
    pub async fn scan_for_improvements(
        &self,
        document: &str,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        let length = document.trim().chars().count();
        if length < self.settings.scan_min_chars {
            tracing::debug!(
                length,
                min = self.settings.scan_min_chars,
                "Document too short to scan"
            );
            return Ok(Vec::new());
        }

        let max = self.settings.scan_max_suggestions;
        let raw = self
            .backend
            .generate(GenerationRequest {
                callsite: "scan",
                system_instruction: Some(prompts::SCAN_SYSTEM_PROMPT.to_string()),
                parts: vec![RequestPart::Text(prompts::scan_prompt(document, max))],
                response_schema: Some(prompts::scan_schema(max)),
            })
            .await?;

        let parsed = parse_scan_output(&raw)?;
        let suggestions = normalize_suggestions(parsed, document, max);
        tracing::info!(count = suggestions.len(), "Scan produced suggestions");
        Ok(suggestions)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuggestion {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(alias = "original_text")]
    original_text: String,
    #[serde(alias = "suggested_text")]
    suggested_text: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScanPayload {
    List(Vec<RawSuggestion>),
    Wrapped { suggestions: Vec<RawSuggestion> },
}

fn parse_scan_output(raw: &str) -> Result<Vec<RawSuggestion>, GenerationError> {
    let body = prompts::strip_wrapping_fence(raw);
    if body.is_empty() {
        return Err(GenerationError::ScanParse("empty response".to_string()));
    }
    match serde_json::from_str::<ScanPayload>(body) {
        Ok(ScanPayload::List(list)) | Ok(ScanPayload::Wrapped { suggestions: list }) => Ok(list),
        Err(e) => Err(GenerationError::ScanParse(e.to_string())),
    }
}

/// Keep actionable entries only, cap the batch and make ids unique.
fn normalize_suggestions(raw: Vec<RawSuggestion>, document: &str, max: usize) -> Vec<Suggestion> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|s| {
            !s.original_text.is_empty()
                && s.original_text != s.suggested_text
                && document.contains(&s.original_text)
        })
        .take(max)
        .map(|s| {
            let id = match s.id {
                Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id,
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
            let id = if id.is_empty() || !seen.insert(id.clone()) {
                let fresh = ulid::Ulid::new().to_string();
                seen.insert(fresh.clone());
                fresh
            } else {
                id
            };
            Suggestion {
                id,
                original_text: s.original_text,
                suggested_text: s.suggested_text,
                reason: s.reason,
            }
        })
        .collect()
}
