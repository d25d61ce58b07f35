//! Shared types between frontend and backend
//!
//! These types are used by both:
//! - the DraftDesk server (native Rust)
//! - the browser editor (TypeScript, via ts-rs bindings)
//!
//! Serializable with serde for JSON over HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Session State
// ============================================================================

/// Top-level editor mode. `Welcome` is left exactly once and never re-entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EditorMode {
    Welcome,
    Editing,
}

/// The three generative operations a session can have in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum OperationKind {
    Draft,
    Refine,
    Scan,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Draft => "draft",
            OperationKind::Refine => "refine",
            OperationKind::Scan => "scan",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible, non-fatal notification produced by the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Proposed edit produced by an improvement scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct Suggestion {
    pub id: String,
    pub original_text: String,
    pub suggested_text: String,
    pub reason: String,
}

/// Snapshot of a contiguous span, in char offsets into the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export)]
pub struct SelectionSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl SelectionSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Client-reported bounding box of a selection, in viewport pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export)]
pub struct SelectionRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Where the floating toolbar is anchored, in viewport pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export)]
pub struct AnchorPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct ActiveSelection {
    pub span: SelectionSpan,
    pub anchor: AnchorPoint,
}

// ============================================================================
// Structured Document Tree
// ============================================================================

/// Structured (rich-text) projection of the Markdown document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export)]
pub struct StructuredDoc {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum Block {
    Heading {
        level: u8,
        content: Vec<Inline>,
    },
    Paragraph {
        content: Vec<Inline>,
    },
    List {
        ordered: bool,
        start: Option<u64>,
        items: Vec<Vec<Block>>,
    },
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    BlockQuote {
        blocks: Vec<Block>,
    },
    Rule,
    Html {
        html: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum Inline {
    Text {
        text: String,
    },
    Strong {
        content: Vec<Inline>,
    },
    Emphasis {
        content: Vec<Inline>,
    },
    Strikethrough {
        content: Vec<Inline>,
    },
    Code {
        code: String,
    },
    Link {
        url: String,
        title: Option<String>,
        content: Vec<Inline>,
    },
    Image {
        url: String,
        alt: String,
    },
    SoftBreak,
    HardBreak,
    Html {
        html: String,
    },
}

// ============================================================================
// HTTP API
// ============================================================================

/// A file picked in the browser. `data` is either a `data:` URI or bare base64.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AttachmentUpload {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DraftRequest {
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefineRequest {
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SelectionRequest {
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub rect: Option<SelectionRect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReplaceDocumentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct ExportResponse {
    pub format: ExportFormat,
    pub content: String,
}

/// Tree projection. `tree` is `None` while a structured edit is live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct StructuredViewResponse {
    pub view_is_source: bool,
    pub tree: Option<StructuredDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct RenderResponse {
    pub html: String,
}

/// How an operation ended, as far as the document is concerned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum OperationStatus {
    /// The document (or suggestion batch) was updated.
    Applied,
    /// Welcome was left with the placeholder document and no backend call.
    Placeholder,
    /// Nothing to do; no backend call was made.
    Skipped,
    /// The call succeeded but produced text identical to what was there.
    Unchanged,
    /// The backend answered with nothing usable.
    Empty,
    /// The call failed; the document is untouched.
    Failed,
    /// The response arrived for a request that is no longer current.
    Discarded,
    /// A suggestion could not be applied because its text is gone.
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct SessionSnapshot {
    pub mode: EditorMode,
    pub document: String,
    pub revision: u64,
    pub in_flight: Option<OperationKind>,
    pub selection: Option<ActiveSelection>,
    /// A selection drag is under way; `selection` still shows the last completed one.
    pub selecting: bool,
    pub suggestions: Vec<Suggestion>,
    pub view_is_source: bool,
    pub word_count: usize,
    pub can_retry_draft: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export)]
pub struct OperationResponse {
    pub status: OperationStatus,
    pub message: Option<String>,
    pub snapshot: SessionSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    #[test]
    fn test_block_tagging() {
        let block = Block::Heading {
            level: 2,
            content: vec![Inline::Text {
                text: "Intro".to_string(),
            }],
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "heading");
        assert_eq!(json["content"][0]["type"], "text");

        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_unit_inline_variants() {
        let json = serde_json::to_string(&Inline::SoftBreak).unwrap();
        assert_eq!(json, r#"{"type":"soft_break"}"#);
    }

    #[test]
    fn test_operation_kind_serialization() {
        let json = serde_json::to_string(&OperationKind::Refine).unwrap();
        assert_eq!(json, "\"refine\"");
        assert_eq!(OperationKind::Scan.as_str(), "scan");
    }

    #[test]
    fn test_draft_request_defaults() {
        let req: DraftRequest = serde_json::from_str("{}").unwrap();
        assert!(req.instructions.is_empty());
        assert!(req.attachments.is_empty());
    }

    #[test]
    fn test_selection_span_len() {
        let span = SelectionSpan {
            start: 4,
            end: 9,
            text: "quick".to_string(),
        };
        assert_eq!(span.len(), 5);
        assert!(!span.is_empty());
    }

    #[test]
    fn export_types() {
        let config = Config::default();
        EditorMode::export(&config).unwrap();
        OperationKind::export(&config).unwrap();
        NoticeLevel::export(&config).unwrap();
        Notice::export(&config).unwrap();
        Suggestion::export(&config).unwrap();
        SelectionSpan::export(&config).unwrap();
        SelectionRect::export(&config).unwrap();
        AnchorPoint::export(&config).unwrap();
        ActiveSelection::export(&config).unwrap();
        StructuredDoc::export(&config).unwrap();
        Block::export(&config).unwrap();
        Inline::export(&config).unwrap();
        AttachmentUpload::export(&config).unwrap();
        DraftRequest::export(&config).unwrap();
        RefineRequest::export(&config).unwrap();
        SelectionRequest::export(&config).unwrap();
        ReplaceDocumentRequest::export(&config).unwrap();
        ExportFormat::export(&config).unwrap();
        ExportResponse::export(&config).unwrap();
        StructuredViewResponse::export(&config).unwrap();
        RenderResponse::export(&config).unwrap();
        OperationStatus::export(&config).unwrap();
        SessionSnapshot::export(&config).unwrap();
        OperationResponse::export(&config).unwrap();
    }
}
