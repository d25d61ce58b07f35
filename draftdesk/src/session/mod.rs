//! Editor session controller.
//!
//! Owns the canonical Markdown document and everything derived from it:
//! selection, pending suggestions, the structured-view flag and the notice
//! queue. Generative operations are split into `begin_*` (validate, stamp a
//! token, hand out a ticket) and `complete_*` (apply or discard the result),
//! so a caller holding the session behind a lock can release it while the
//! backend call is suspended.
//!
//! At most one generative request is outstanding. Every mutation of the
//! document is computed into a new buffer and swapped in whole, bumping the
//! revision and clearing the selection.

mod request;

use chrono::Utc;
use shared_types::{
    EditorMode, ExportFormat, Notice, NoticeLevel, OperationKind, OperationStatus,
    SelectionRect, SessionSnapshot, StructuredDoc, Suggestion,
};
use std::collections::VecDeque;

pub use request::{DraftTicket, RefineTicket, RequestState, RequestToken, ScanTicket};

use crate::attachment::Attachment;
use crate::generation::{GenerationClient, GenerationError, Refinement};
use crate::markdown::{self, Highlight, MarkdownConfig, RenderOptions};
use crate::selection::{char_range_to_bytes, SelectionState, SelectionTracker};
use crate::suggestions::{SuggestionError, SuggestionStore};

/// Installed when the user leaves the welcome screen without generating.
pub const PLACEHOLDER_DOCUMENT: &str =
    "# Untitled\n\nStart writing here, or select text and ask for a rewrite.\n";

const MAX_NOTICES: usize = 50;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a {} request is already in flight", .0.as_str())]
    Busy(OperationKind),
    #[error("no active selection")]
    NoSelection,
    #[error("no failed draft to retry")]
    NothingToRetry,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Suggestion(#[from] SuggestionError),
}

/// How a controller operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OperationStatus,
    pub message: Option<String>,
}

impl Outcome {
    fn new(status: OperationStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }

    fn with_message(status: OperationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

/// Result of `begin_draft`: either a ticket to execute, or an immediate
/// outcome when there was nothing to send.
#[derive(Debug)]
pub enum DraftStart {
    Ready(DraftTicket),
    Finished(Outcome),
}

#[derive(Debug, Default)]
struct Document {
    text: String,
    revision: u64,
}

#[derive(Debug, Clone)]
struct DraftPlan {
    instructions: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug)]
pub struct EditorSession {
    mode: EditorMode,
    document: Document,
    selection: SelectionTracker,
    suggestions: SuggestionStore,
    request: RequestState,
    next_token: u64,
    /// True while the structured view's own state is authoritative.
    view_is_source: bool,
    failed_draft: Option<DraftPlan>,
    notices: VecDeque<Notice>,
    markdown: MarkdownConfig,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorSession {
    pub fn new() -> Self {
        Self {
            mode: EditorMode::Welcome,
            document: Document::default(),
            selection: SelectionTracker::new(),
            suggestions: SuggestionStore::new(),
            request: RequestState::Idle,
            next_token: 0,
            view_is_source: false,
            failed_draft: None,
            notices: VecDeque::new(),
            markdown: MarkdownConfig::default(),
        }
    }

    pub fn with_markdown_config(mut self, config: MarkdownConfig) -> Self {
        self.markdown = config;
        self
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    pub fn document(&self) -> &str {
        &self.document.text
    }

    pub fn revision(&self) -> u64 {
        self.document.revision
    }

    pub fn request_state(&self) -> RequestState {
        self.request
    }

    pub fn selection(&self) -> &SelectionState {
        self.selection.state()
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        self.suggestions.list()
    }

    pub fn view_is_source(&self) -> bool {
        self.view_is_source
    }

    pub fn can_retry_draft(&self) -> bool {
        self.failed_draft.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            document: self.document.text.clone(),
            revision: self.document.revision,
            in_flight: self.request.in_flight(),
            selection: self.selection.active(),
            selecting: self.selection.pending().is_some(),
            suggestions: self.suggestions.list().to_vec(),
            view_is_source: self.view_is_source,
            word_count: markdown::word_count(&self.document.text),
            can_retry_draft: self.failed_draft.is_some(),
        }
    }

    // ========================================================================
    // Draft
    // ========================================================================

    pub fn begin_draft(
        &mut self,
        instructions: &str,
        attachments: Vec<Attachment>,
    ) -> Result<DraftStart, SessionError> {
        self.ensure_idle()?;

        if instructions.trim().is_empty() && attachments.is_empty() {
            return Ok(DraftStart::Finished(match self.mode {
                EditorMode::Welcome => self.leave_welcome(),
                EditorMode::Editing => Outcome::with_message(
                    OperationStatus::Skipped,
                    "Nothing to draft from: add instructions or an attachment.",
                ),
            }));
        }

        let token = self.issue(OperationKind::Draft)?;
        tracing::info!(
            token = token.value(),
            attachments = attachments.len(),
            "Draft request issued"
        );
        Ok(DraftStart::Ready(DraftTicket {
            token,
            instructions: instructions.to_string(),
            attachments,
        }))
    }

    pub fn complete_draft(
        &mut self,
        ticket: DraftTicket,
        result: Result<String, GenerationError>,
    ) -> Outcome {
        if !self.settle(ticket.token) {
            tracing::info!(token = ticket.token.value(), "Discarding late draft response");
            return Outcome::new(OperationStatus::Discarded);
        }

        let plan = DraftPlan {
            instructions: ticket.instructions,
            attachments: ticket.attachments,
        };
        match result {
            Ok(text) if text.trim().is_empty() => {
                self.failed_draft = Some(plan);
                let message = "The model returned an empty draft. Try again or rephrase.";
                self.notify(NoticeLevel::Warning, message);
                Outcome::with_message(OperationStatus::Empty, message)
            }
            Ok(text) => {
                self.failed_draft = None;
                self.suggestions.clear();
                self.view_is_source = false;
                self.swap_document(text);
                self.mode = EditorMode::Editing;
                tracing::info!(
                    revision = self.document.revision,
                    chars = markdown::char_count(&self.document.text),
                    "Draft applied"
                );
                Outcome::new(OperationStatus::Applied)
            }
            Err(error) => {
                self.failed_draft = Some(plan);
                let message = format!("Draft failed: {error}");
                self.notify(NoticeLevel::Error, &message);
                Outcome::with_message(OperationStatus::Failed, message)
            }
        }
    }

    /// Re-issue the last draft that failed or came back empty.
    pub fn retry_draft(&mut self) -> Result<DraftStart, SessionError> {
        self.ensure_idle()?;
        let plan = self
            .failed_draft
            .clone()
            .ok_or(SessionError::NothingToRetry)?;
        tracing::info!("Retrying last failed draft");
        self.begin_draft(&plan.instructions, plan.attachments)
    }

    pub async fn draft(
        &mut self,
        client: &GenerationClient,
        instructions: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Outcome, SessionError> {
        match self.begin_draft(instructions, attachments)? {
            DraftStart::Finished(outcome) => Ok(outcome),
            DraftStart::Ready(ticket) => {
                let result = ticket.execute(client).await;
                Ok(self.complete_draft(ticket, result))
            }
        }
    }

    /// Leave the welcome screen with the placeholder document.
    pub fn start_blank(&mut self) -> Outcome {
        match self.mode {
            EditorMode::Welcome => self.leave_welcome(),
            EditorMode::Editing => Outcome::new(OperationStatus::Skipped),
        }
    }

    // ========================================================================
    // Refine
    // ========================================================================

    pub fn begin_refine(&mut self, instruction: &str) -> Result<RefineTicket, SessionError> {
        self.ensure_idle()?;
        let span = self
            .selection
            .active_span()
            .cloned()
            .ok_or(SessionError::NoSelection)?;
        if instruction.trim().is_empty() {
            return Err(SessionError::InvalidRequest(
                "refine instruction is empty".to_string(),
            ));
        }

        let token = self.issue(OperationKind::Refine)?;
        tracing::info!(
            token = token.value(),
            start = span.start,
            end = span.end,
            "Refine request issued"
        );
        Ok(RefineTicket {
            token,
            revision: self.document.revision,
            span,
            instruction: instruction.to_string(),
            document: self.document.text.clone(),
        })
    }

    pub fn complete_refine(&mut self, ticket: RefineTicket, refinement: Refinement) -> Outcome {
        if !self.settle(ticket.token) {
            tracing::info!(token = ticket.token.value(), "Discarding late refine response");
            return Outcome::new(OperationStatus::Discarded);
        }
        if ticket.revision != self.document.revision {
            tracing::info!(
                issued_at = ticket.revision,
                current = self.document.revision,
                "Document changed during refine; discarding result"
            );
            let message = "The document changed while the rewrite was in progress; it was discarded.";
            self.notify(NoticeLevel::Info, message);
            return Outcome::with_message(OperationStatus::Discarded, message);
        }

        let rewritten = match refinement {
            Refinement::Rewritten(text) => text,
            Refinement::Fallback { error, .. } => {
                let message = format!("Rewrite failed: {error}. The selection was left unchanged.");
                self.notify(NoticeLevel::Error, &message);
                return Outcome::with_message(OperationStatus::Failed, message);
            }
        };
        if rewritten == ticket.span.text {
            return Outcome::with_message(
                OperationStatus::Unchanged,
                "The rewrite matched the original text.",
            );
        }

        let range = char_range_to_bytes(&self.document.text, ticket.span.start, ticket.span.end)
            .filter(|(start, end)| self.document.text[*start..*end] == ticket.span.text);
        let Some((start, end)) = range else {
            tracing::warn!("Selection no longer matches the document; discarding rewrite");
            return Outcome::new(OperationStatus::Discarded);
        };

        let mut next = String::with_capacity(self.document.text.len() + rewritten.len());
        next.push_str(&self.document.text[..start]);
        next.push_str(&rewritten);
        next.push_str(&self.document.text[end..]);
        self.swap_document(next);
        tracing::info!(revision = self.document.revision, "Refinement applied");
        Outcome::new(OperationStatus::Applied)
    }

    pub async fn refine(
        &mut self,
        client: &GenerationClient,
        instruction: &str,
    ) -> Result<Outcome, SessionError> {
        let ticket = self.begin_refine(instruction)?;
        let refinement = ticket.execute(client).await;
        Ok(self.complete_refine(ticket, refinement))
    }

    // ========================================================================
    // Scan
    // ========================================================================

    pub fn begin_scan(&mut self) -> Result<ScanTicket, SessionError> {
        let token = self.issue(OperationKind::Scan)?;
        tracing::info!(token = token.value(), "Scan request issued");
        Ok(ScanTicket {
            token,
            document: self.document.text.clone(),
        })
    }

    pub fn complete_scan(
        &mut self,
        ticket: ScanTicket,
        result: Result<Vec<Suggestion>, GenerationError>,
    ) -> Outcome {
        if !self.settle(ticket.token) {
            tracing::info!(token = ticket.token.value(), "Discarding late scan response");
            return Outcome::new(OperationStatus::Discarded);
        }

        match result {
            Ok(batch) if batch.is_empty() => {
                self.suggestions.clear();
                let message = "No suggestions for this document.";
                self.notify(NoticeLevel::Info, message);
                Outcome::with_message(OperationStatus::Empty, message)
            }
            Ok(batch) => {
                let count = batch.len();
                self.suggestions.load(batch);
                tracing::info!(count, "Suggestion batch loaded");
                Outcome::with_message(OperationStatus::Applied, format!("{count} suggestion(s)"))
            }
            Err(error @ GenerationError::ScanParse(_)) => {
                self.suggestions.clear();
                let message = format!("Scan output was unreadable ({error}); showing no suggestions.");
                self.notify(NoticeLevel::Warning, &message);
                Outcome::with_message(OperationStatus::Failed, message)
            }
            Err(error) => {
                let message = format!("Scan failed: {error}");
                self.notify(NoticeLevel::Error, &message);
                Outcome::with_message(OperationStatus::Failed, message)
            }
        }
    }

    pub async fn scan(&mut self, client: &GenerationClient) -> Result<Outcome, SessionError> {
        let ticket = self.begin_scan()?;
        let result = ticket.execute(client).await;
        Ok(self.complete_scan(ticket, result))
    }

    /// Abandon the outstanding request. Its response will be discarded.
    pub fn cancel(&mut self) -> Option<OperationKind> {
        let RequestState::InFlight { kind, token } = self.request else {
            return None;
        };
        self.request = RequestState::Idle;
        tracing::info!(token = token.value(), kind = kind.as_str(), "Request cancelled");
        self.notify(
            NoticeLevel::Info,
            format!("Cancelled the pending {} request.", kind.as_str()),
        );
        Some(kind)
    }

    /// Release `token` without a response, e.g. when the call could not be
    /// made at all or its caller went away. No-op if the token is not current.
    pub fn abandon(&mut self, token: RequestToken) -> bool {
        let released = self.settle(token);
        if released {
            tracing::debug!(token = token.value(), "Request abandoned without a response");
        }
        released
    }

    // ========================================================================
    // Document, selection and suggestions
    // ========================================================================

    /// User edit in the plain-markup view. Returns the new revision.
    pub fn replace_document(&mut self, text: String) -> u64 {
        if text != self.document.text {
            self.view_is_source = false;
            self.swap_document(text);
        }
        self.document.revision
    }

    pub fn selection_changing(&mut self, start: usize, end: usize) {
        self.selection.on_selection_change(start, end);
    }

    pub fn select(
        &mut self,
        start: usize,
        end: usize,
        rect: Option<SelectionRect>,
    ) -> &SelectionState {
        self.selection
            .on_selection_complete(&self.document.text, start, end, rect)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn apply_suggestion(&mut self, id: &str) -> Result<Outcome, SessionError> {
        match self.suggestions.apply(id, &self.document.text) {
            Ok(next) => {
                self.swap_document(next);
                tracing::info!(id, revision = self.document.revision, "Suggestion applied");
                Ok(Outcome::new(OperationStatus::Applied))
            }
            Err(SuggestionError::Stale(id)) => {
                let message = "That suggestion no longer matches the document and was removed.";
                tracing::info!(id = %id, "Stale suggestion retired");
                self.notify(NoticeLevel::Info, message);
                Ok(Outcome::with_message(OperationStatus::Stale, message))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn dismiss_suggestion(&mut self, id: &str) -> Result<Suggestion, SessionError> {
        self.suggestions
            .dismiss(id)
            .ok_or_else(|| SuggestionError::NotFound(id.to_string()).into())
    }

    // ========================================================================
    // Projections
    // ========================================================================

    /// Tree projection of the document, or `None` while a structured edit is
    /// live and the view's own state is authoritative.
    pub fn structured_view(&self) -> Option<StructuredDoc> {
        if self.view_is_source {
            None
        } else {
            Some(markdown::to_structured(&self.document.text))
        }
    }

    /// Hand authority to the structured view until commit or cancel.
    pub fn begin_structured_edit(&mut self) -> StructuredDoc {
        self.view_is_source = true;
        markdown::to_structured(&self.document.text)
    }

    /// Serialize the edited tree back into the document. Returns the revision.
    pub fn commit_structured_edit(&mut self, tree: &StructuredDoc) -> u64 {
        self.view_is_source = false;
        let markup = markdown::to_markup(tree);
        if markup != self.document.text {
            self.swap_document(markup);
        }
        self.document.revision
    }

    pub fn cancel_structured_edit(&mut self) {
        self.view_is_source = false;
    }

    pub fn render_html(&self, highlight: Option<Highlight>) -> String {
        let options = RenderOptions {
            config: self.markdown.clone(),
            highlight,
        };
        markdown::render_html(&markdown::to_structured(&self.document.text), &options)
    }

    pub fn export(&self, format: ExportFormat) -> String {
        match format {
            ExportFormat::Markdown => self.document.text.clone(),
            ExportFormat::Html => self.render_html(None),
        }
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.request.in_flight() {
            Some(kind) => Err(SessionError::Busy(kind)),
            None => Ok(()),
        }
    }

    fn issue(&mut self, kind: OperationKind) -> Result<RequestToken, SessionError> {
        self.ensure_idle()?;
        self.next_token += 1;
        let token = RequestToken(self.next_token);
        self.request = RequestState::InFlight { kind, token };
        Ok(token)
    }

    /// Clears the in-flight state if `token` is current.
    fn settle(&mut self, token: RequestToken) -> bool {
        match self.request {
            RequestState::InFlight { token: current, .. } if current == token => {
                self.request = RequestState::Idle;
                true
            }
            _ => false,
        }
    }

    fn swap_document(&mut self, text: String) {
        self.document.text = text;
        self.document.revision += 1;
        self.selection.on_document_mutated();
    }

    /// The placeholder only fills a blank document; text typed on the
    /// welcome screen is kept.
    fn leave_welcome(&mut self) -> Outcome {
        self.mode = EditorMode::Editing;
        if !self.document.text.trim().is_empty() {
            tracing::info!(
                revision = self.document.revision,
                "Left welcome screen keeping the existing document"
            );
            return Outcome::with_message(
                OperationStatus::Skipped,
                "Kept the existing document.",
            );
        }
        self.swap_document(PLACEHOLDER_DOCUMENT.to_string());
        tracing::info!("Left welcome screen with placeholder document");
        Outcome::new(OperationStatus::Placeholder)
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => tracing::warn!(notice = %message, "Session notice"),
            _ => tracing::debug!(level = ?level, notice = %message, "Session notice"),
        }
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            level,
            message,
            timestamp: Utc::now(),
        });
    }
}
