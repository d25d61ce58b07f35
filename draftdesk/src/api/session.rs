//! Session endpoints
//!
//! Generative handlers follow the same shape: lock, `begin_*`, unlock, run
//! the ticket against the backend, lock again, `complete_*`. A handler
//! dropped in between (client gone) releases its token through
//! `IssuedRequest`.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use shared_types::{
    AttachmentUpload, DraftRequest, ExportFormat, ExportResponse, Notice, OperationResponse,
    RefineRequest, RenderResponse, ReplaceDocumentRequest, SelectionRequest, SessionSnapshot,
    StructuredDoc, StructuredViewResponse,
};

use super::ApiError;
use crate::app_state::AppState;
use crate::attachment::Attachment;
use crate::markdown::Highlight;
use crate::session::{DraftStart, EditorSession, Outcome, RequestToken};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn operation_response(session: &EditorSession, outcome: Outcome) -> Json<OperationResponse> {
    Json(OperationResponse {
        status: outcome.status,
        message: outcome.message,
        snapshot: session.snapshot(),
    })
}

/// Holds an issued token until its response is handed back to the session.
/// Dropped while still armed, it abandons the token so the session does not
/// stay busy.
struct IssuedRequest {
    state: AppState,
    token: Option<RequestToken>,
}

impl IssuedRequest {
    fn new(state: &AppState, token: RequestToken) -> Self {
        Self {
            state: state.clone(),
            token: Some(token),
        }
    }

    /// The response reached the session; nothing to release.
    fn disarm(&mut self) {
        self.token = None;
    }
}

impl Drop for IssuedRequest {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        tracing::info!(token = token.value(), "Request ended without completing; releasing");
        if let Ok(mut session) = self.state.session().try_lock() {
            session.abandon(token);
            return;
        }
        let state = self.state.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    state.session().lock().await.abandon(token);
                });
            }
            Err(_) => {
                tracing::warn!(token = token.value(), "No runtime to release request token");
            }
        }
    }
}

fn decode_attachments(
    uploads: &[AttachmentUpload],
    max_bytes: usize,
) -> Result<Vec<Attachment>, ApiError> {
    uploads
        .iter()
        .map(|upload| {
            Attachment::from_upload(
                upload.name.clone(),
                upload.mime_type.as_deref(),
                &upload.data,
                max_bytes,
            )
            .map_err(ApiError::from)
        })
        .collect()
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session().lock().await.snapshot())
}

pub async fn replace_document(
    State(state): State<AppState>,
    Json(request): Json<ReplaceDocumentRequest>,
) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.replace_document(request.content);
    Json(session.snapshot())
}

pub async fn start_blank(State(state): State<AppState>) -> Json<OperationResponse> {
    let mut session = state.session().lock().await;
    let outcome = session.start_blank();
    operation_response(&session, outcome)
}

// ============================================================================
// Generative operations
// ============================================================================

pub async fn draft(
    State(state): State<AppState>,
    Json(request): Json<DraftRequest>,
) -> ApiResult<OperationResponse> {
    let attachments = decode_attachments(&request.attachments, state.max_attachment_bytes())?;
    let start = state
        .session()
        .lock()
        .await
        .begin_draft(&request.instructions, attachments)?;
    finish_draft(&state, start).await
}

pub async fn retry_draft(State(state): State<AppState>) -> ApiResult<OperationResponse> {
    let start = state.session().lock().await.retry_draft()?;
    finish_draft(&state, start).await
}

async fn finish_draft(state: &AppState, start: DraftStart) -> ApiResult<OperationResponse> {
    let ticket = match start {
        DraftStart::Finished(outcome) => {
            return Ok(operation_response(&*state.session().lock().await, outcome));
        }
        DraftStart::Ready(ticket) => ticket,
    };
    let mut issued = IssuedRequest::new(state, ticket.token());
    let client = state.generation()?;
    let result = ticket.execute(&client).await;

    let mut session = state.session().lock().await;
    issued.disarm();
    let outcome = session.complete_draft(ticket, result);
    Ok(operation_response(&session, outcome))
}

pub async fn refine(
    State(state): State<AppState>,
    Json(request): Json<RefineRequest>,
) -> ApiResult<OperationResponse> {
    let ticket = state
        .session()
        .lock()
        .await
        .begin_refine(&request.instruction)?;
    let mut issued = IssuedRequest::new(&state, ticket.token());
    let client = state.generation()?;
    let refinement = ticket.execute(&client).await;

    let mut session = state.session().lock().await;
    issued.disarm();
    let outcome = session.complete_refine(ticket, refinement);
    Ok(operation_response(&session, outcome))
}

pub async fn scan(State(state): State<AppState>) -> ApiResult<OperationResponse> {
    let ticket = state.session().lock().await.begin_scan()?;
    let mut issued = IssuedRequest::new(&state, ticket.token());
    let client = state.generation()?;
    let result = ticket.execute(&client).await;

    let mut session = state.session().lock().await;
    issued.disarm();
    let outcome = session.complete_scan(ticket, result);
    Ok(operation_response(&session, outcome))
}

pub async fn cancel(State(state): State<AppState>) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.cancel();
    Json(session.snapshot())
}

// ============================================================================
// Selection and suggestions
// ============================================================================

pub async fn select(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.select(request.start, request.end, request.rect);
    Json(session.snapshot())
}

/// Drag still in progress. Recorded, but the published selection is unchanged.
pub async fn selection_changing(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.selection_changing(request.start, request.end);
    Json(session.snapshot())
}

pub async fn clear_selection(State(state): State<AppState>) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.clear_selection();
    Json(session.snapshot())
}

pub async fn apply_suggestion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OperationResponse> {
    let mut session = state.session().lock().await;
    let outcome = session.apply_suggestion(&id)?;
    Ok(operation_response(&session, outcome))
}

pub async fn dismiss_suggestion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.dismiss_suggestion(&id)?;
    Ok(Json(session.snapshot()))
}

// ============================================================================
// Projections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RenderQuery {
    pub highlight: Option<String>,
    #[serde(default)]
    pub all: bool,
}

pub async fn render(
    State(state): State<AppState>,
    Query(query): Query<RenderQuery>,
) -> Json<RenderResponse> {
    let highlight = query
        .highlight
        .filter(|target| !target.is_empty())
        .map(|target| Highlight {
            target,
            all: query.all,
        });
    let html = state.session().lock().await.render_html(highlight);
    Json(RenderResponse { html })
}

pub async fn structured_view(State(state): State<AppState>) -> Json<StructuredViewResponse> {
    let session = state.session().lock().await;
    Json(StructuredViewResponse {
        view_is_source: session.view_is_source(),
        tree: session.structured_view(),
    })
}

pub async fn begin_structured_edit(State(state): State<AppState>) -> Json<StructuredDoc> {
    Json(state.session().lock().await.begin_structured_edit())
}

pub async fn commit_structured_edit(
    State(state): State<AppState>,
    Json(tree): Json<StructuredDoc>,
) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.commit_structured_edit(&tree);
    Json(session.snapshot())
}

pub async fn cancel_structured_edit(State(state): State<AppState>) -> Json<SessionSnapshot> {
    let mut session = state.session().lock().await;
    session.cancel_structured_edit();
    Json(session.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Json<ExportResponse> {
    let content = state.session().lock().await.export(query.format);
    Json(ExportResponse {
        format: query.format,
        content,
    })
}

pub async fn drain_notices(State(state): State<AppState>) -> Json<Vec<Notice>> {
    Json(state.session().lock().await.drain_notices())
}
