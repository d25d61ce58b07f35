//! Request bookkeeping: tokens, in-flight state, and per-operation tickets.
//!
//! A ticket is handed out when an operation starts and carries everything the
//! backend call needs, so the session does not have to be borrowed while the
//! call is suspended. It comes back to the session with the result.

use shared_types::{OperationKind, SelectionSpan, Suggestion};

use crate::attachment::Attachment;
use crate::generation::{GenerationClient, GenerationError, Refinement};

/// Identity of one issued request. Responses for non-current tokens are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(pub(crate) u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    InFlight {
        kind: OperationKind,
        token: RequestToken,
    },
}

impl RequestState {
    pub fn in_flight(&self) -> Option<OperationKind> {
        match self {
            RequestState::Idle => None,
            RequestState::InFlight { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug)]
pub struct DraftTicket {
    pub(crate) token: RequestToken,
    pub(crate) instructions: String,
    pub(crate) attachments: Vec<Attachment>,
}

impl DraftTicket {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub async fn execute(&self, client: &GenerationClient) -> Result<String, GenerationError> {
        client
            .generate_draft(&self.instructions, &self.attachments)
            .await
    }
}

#[derive(Debug)]
pub struct RefineTicket {
    pub(crate) token: RequestToken,
    pub(crate) revision: u64,
    pub(crate) span: SelectionSpan,
    pub(crate) instruction: String,
    pub(crate) document: String,
}

impl RefineTicket {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn span(&self) -> &SelectionSpan {
        &self.span
    }

    pub async fn execute(&self, client: &GenerationClient) -> Refinement {
        client
            .refine_selection(
                &self.span.text,
                &self.instruction,
                &self.document,
                Some(self.span.start),
            )
            .await
    }
}

#[derive(Debug)]
pub struct ScanTicket {
    pub(crate) token: RequestToken,
    pub(crate) document: String,
}

impl ScanTicket {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub async fn execute(
        &self,
        client: &GenerationClient,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        client.scan_for_improvements(&self.document).await
    }
}
