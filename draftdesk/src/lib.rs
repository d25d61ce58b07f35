//! DraftDesk - writing-assistant orchestration core with a REST API
//!
//! Drafts documents from instructions and attachments, rewrites selected
//! passages, and proposes literal-substring suggestions, all against a hosted
//! generative model. The Markdown document is the single source of truth;
//! the structured tree and HTML are projections of it.

pub mod api;
pub mod app_state;
pub mod attachment;
pub mod config;
pub mod generation;
pub mod markdown;
pub mod selection;
pub mod session;
pub mod suggestions;
