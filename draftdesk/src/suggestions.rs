//! Pending improvement suggestions.
//!
//! A scan produces a batch; `load` replaces the whole batch. Applying a
//! suggestion never edits the document in place: it returns a new buffer for
//! the caller to swap in.

use shared_types::Suggestion;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SuggestionError {
    #[error("suggestion not found: {0}")]
    NotFound(String),
    #[error("suggestion {0} no longer matches the document")]
    Stale(String),
}

#[derive(Debug, Default)]
pub struct SuggestionStore {
    batch: Vec<Suggestion>,
}

impl SuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current batch. Old and new suggestions are never merged.
    pub fn load(&mut self, batch: Vec<Suggestion>) {
        self.batch = batch;
    }

    pub fn list(&self) -> &[Suggestion] {
        &self.batch
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn clear(&mut self) {
        self.batch.clear();
    }

    /// Replace the leftmost occurrence of the suggestion's original text.
    ///
    /// The suggestion is retired whether or not it applied.
    pub fn apply(&mut self, id: &str, document: &str) -> Result<String, SuggestionError> {
        let suggestion = self
            .take(id)
            .ok_or_else(|| SuggestionError::NotFound(id.to_string()))?;
        replace_first(document, &suggestion.original_text, &suggestion.suggested_text)
            .ok_or(SuggestionError::Stale(suggestion.id))
    }

    /// Drop a suggestion without touching the document.
    pub fn dismiss(&mut self, id: &str) -> Option<Suggestion> {
        self.take(id)
    }

    fn take(&mut self, id: &str) -> Option<Suggestion> {
        let index = self.batch.iter().position(|s| s.id == id)?;
        Some(self.batch.remove(index))
    }
}

/// New buffer with the leftmost `needle` replaced, or `None` if absent.
pub fn replace_first(haystack: &str, needle: &str, replacement: &str) -> Option<String> {
    if needle.is_empty() {
        return None;
    }
    let start = haystack.find(needle)?;
    let mut out = String::with_capacity(haystack.len() - needle.len() + replacement.len());
    out.push_str(&haystack[..start]);
    out.push_str(replacement);
    out.push_str(&haystack[start + needle.len()..]);
    Some(out)
}
