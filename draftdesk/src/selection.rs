//! Selection tracking for the floating refine toolbar.
//!
//! Offsets are char offsets into the Markdown document. A span only becomes
//! active on an explicit completion event (pointer release, shift-arrow key
//! up); intermediate changes are recorded but never published.

use shared_types::{ActiveSelection, AnchorPoint, SelectionRect, SelectionSpan};

/// Distance between the selection top edge and the toolbar anchor, in pixels.
pub const TOOLBAR_OFFSET: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SelectionState {
    #[default]
    NoSelection,
    Active {
        span: SelectionSpan,
        anchor: AnchorPoint,
    },
}

#[derive(Debug, Default)]
pub struct SelectionTracker {
    state: SelectionState,
    /// In-progress range from intermediate change events.
    pending: Option<(usize, usize)>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn active_span(&self) -> Option<&SelectionSpan> {
        match &self.state {
            SelectionState::Active { span, .. } => Some(span),
            SelectionState::NoSelection => None,
        }
    }

    pub fn active(&self) -> Option<ActiveSelection> {
        match &self.state {
            SelectionState::Active { span, anchor } => Some(ActiveSelection {
                span: span.clone(),
                anchor: *anchor,
            }),
            SelectionState::NoSelection => None,
        }
    }

    pub fn pending(&self) -> Option<(usize, usize)> {
        self.pending
    }

    /// Intermediate change while the user is still dragging. Does not transition.
    pub fn on_selection_change(&mut self, start: usize, end: usize) {
        self.pending = Some((start.min(end), start.max(end)));
    }

    /// Selection finished. Empty or out-of-range spans collapse to `NoSelection`.
    pub fn on_selection_complete(
        &mut self,
        document: &str,
        start: usize,
        end: usize,
        rect: Option<SelectionRect>,
    ) -> &SelectionState {
        self.pending = None;
        let (start, end) = (start.min(end), start.max(end));
        self.state = match slice_chars(document, start, end) {
            Some(text) if !text.trim().is_empty() => SelectionState::Active {
                span: SelectionSpan {
                    start,
                    end,
                    text: text.to_string(),
                },
                anchor: anchor_for(rect.unwrap_or_default()),
            },
            _ => SelectionState::NoSelection,
        };
        &self.state
    }

    /// Any document mutation invalidates the span; offsets would be stale.
    pub fn on_document_mutated(&mut self) {
        if matches!(self.state, SelectionState::Active { .. }) {
            tracing::debug!("Selection invalidated by document mutation");
        }
        self.clear();
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.state = SelectionState::NoSelection;
    }
}

/// Toolbar anchor: centered above the selection, kept inside the viewport.
pub fn anchor_for(rect: SelectionRect) -> AnchorPoint {
    AnchorPoint {
        x: (rect.left + rect.width / 2.0).max(0.0),
        y: (rect.top - TOOLBAR_OFFSET).max(0.0),
    }
}

/// Slice `text` by char offsets. `None` if the range is out of bounds.
pub fn slice_chars(text: &str, start: usize, end: usize) -> Option<&str> {
    let (start_byte, end_byte) = char_range_to_bytes(text, start, end)?;
    Some(&text[start_byte..end_byte])
}

/// Convert a char range to a byte range. `None` if it does not fit.
pub fn char_range_to_bytes(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    if start > end {
        return None;
    }
    let mut indices = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()));
    let start_byte = indices.nth(start)?;
    let end_byte = if end == start {
        start_byte
    } else {
        indices.nth(end - start - 1)?
    };
    Some((start_byte, end_byte))
}
