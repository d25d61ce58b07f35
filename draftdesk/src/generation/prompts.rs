//! Prompt construction for the three generative operations.

use serde_json::json;
use std::sync::OnceLock;

use crate::attachment::Attachment;

pub const DRAFT_SYSTEM_PROMPT: &str = "You are a writing assistant. Produce a complete, well-structured document in Markdown. Return only the document, with no preamble or closing remarks.";

pub const REFINE_SYSTEM_PROMPT: &str = "You are an editor rewriting one passage inside a larger document. Return only the rewritten passage. Do not add commentary, quotation marks, or code fences, and do not repeat surrounding text.";

pub const SCAN_SYSTEM_PROMPT: &str = "You are a careful copy editor. Point out the most valuable improvements to clarity, concision, grammar, and tone.";

/// Used when the user gave no instructions but attached audio or video.
pub const DEFAULT_MEDIA_INSTRUCTION: &str =
    "Draft a well-structured document from the spoken content.";

/// Used when the user gave no instructions and attached non-media files.
pub const DEFAULT_ATTACHMENT_INSTRUCTION: &str =
    "Draft a well-structured document from the attached material.";

pub const SPOKEN_SOURCE_DIRECTIVE: &str = "The attached audio or video is the primary source material. Transcribe and use what is said in it as the basis of the document; do not describe the recording itself.";

pub const ELLIPSIS: &str = "…";

/// Directive text sent after the attachment parts of a draft request.
pub fn draft_directive(instructions: &str, attachments: &[Attachment]) -> String {
    let has_spoken = attachments.iter().any(|a| a.media_kind().is_spoken());
    let instructions = instructions.trim();
    let instruction = if !instructions.is_empty() {
        instructions
    } else if has_spoken {
        DEFAULT_MEDIA_INSTRUCTION
    } else {
        DEFAULT_ATTACHMENT_INSTRUCTION
    };

    let mut directive = String::new();
    if has_spoken {
        directive.push_str(SPOKEN_SOURCE_DIRECTIVE);
        directive.push_str("\n\n");
    }
    if !attachments.is_empty() {
        let listing = attachments
            .iter()
            .map(|a| format!("{} ({})", a.name(), a.mime_type()))
            .collect::<Vec<_>>()
            .join(", ");
        directive.push_str(&format!("Attached files: {listing}\n\n"));
    }
    directive.push_str("Instructions: ");
    directive.push_str(instruction);
    directive
}

/// Document excerpt around `selection`, which starts at char offset
/// `selection_start` when known and at its first occurrence otherwise.
///
/// At most `max_chars` chars of document text are returned; an ellipsis
/// marks each truncated side.
pub fn context_excerpt(
    document: &str,
    selection: &str,
    selection_start: Option<usize>,
    max_chars: usize,
) -> String {
    let total = document.chars().count();
    if total <= max_chars {
        return document.to_string();
    }

    let located = selection_start.filter(|start| *start < total).or_else(|| {
        document
            .find(selection)
            .filter(|_| !selection.is_empty())
            .map(|byte| document[..byte].chars().count())
    });
    let (sel_start, sel_len) = match located {
        Some(start) => (start, selection.chars().count()),
        None => (0, 0),
    };
    let lead = max_chars.saturating_sub(sel_len) / 2;
    let end = (sel_start.saturating_sub(lead) + max_chars).min(total);
    let start = end.saturating_sub(max_chars);

    let body: String = document.chars().skip(start).take(end - start).collect();
    let mut excerpt = String::with_capacity(body.len() + 2 * ELLIPSIS.len());
    if start > 0 {
        excerpt.push_str(ELLIPSIS);
    }
    excerpt.push_str(&body);
    if end < total {
        excerpt.push_str(ELLIPSIS);
    }
    excerpt
}

pub fn refine_prompt(excerpt: &str, selection: &str, instruction: &str) -> String {
    format!(
        "Document context (excerpt):\n<<<\n{excerpt}\n>>>\n\nSelected passage:\n<<<\n{selection}\n>>>\n\nInstruction: {}\n\nReturn only the rewritten passage.",
        instruction.trim()
    )
}

pub fn scan_prompt(document: &str, max_suggestions: usize) -> String {
    format!(
        "Review the document below and propose at most {max_suggestions} improvements.\n\
         For each one, originalText must be copied exactly, character for character, from the document \
         so it can be found by literal search. suggestedText is its replacement and reason is a short rationale.\n\n\
         Document:\n<<<\n{document}\n>>>"
    )
}

/// Structured-output schema for scans (Gemini OpenAPI subset).
pub fn scan_schema(max_suggestions: usize) -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "maxItems": max_suggestions,
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": {"type": "STRING"},
                "originalText": {"type": "STRING"},
                "suggestedText": {"type": "STRING"},
                "reason": {"type": "STRING"}
            },
            "required": ["id", "originalText", "suggestedText", "reason"],
            "propertyOrdering": ["id", "originalText", "suggestedText", "reason"]
        }
    })
}

fn fence_regex() -> &'static regex::Regex {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)^```[\w+-]*[ \t]*\r?\n(.*?)\r?\n?```$").expect("valid fence regex")
    })
}

/// Remove a code fence wrapping the entire output, if any.
pub fn strip_wrapping_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    fence_regex()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}

/// Tidy a refine reply: drop fences and added quotes, and keep the original
/// span's leading/trailing whitespace so the splice does not glue words.
pub fn clean_refinement(raw: &str, original: &str) -> String {
    let mut text = strip_wrapping_fence(raw).trim();
    for (open, close) in [('"', '"'), ('“', '”')] {
        let original_quoted = original.trim().starts_with(open);
        if !original_quoted && text.len() > 1 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    if text.is_empty() {
        return String::new();
    }
    let leading = &original[..original.len() - original.trim_start().len()];
    let trailing = &original[original.trim_end().len()..];
    format!("{leading}{text}{trailing}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str, mime: &str) -> Attachment {
        Attachment::from_bytes(name, mime, b"data", 1024).unwrap()
    }

    #[test]
    fn test_spoken_media_substitutes_default_instruction() {
        let directive = draft_directive("   ", &[attachment("memo.mp3", "audio/mpeg")]);
        assert!(directive.starts_with(SPOKEN_SOURCE_DIRECTIVE));
        assert!(directive.ends_with(DEFAULT_MEDIA_INSTRUCTION));
        assert!(directive.contains("memo.mp3 (audio/mpeg)"));
    }

    #[test]
    fn test_spoken_media_keeps_user_instruction() {
        let directive = draft_directive(
            "Write meeting minutes",
            &[attachment("call.mp4", "video/mp4")],
        );
        assert!(directive.contains(SPOKEN_SOURCE_DIRECTIVE));
        assert!(directive.ends_with("Instructions: Write meeting minutes"));
    }

    #[test]
    fn test_non_media_attachment_default() {
        let directive = draft_directive("", &[attachment("brief.pdf", "application/pdf")]);
        assert!(!directive.contains(SPOKEN_SOURCE_DIRECTIVE));
        assert!(directive.ends_with(DEFAULT_ATTACHMENT_INSTRUCTION));
    }

    #[test]
    fn test_context_excerpt_short_document_untouched() {
        assert_eq!(context_excerpt("short doc", "doc", None, 100), "short doc");
    }

    #[test]
    fn test_context_excerpt_is_bounded_and_centered() {
        let document = format!("{}TARGET{}", "a".repeat(500), "b".repeat(500));
        let excerpt = context_excerpt(&document, "TARGET", None, 100);
        assert!(excerpt.contains("TARGET"));
        assert!(excerpt.starts_with(ELLIPSIS));
        assert!(excerpt.ends_with(ELLIPSIS));
        let body_chars = excerpt.chars().count() - 2;
        assert_eq!(body_chars, 100);
        let before = excerpt.chars().skip(1).take_while(|c| *c == 'a').count();
        assert_eq!(before, 47);
    }

    #[test]
    fn test_context_excerpt_near_end_shifts_window() {
        let document = format!("{}END", "x".repeat(300));
        let excerpt = context_excerpt(&document, "END", Some(300), 50);
        assert!(excerpt.ends_with("END"));
        assert!(excerpt.starts_with(ELLIPSIS));
        assert_eq!(excerpt.chars().count(), 51);
    }

    #[test]
    fn test_context_excerpt_follows_selected_occurrence() {
        let document = format!(
            "{}FIRST repeated phrase{}SECOND repeated phrase{}",
            "a".repeat(50),
            "b".repeat(5000),
            "c".repeat(50)
        );
        let later = document.find("SECOND").unwrap() + "SECOND ".len();
        let excerpt = context_excerpt(&document, "repeated phrase", Some(later), 200);
        assert!(excerpt.contains("SECOND repeated phrase"));
        assert!(!excerpt.contains("FIRST"));

        let excerpt = context_excerpt(&document, "repeated phrase", None, 200);
        assert!(excerpt.contains("FIRST repeated phrase"));
    }

    #[test]
    fn test_strip_wrapping_fence() {
        assert_eq!(strip_wrapping_fence("```markdown\n# Hi\n```"), "# Hi");
        assert_eq!(strip_wrapping_fence("plain"), "plain");
        assert_eq!(
            strip_wrapping_fence("text\n```\ncode\n```"),
            "text\n```\ncode\n```"
        );
    }

    #[test]
    fn test_clean_refinement_preserves_span_whitespace() {
        assert_eq!(clean_refinement("\"swift\"", " quick "), " swift ");
        assert_eq!(clean_refinement("```\nswift\n```", "quick"), "swift");
        assert_eq!(clean_refinement("  ", "quick"), "");
    }
}
