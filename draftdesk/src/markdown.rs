//! Markdown conversion bridge
//!
//! Keeps the two editing views in sync: Markdown is the canonical document
//! form and [`StructuredDoc`] is the rich-text projection derived from it.
//! Uses pulldown-cmark for parsing CommonMark-compliant markdown.
//!
//! ## Supported subset
//! - Headings
//! - Bold, italic, strikethrough
//! - Lists (ordered and unordered, nested)
//! - Fenced and indented code blocks
//! - Blockquotes, links, images, rules
//!
//! Round trips are semantic, not byte-exact: `to_markup(&to_structured(x))`
//! renders the same content as `x` but may normalize markers, escaping and
//! blank lines.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use shared_types::{Block, Inline, StructuredDoc};

/// Configuration for HTML rendering
#[derive(Debug, Clone)]
pub struct MarkdownConfig {
    /// Escape raw HTML and neutralize `javascript:` links
    pub sanitize_html: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            sanitize_html: true,
        }
    }
}

/// Presentation-only marker applied while rendering HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub target: String,
    /// Mark every occurrence instead of only the first one.
    pub all: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub config: MarkdownConfig,
    pub highlight: Option<Highlight>,
}

fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

// ============================================================================
// Markdown -> tree
// ============================================================================

/// Parse Markdown into the structured tree. Never fails: anything outside the
/// supported subset degrades to text or raw HTML nodes.
pub fn to_structured(markup: &str) -> StructuredDoc {
    let mut builder = TreeBuilder::new();
    for event in Parser::new_ext(markup, parser_options()) {
        match event {
            Event::Start(tag) => builder.start(tag),
            Event::End(_) => builder.end(),
            Event::Text(text) => builder.text(&text),
            Event::Code(code) => builder.push_inline(Inline::Code {
                code: code.to_string(),
            }),
            Event::Html(html) => builder.html(&html),
            Event::InlineHtml(html) => builder.push_inline(Inline::Html {
                html: html.to_string(),
            }),
            Event::SoftBreak => builder.push_inline(Inline::SoftBreak),
            Event::HardBreak => builder.push_inline(Inline::HardBreak),
            Event::Rule => builder.push_block(Block::Rule),
            Event::TaskListMarker(done) => builder.text(if done { "[x] " } else { "[ ] " }),
            _ => {}
        }
    }
    builder.finish()
}

enum ContainerKind {
    Root,
    Item,
    BlockQuote,
}

enum InlineKind {
    Paragraph,
    Heading(u8),
    Strong,
    Emphasis,
    Strikethrough,
    Link { url: String, title: Option<String> },
    Passthrough,
}

enum Frame {
    Container {
        kind: ContainerKind,
        blocks: Vec<Block>,
        /// Inline content of tight list items, which arrives without a paragraph.
        pending: Vec<Inline>,
    },
    List {
        start: Option<u64>,
        items: Vec<Vec<Block>>,
    },
    Inline {
        kind: InlineKind,
        content: Vec<Inline>,
    },
    Image {
        url: String,
        alt: String,
    },
    Code {
        language: Option<String>,
        code: String,
    },
    RawHtml {
        html: String,
    },
}

impl Frame {
    fn container(kind: ContainerKind) -> Self {
        Frame::Container {
            kind,
            blocks: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn inline(kind: InlineKind) -> Self {
        Frame::Inline {
            kind,
            content: Vec::new(),
        }
    }
}

struct TreeBuilder {
    stack: Vec<Frame>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![Frame::container(ContainerKind::Root)],
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        let frame = match tag {
            Tag::Paragraph => Frame::inline(InlineKind::Paragraph),
            Tag::Heading { level, .. } => Frame::inline(InlineKind::Heading(level as u8)),
            Tag::BlockQuote(_) => Frame::container(ContainerKind::BlockQuote),
            Tag::CodeBlock(kind) => Frame::Code {
                language: match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(ToString::to_string),
                    CodeBlockKind::Indented => None,
                },
                code: String::new(),
            },
            Tag::HtmlBlock => Frame::RawHtml {
                html: String::new(),
            },
            Tag::List(start) => Frame::List {
                start,
                items: Vec::new(),
            },
            Tag::Item => Frame::container(ContainerKind::Item),
            Tag::Emphasis => Frame::inline(InlineKind::Emphasis),
            Tag::Strong => Frame::inline(InlineKind::Strong),
            Tag::Strikethrough => Frame::inline(InlineKind::Strikethrough),
            Tag::Link {
                dest_url, title, ..
            } => Frame::inline(InlineKind::Link {
                url: dest_url.to_string(),
                title: (!title.is_empty()).then(|| title.to_string()),
            }),
            Tag::Image { dest_url, .. } => Frame::Image {
                url: dest_url.to_string(),
                alt: String::new(),
            },
            _ => Frame::inline(InlineKind::Passthrough),
        };
        self.stack.push(frame);
    }

    fn end(&mut self) {
        // The root frame is only closed by `finish`.
        if self.stack.len() <= 1 {
            return;
        }
        let Some(frame) = self.stack.pop() else {
            return;
        };
        match frame {
            Frame::Container {
                kind,
                mut blocks,
                pending,
            } => {
                flush_pending(&mut blocks, pending);
                match kind {
                    ContainerKind::Item => self.push_item(blocks),
                    ContainerKind::BlockQuote => self.push_block(Block::BlockQuote { blocks }),
                    ContainerKind::Root => {
                        for block in blocks {
                            self.push_block(block);
                        }
                    }
                }
            }
            Frame::List { start, items } => self.push_block(Block::List {
                ordered: start.is_some(),
                start,
                items,
            }),
            Frame::Inline { kind, content } => match kind {
                InlineKind::Paragraph => self.push_block(Block::Paragraph { content }),
                InlineKind::Heading(level) => self.push_block(Block::Heading { level, content }),
                InlineKind::Strong => self.push_inline(Inline::Strong { content }),
                InlineKind::Emphasis => self.push_inline(Inline::Emphasis { content }),
                InlineKind::Strikethrough => self.push_inline(Inline::Strikethrough { content }),
                InlineKind::Link { url, title } => self.push_inline(Inline::Link {
                    url,
                    title,
                    content,
                }),
                InlineKind::Passthrough => {
                    for inline in content {
                        self.push_inline(inline);
                    }
                }
            },
            Frame::Image { url, alt } => self.push_inline(Inline::Image { url, alt }),
            Frame::Code { language, code } => self.push_block(Block::CodeBlock { language, code }),
            Frame::RawHtml { html } => self.push_block(Block::Html { html }),
        }
    }

    fn text(&mut self, text: &str) {
        match self.stack.last_mut() {
            Some(Frame::Code { code, .. }) => code.push_str(text),
            Some(Frame::RawHtml { html }) => html.push_str(text),
            _ => self.push_inline(Inline::Text {
                text: text.to_string(),
            }),
        }
    }

    fn html(&mut self, html: &str) {
        match self.stack.last_mut() {
            Some(Frame::RawHtml { html: buffer }) => buffer.push_str(html),
            _ => self.push_inline(Inline::Html {
                html: html.to_string(),
            }),
        }
    }

    fn push_inline(&mut self, inline: Inline) {
        match self.stack.last_mut() {
            Some(Frame::Inline { content, .. }) => push_merged(content, inline),
            Some(Frame::Container { pending, .. }) => push_merged(pending, inline),
            Some(Frame::Image { alt, .. }) => alt.push_str(&inline_plain_text(&inline)),
            Some(Frame::Code { code, .. }) => code.push_str(&inline_plain_text(&inline)),
            Some(Frame::RawHtml { html }) => html.push_str(&inline_plain_text(&inline)),
            Some(Frame::List { items, .. }) => items.push(vec![Block::Paragraph {
                content: vec![inline],
            }]),
            None => {}
        }
    }

    fn push_block(&mut self, block: Block) {
        match self.stack.last_mut() {
            Some(Frame::Container {
                blocks, pending, ..
            }) => {
                flush_pending(blocks, std::mem::take(pending));
                blocks.push(block);
            }
            Some(Frame::List { items, .. }) => items.push(vec![block]),
            Some(_) => {
                let text = block_plain_text(&block);
                if !text.is_empty() {
                    self.push_inline(Inline::Text { text });
                }
            }
            None => {}
        }
    }

    fn push_item(&mut self, blocks: Vec<Block>) {
        match self.stack.last_mut() {
            Some(Frame::List { items, .. }) => items.push(blocks),
            _ => {
                for block in blocks {
                    self.push_block(block);
                }
            }
        }
    }

    fn finish(mut self) -> StructuredDoc {
        while self.stack.len() > 1 {
            self.end();
        }
        match self.stack.pop() {
            Some(Frame::Container {
                mut blocks,
                pending,
                ..
            }) => {
                flush_pending(&mut blocks, pending);
                StructuredDoc { blocks }
            }
            _ => StructuredDoc::default(),
        }
    }
}

fn flush_pending(blocks: &mut Vec<Block>, pending: Vec<Inline>) {
    if !pending.is_empty() {
        blocks.push(Block::Paragraph { content: pending });
    }
}

/// Append, merging adjacent text runs (the parser splits text at special chars).
fn push_merged(content: &mut Vec<Inline>, inline: Inline) {
    if let Inline::Text { text } = &inline {
        if let Some(Inline::Text { text: last }) = content.last_mut() {
            last.push_str(text);
            return;
        }
    }
    content.push(inline);
}

fn inline_plain_text(inline: &Inline) -> String {
    match inline {
        Inline::Text { text } => text.clone(),
        Inline::Code { code } => code.clone(),
        Inline::Html { html } => html.clone(),
        Inline::Image { alt, .. } => alt.clone(),
        Inline::SoftBreak | Inline::HardBreak => "\n".to_string(),
        Inline::Strong { content }
        | Inline::Emphasis { content }
        | Inline::Strikethrough { content }
        | Inline::Link { content, .. } => content.iter().map(inline_plain_text).collect(),
    }
}

fn block_plain_text(block: &Block) -> String {
    match block {
        Block::Heading { content, .. } | Block::Paragraph { content } => {
            content.iter().map(inline_plain_text).collect()
        }
        Block::List { items, .. } => items
            .iter()
            .flat_map(|item| item.iter().map(block_plain_text))
            .collect::<Vec<_>>()
            .join("\n"),
        Block::CodeBlock { code, .. } => code.clone(),
        Block::BlockQuote { blocks } => blocks
            .iter()
            .map(block_plain_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Block::Rule => String::new(),
        Block::Html { html } => html.clone(),
    }
}

// ============================================================================
// Tree -> Markdown
// ============================================================================

/// Serialize the structured tree back to Markdown.
pub fn to_markup(doc: &StructuredDoc) -> String {
    let mut out = render_blocks(&doc.blocks, "\n\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn render_blocks(blocks: &[Block], separator: &str) -> String {
    let mut out = String::new();
    let mut alternate_marker = false;
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            // Two paragraphs in a row would merge without a blank line.
            let needs_blank = matches!(
                (&blocks[i - 1], block),
                (Block::Paragraph { .. }, Block::Paragraph { .. }) | (_, Block::Html { .. })
            );
            out.push_str(if needs_blank { "\n\n" } else { separator });
        }
        // Adjacent lists of one kind only stay apart if their markers differ.
        alternate_marker = match (i.checked_sub(1).map(|prev| &blocks[prev]), block) {
            (
                Some(Block::List { ordered: prev, .. }),
                Block::List { ordered, .. },
            ) if prev == ordered => !alternate_marker,
            _ => false,
        };
        out.push_str(&render_block(block, alternate_marker));
    }
    out
}

fn list_marker(ordered: bool, number: u64, alternate: bool) -> String {
    match (ordered, alternate) {
        (true, false) => format!("{number}. "),
        (true, true) => format!("{number}) "),
        (false, false) => "- ".to_string(),
        (false, true) => "* ".to_string(),
    }
}

fn render_block(block: &Block, alternate_marker: bool) -> String {
    match block {
        Block::Heading { level, content } => {
            let hashes = "#".repeat(usize::from((*level).clamp(1, 6)));
            let text = render_inlines(content).replace('\n', " ");
            format!("{hashes} {}", text.trim())
        }
        Block::Paragraph { content } => escape_line_starts(&render_inlines(content)),
        Block::List {
            ordered,
            start,
            items,
        } => {
            let first = start.unwrap_or(1);
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let marker = list_marker(*ordered, first + i as u64, alternate_marker);
                    let body = render_blocks(item, "\n");
                    if body.is_empty() {
                        marker.trim_end().to_string()
                    } else {
                        format!("{marker}{}", indent_continuation(&body, marker.len()))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Block::CodeBlock { language, code } => {
            let mut fence = "```".to_string();
            while code.contains(fence.as_str()) {
                fence.push('`');
            }
            let newline = if code.ends_with('\n') || code.is_empty() {
                ""
            } else {
                "\n"
            };
            format!(
                "{fence}{}\n{code}{newline}{fence}",
                language.as_deref().unwrap_or_default()
            )
        }
        Block::BlockQuote { blocks } => render_blocks(blocks, "\n\n")
            .lines()
            .map(|line| {
                if line.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Block::Rule => "---".to_string(),
        Block::Html { html } => html.trim_end().to_string(),
    }
}

fn indent_continuation(body: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    body.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_inlines(content: &[Inline]) -> String {
    content.iter().map(render_inline).collect()
}

fn render_inline(inline: &Inline) -> String {
    match inline {
        Inline::Text { text } => escape_markdown(text),
        Inline::Strong { content } => format!("**{}**", render_inlines(content)),
        Inline::Emphasis { content } => format!("*{}*", render_inlines(content)),
        Inline::Strikethrough { content } => format!("~~{}~~", render_inlines(content)),
        Inline::Code { code } => render_code_span(code),
        Inline::Link {
            url,
            title,
            content,
        } => {
            let title = title
                .as_deref()
                .map(|t| format!(" \"{}\"", t.replace('"', "\\\"")))
                .unwrap_or_default();
            format!("[{}]({}{title})", render_inlines(content), link_destination(url))
        }
        Inline::Image { url, alt } => {
            format!("![{}]({})", escape_markdown(alt), link_destination(url))
        }
        Inline::SoftBreak => "\n".to_string(),
        Inline::HardBreak => "\\\n".to_string(),
        Inline::Html { html } => html.clone(),
    }
}

fn render_code_span(code: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in code.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    let ticks = "`".repeat(longest + 1);
    if code.starts_with('`') || code.ends_with('`') {
        format!("{ticks} {code} {ticks}")
    } else {
        format!("{ticks}{code}{ticks}")
    }
}

fn link_destination(url: &str) -> String {
    if url.contains(|c: char| c.is_whitespace() || c == '(' || c == ')') {
        format!("<{url}>")
    } else {
        url.to_string()
    }
}

fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '~' | '<') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape characters that would turn a paragraph line into a block marker.
fn escape_line_starts(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let trimmed = line.trim_start();
            let indent = &line[..line.len() - trimmed.len()];
            let mut chars = trimmed.chars();
            match chars.next() {
                Some(c @ ('#' | '>' | '-' | '+' | '=')) => format!("{indent}\\{c}{}", chars.as_str()),
                Some(c) if c.is_ascii_digit() => {
                    let digits = trimmed.len() - trimmed.trim_start_matches(|d: char| d.is_ascii_digit()).len();
                    let rest = &trimmed[digits..];
                    if rest.starts_with(". ") || rest.starts_with(") ") || rest == "." || rest == ")" {
                        format!("{indent}{}\\{rest}", &trimmed[..digits])
                    } else {
                        line.to_string()
                    }
                }
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Tree -> HTML
// ============================================================================

/// Render the tree to HTML. Highlights only exist in the returned string.
pub fn render_html(doc: &StructuredDoc, options: &RenderOptions) -> String {
    let highlight = options
        .highlight
        .as_ref()
        .filter(|h| !h.target.is_empty());
    let mut renderer = HtmlRenderer {
        out: String::new(),
        sanitize: options.config.sanitize_html,
        target: highlight.map(|h| h.target.as_str()),
        remaining: highlight.and_then(|h| (!h.all).then_some(1)),
    };
    for block in &doc.blocks {
        renderer.block(block);
    }
    renderer.out
}

/// Parse and render in one step.
pub fn render_to_html(input: &str) -> String {
    render_html(&to_structured(input), &RenderOptions::default())
}

struct HtmlRenderer<'a> {
    out: String,
    sanitize: bool,
    target: Option<&'a str>,
    /// Highlights still allowed; `None` means unlimited.
    remaining: Option<usize>,
}

impl HtmlRenderer<'_> {
    fn block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, content } => {
                let level = (*level).clamp(1, 6);
                self.out.push_str(&format!("<h{level}>"));
                self.inlines(content);
                self.out.push_str(&format!("</h{level}>\n"));
            }
            Block::Paragraph { content } => {
                self.out.push_str("<p>");
                self.inlines(content);
                self.out.push_str("</p>\n");
            }
            Block::List {
                ordered,
                start,
                items,
            } => {
                match (ordered, start) {
                    (true, Some(n)) if *n != 1 => self.out.push_str(&format!("<ol start=\"{n}\">\n")),
                    (true, _) => self.out.push_str("<ol>\n"),
                    (false, _) => self.out.push_str("<ul>\n"),
                }
                for item in items {
                    self.out.push_str("<li>");
                    match item.as_slice() {
                        [Block::Paragraph { content }] => self.inlines(content),
                        blocks => {
                            self.out.push('\n');
                            for block in blocks {
                                self.block(block);
                            }
                        }
                    }
                    self.out.push_str("</li>\n");
                }
                self.out
                    .push_str(if *ordered { "</ol>\n" } else { "</ul>\n" });
            }
            Block::CodeBlock { language, code } => {
                match language {
                    Some(lang) => self.out.push_str(&format!(
                        "<pre><code class=\"language-{}\">",
                        escape_html(lang)
                    )),
                    None => self.out.push_str("<pre><code>"),
                }
                self.out.push_str(&escape_html(code));
                self.out.push_str("</code></pre>\n");
            }
            Block::BlockQuote { blocks } => {
                self.out.push_str("<blockquote>\n");
                for block in blocks {
                    self.block(block);
                }
                self.out.push_str("</blockquote>\n");
            }
            Block::Rule => self.out.push_str("<hr />\n"),
            Block::Html { html } => {
                if self.sanitize {
                    self.out
                        .push_str(&format!("<p>{}</p>\n", escape_html(html.trim_end())));
                } else {
                    self.out.push_str(html);
                }
            }
        }
    }

    fn inlines(&mut self, content: &[Inline]) {
        for inline in content {
            self.inline(inline);
        }
    }

    fn inline(&mut self, inline: &Inline) {
        match inline {
            Inline::Text { text } => self.text(text),
            Inline::Strong { content } => self.wrapped("strong", content),
            Inline::Emphasis { content } => self.wrapped("em", content),
            Inline::Strikethrough { content } => self.wrapped("del", content),
            Inline::Code { code } => {
                self.out
                    .push_str(&format!("<code>{}</code>", escape_html(code)));
            }
            Inline::Link {
                url,
                title,
                content,
            } => {
                self.out
                    .push_str(&format!("<a href=\"{}\"", escape_html(&self.safe_url(url))));
                if let Some(title) = title {
                    self.out
                        .push_str(&format!(" title=\"{}\"", escape_html(title)));
                }
                self.out.push('>');
                self.inlines(content);
                self.out.push_str("</a>");
            }
            Inline::Image { url, alt } => {
                self.out.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\" />",
                    escape_html(&self.safe_url(url)),
                    escape_html(alt)
                ));
            }
            Inline::SoftBreak => self.out.push('\n'),
            Inline::HardBreak => self.out.push_str("<br />\n"),
            Inline::Html { html } => {
                if self.sanitize {
                    self.out.push_str(&escape_html(html));
                } else {
                    self.out.push_str(html);
                }
            }
        }
    }

    fn wrapped(&mut self, tag: &str, content: &[Inline]) {
        self.out.push_str(&format!("<{tag}>"));
        self.inlines(content);
        self.out.push_str(&format!("</{tag}>"));
    }

    fn safe_url(&self, url: &str) -> String {
        if self.sanitize
            && url
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("javascript:")
        {
            "#".to_string()
        } else {
            url.to_string()
        }
    }

    /// Emit a text run, wrapping literal target occurrences (leftmost first).
    fn text(&mut self, text: &str) {
        let Some(target) = self.target else {
            self.out.push_str(&escape_html(text));
            return;
        };
        let mut cursor = 0;
        while self.remaining != Some(0) {
            let Some(offset) = text[cursor..].find(target) else {
                break;
            };
            let start = cursor + offset;
            let end = start + target.len();
            self.out.push_str(&escape_html(&text[cursor..start]));
            self.out.push_str("<mark class=\"suggestion-highlight\">");
            self.out.push_str(&escape_html(&text[start..end]));
            self.out.push_str("</mark>");
            cursor = end;
            if let Some(n) = self.remaining.as_mut() {
                *n -= 1;
            }
        }
        self.out.push_str(&escape_html(&text[cursor..]));
    }
}

/// Escape HTML special characters
pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

// ============================================================================
// Statistics
// ============================================================================

/// Extract plain text from markdown (remove formatting)
pub fn extract_plain_text(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, parser_options());

    let mut text = String::new();
    for event in parser {
        match event {
            Event::Text(content) | Event::Code(content) => {
                text.push_str(&content);
            }
            Event::SoftBreak | Event::HardBreak => {
                text.push('\n');
            }
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock)
                if !text.ends_with('\n') && !text.is_empty() =>
            {
                text.push('\n');
            }
            _ => {}
        }
    }

    text.trim_end().to_string()
}

/// Get word count from markdown
pub fn word_count(markdown: &str) -> usize {
    extract_plain_text(markdown).split_whitespace().count()
}

/// Get character count from markdown (excluding formatting)
pub fn char_count(markdown: &str) -> usize {
    extract_plain_text(markdown).chars().count()
}
