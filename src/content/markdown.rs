//! Markdown rendering with syntax highlighting
//!
//! Content is editable by any admin and served to anonymous visitors, so raw
//! HTML in a body is never passed through: it is emitted as escaped text.

use anyhow::Result;
use lazy_static::lazy_static;
use pulldown_cmark::{
    html, CodeBlockKind, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd, TextMergeStream,
};
use regex::Regex;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::helpers::escape_html;

lazy_static! {
    static ref BARE_URL: Regex = Regex::new(r"\bhttps?://[^\s<>]+").unwrap();
}

/// Schemes that are never emitted as a link target
const BLOCKED_SCHEMES: &[&str] = &["javascript:", "vbscript:", "file:", "data:"];

/// Inline image payloads that stay allowed in `<img src>`
const SAFE_DATA_IMAGES: &[&str] = &[
    "data:image/gif;",
    "data:image/png;",
    "data:image/jpeg;",
    "data:image/webp;",
];

/// Markdown renderer with syntax highlighting
pub struct MarkdownRenderer {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
    theme_name: String,
    line_numbers: bool,
}

impl MarkdownRenderer {
    /// Create a new markdown renderer
    pub fn new() -> Self {
        Self::with_options("base16-ocean.dark", false)
    }

    /// Create with custom settings
    pub fn with_options(theme: &str, line_numbers: bool) -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
            theme_name: theme.to_string(),
            line_numbers,
        }
    }

    /// Render markdown to HTML
    pub fn render(&self, markdown: &str) -> Result<String> {
        // Front-matter is split off before rendering, so no metadata blocks here
        let options = Options::ENABLE_TABLES
            | Options::ENABLE_FOOTNOTES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS;
        let parser = TextMergeStream::new(Parser::new_ext(markdown, options));

        let mut events: Vec<Event> = Vec::new();
        let mut code_block: Option<Option<String>> = None;
        let mut code_block_content = String::new();
        let mut link_depth = 0usize;

        for event in parser {
            if let Some(lang) = &code_block {
                match event {
                    Event::Text(text) => code_block_content.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        let highlighted = self.highlight_code(&code_block_content, lang.as_deref());
                        events.push(Event::Html(CowStr::from(highlighted)));
                        code_block = None;
                    }
                    _ => {}
                }
                continue;
            }

            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(lang) => {
                            let lang = lang.split_whitespace().next().unwrap_or("").to_string();
                            if lang.is_empty() {
                                None
                            } else {
                                Some(lang)
                            }
                        }
                        CodeBlockKind::Indented => None,
                    };
                    code_block = Some(lang);
                    code_block_content.clear();
                }
                // Raw HTML is shown, never executed
                Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
                Event::Start(Tag::Link {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) => {
                    link_depth += 1;
                    events.push(Event::Start(Tag::Link {
                        link_type,
                        dest_url: sanitize_url(dest_url, false),
                        title,
                        id,
                    }));
                }
                Event::Start(Tag::Image {
                    link_type,
                    dest_url,
                    title,
                    id,
                }) => {
                    link_depth += 1;
                    events.push(Event::Start(Tag::Image {
                        link_type,
                        dest_url: sanitize_url(dest_url, true),
                        title,
                        id,
                    }));
                }
                Event::End(end @ (TagEnd::Link | TagEnd::Image)) => {
                    link_depth = link_depth.saturating_sub(1);
                    events.push(Event::End(end));
                }
                Event::Text(text) if link_depth == 0 => push_autolinked(text, &mut events),
                other => events.push(other),
            }
        }

        let mut html_output = String::new();
        html::push_html(&mut html_output, events.into_iter());

        Ok(html_output)
    }

    /// Highlight a code block
    fn highlight_code(&self, code: &str, lang: Option<&str>) -> String {
        let lang = lang.unwrap_or("text");
        let lang_attr = escape_html(lang);

        let syntax = self
            .syntax_set
            .find_syntax_by_token(lang)
            .or_else(|| self.syntax_set.find_syntax_by_extension(lang))
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let theme = self
            .theme_set
            .themes
            .get(&self.theme_name)
            .or_else(|| self.theme_set.themes.values().next());

        let highlighted =
            theme.and_then(|t| highlighted_html_for_string(code, &self.syntax_set, syntax, t).ok());

        match highlighted {
            Some(highlighted) if self.line_numbers => self.add_line_numbers(&highlighted, &lang_attr),
            Some(highlighted) => format!(
                r#"<figure class="highlight {}">{}</figure>"#,
                lang_attr, highlighted
            ),
            None => format!(
                r#"<pre><code class="language-{}">{}</code></pre>"#,
                lang_attr,
                escape_html(code)
            ),
        }
    }

    /// Add line numbers to highlighted code
    fn add_line_numbers(&self, code: &str, lang: &str) -> String {
        let lines: Vec<&str> = code.lines().collect();

        let gutter = (1..=lines.len())
            .map(|n| format!(r#"<span class="line-number">{}</span>"#, n))
            .collect::<Vec<_>>()
            .join("\n");
        let code_lines = lines.join("\n");

        format!(
            r#"<figure class="highlight {}"><table><tr><td class="gutter"><pre>{}</pre></td><td class="code"><pre>{}</pre></td></tr></table></figure>"#,
            lang, gutter, code_lines
        )
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split text around bare URLs, turning each into an autolink
fn push_autolinked<'a>(text: CowStr<'a>, events: &mut Vec<Event<'a>>) {
    let spans: Vec<(usize, usize)> = BARE_URL
        .find_iter(&text)
        .filter_map(|m| {
            let url = trim_url(m.as_str());
            let has_host = url.split_once("://").map_or(false, |(_, host)| !host.is_empty());
            has_host.then(|| (m.start(), m.start() + url.len()))
        })
        .collect();

    if spans.is_empty() {
        events.push(Event::Text(text));
        return;
    }

    let mut last = 0;
    for (start, end) in spans {
        if start > last {
            events.push(Event::Text(CowStr::from(text[last..start].to_string())));
        }
        let url = text[start..end].to_string();
        events.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: CowStr::from(url.clone()),
            title: CowStr::Borrowed(""),
            id: CowStr::Borrowed(""),
        }));
        events.push(Event::Text(CowStr::from(url)));
        events.push(Event::End(TagEnd::Link));
        last = end;
    }
    if last < text.len() {
        events.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
}

/// Drop trailing punctuation that reads as prose, not URL
fn trim_url(url: &str) -> &str {
    let mut url = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
    while url.ends_with(')') && url.matches('(').count() < url.matches(')').count() {
        url = url[..url.len() - 1].trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
    }
    url
}

fn sanitize_url(url: CowStr<'_>, image: bool) -> CowStr<'_> {
    let normalized: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    if image && SAFE_DATA_IMAGES.iter().any(|p| normalized.starts_with(p)) {
        return url;
    }
    if BLOCKED_SCHEMES.iter().any(|s| normalized.starts_with(s)) {
        return CowStr::Borrowed("#");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic_markdown() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("# Hello World\n\nThis is a test.").unwrap();
        assert!(html.contains("<h1>Hello World</h1>"));
        assert!(html.contains("<p>This is a test.</p>"));
    }

    #[test]
    fn test_render_code_block() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("```rust\nfn main() {}\n```").unwrap();
        assert!(html.contains("highlight rust"));
        assert!(html.contains("main"));
    }

    #[test]
    fn test_code_block_language_is_escaped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer
            .render("```\"><script>alert(1)</script>\nx\n```")
            .unwrap();
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_block_html_is_escaped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer
            .render("<script>alert('x')</script>\n\ntext")
            .unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_inline_html_is_escaped() {
        let renderer = MarkdownRenderer::new();
        let html = renderer
            .render("Click <img src=x onerror=alert(1)> here")
            .unwrap();
        assert!(!html.contains("<img"));
        assert!(html.contains("&lt;img"));
    }

    #[test]
    fn test_bare_url_is_autolinked() {
        let renderer = MarkdownRenderer::new();
        let html = renderer
            .render("See https://example.com/docs. Thanks")
            .unwrap();
        assert!(html.contains(r#"<a href="https://example.com/docs">https://example.com/docs</a>."#));
    }

    #[test]
    fn test_existing_links_are_not_double_linked() {
        let renderer = MarkdownRenderer::new();
        let html = renderer
            .render("[https://example.com](https://example.com)")
            .unwrap();
        assert_eq!(html.matches("<a ").count(), 1);
    }

    #[test]
    fn test_url_in_inline_code_is_left_alone() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("`https://example.com`").unwrap();
        assert!(!html.contains("<a "));
    }

    #[test]
    fn test_balanced_parentheses_stay_in_url() {
        assert_eq!(
            trim_url("https://en.wikipedia.org/wiki/Rust_(language)"),
            "https://en.wikipedia.org/wiki/Rust_(language)"
        );
        assert_eq!(trim_url("https://example.com)."), "https://example.com");
    }

    #[test]
    fn test_javascript_links_are_neutralised() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("[x](javascript:alert(1))").unwrap();
        assert!(!html.contains("javascript:"));
        assert!(html.contains(r##"href="#""##));
    }

    #[test]
    fn test_data_png_images_are_allowed() {
        let renderer = MarkdownRenderer::new();
        let html = renderer.render("![dot](data:image/png;base64,AAAA)").unwrap();
        assert!(html.contains("data:image/png;base64,AAAA"));
    }
}
