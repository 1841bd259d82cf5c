//! Markdown post-processing.
//!
//! Two concerns live here:
//!
//! * [`clean_markdown`] tidies text produced by a vision-language model
//!   (stray outer fences, CRLF, trailing blanks, invisible characters).
//! * [`page_fragment`], [`aggregate`] and [`unescape_literals`] turn
//!   per-page fragments into the combined document.

use crate::engine::OcrEngine;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean raw VLM output. Passes run in this order:
///
/// 1. Strip a fence wrapping the whole answer
/// 2. CRLF / CR → LF
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of 3+ blank lines to 2
/// 5. Drop zero-width characters, BOM and soft hyphens
/// 6. Trim leading and trailing blank lines
pub fn clean_markdown(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_line_ends(&s);
    let s = collapse_blank_runs(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n\n").into_owned()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

// ── Assembly ────────────────────────────────────────────────────────────────

/// Per-page Markdown as it appears in responses.
///
/// Literal escape sequences are unescaped first. PDF pages then get a
/// `## Page {n}` heading; image uploads are returned as-is. An empty
/// fragment stays empty, with no heading.
pub fn page_fragment(page: usize, markdown: &str, with_heading: bool) -> String {
    let markdown = unescape_literals(markdown);
    if markdown.trim().is_empty() {
        String::new()
    } else if with_heading {
        format!("## Page {page}\n\n{markdown}")
    } else {
        markdown
    }
}

/// Combine per-page fragments into one document.
///
/// Uses the engine's own concatenation when it has one, else joins the
/// non-empty fragments with a blank line. Fragments are expected to come
/// from [`page_fragment`].
pub fn aggregate(engine: &dyn OcrEngine, fragments: &[String]) -> String {
    engine.concatenate_markdown(fragments).unwrap_or_else(|| {
        fragments
            .iter()
            .filter(|f| !f.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    })
}

/// Replace literal `\n` and `\"` sequences left over from double-encoded JSON.
pub fn unescape_literals(input: &str) -> String {
    input.replace("\\n", "\n").replace("\\\"", "\"")
}
