//! Plain-text and HTML extraction.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::ExtractError;
use crate::traits::extractor::ContentExtractor;

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)>")
        .expect("valid regex")
});
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/h[1-6]|/li|/tr|/table|/section|/article|hr)\b[^>]*>")
        .expect("valid regex")
});
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").expect("valid regex"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</t[dh]\s*>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));

const HTML_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];
const TEXT_TYPES: &[&str] = &["text/plain", "text/markdown"];

/// Share of U+FFFD in decoded text above which the body is considered garbled.
const MAX_REPLACEMENT_RATIO: f64 = 0.05;

/// Extracts text from plain-text and HTML bodies.
///
/// Other media types (PDF, Office documents, images) are rejected with
/// `ExtractError::UnsupportedMediaType`. A body without a media type is
/// treated as HTML if it looks like markup, otherwise as plain text.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ContentExtractor for TextExtractor {
    fn supports(&self, media_type: &str) -> bool {
        HTML_TYPES.contains(&media_type) || TEXT_TYPES.contains(&media_type)
    }

    fn extract(&self, body: &[u8], media_type: Option<&str>) -> Result<String, ExtractError> {
        let text = decode(body)?;
        match media_type {
            Some(mt) if HTML_TYPES.contains(&mt) => Ok(html_to_text(&text)),
            Some(mt) if TEXT_TYPES.contains(&mt) => Ok(text),
            Some(mt) => Err(ExtractError::UnsupportedMediaType(mt.to_string())),
            None if looks_like_html(&text) => Ok(html_to_text(&text)),
            None => Ok(text),
        }
    }
}

fn decode(body: &[u8]) -> Result<String, ExtractError> {
    let text = String::from_utf8_lossy(body);
    let total = text.chars().count();
    if total == 0 {
        return Ok(String::new());
    }
    let replaced = text.chars().filter(|c| *c == char::REPLACEMENT_CHARACTER).count();
    if replaced as f64 / total as f64 > MAX_REPLACEMENT_RATIO {
        return Err(ExtractError::Garbled(format!(
            "{} of {} characters are not valid UTF-8",
            replaced, total
        )));
    }
    Ok(text.into_owned())
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(256).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body")
}

/// Strip markup, keeping block structure as line breaks.
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, "");
    let text = COMMENT.replace_all(&text, "");
    let text = LIST_ITEM.replace_all(&text, "\n- ");
    let text = CELL.replace_all(&text, " ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
