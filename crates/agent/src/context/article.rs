//! The article / visible-content context block.
//!
//! Raw page content is cleaned (tags stripped, whitespace collapsed) and
//! prefixed with a metadata header. When the block grows past half the
//! context window it is condensed toward a quarter of it:
//!
//! - visible content is cut to the budget, keeping what is on screen;
//! - long articles keep a beginning, a middle and an ending excerpt, since
//!   readers often ask about conclusions and mid-document detail;
//! - articles only slightly over budget are cut once at the budget.
//!
//! The header is never altered, and every cut carries a note naming the
//! original length.

use crate::context::message::{ContextMessage, Priority};
use marginalia_core::message::Role;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>").unwrap()
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Title fragments that mark a block as the reader's current viewport.
const VISIBLE_MARKERS: [&str; 3] = ["Current View", "Screen", "Visible"];

/// Strip HTML and collapse runs of whitespace to single spaces.
pub fn clean_content(raw: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(raw, " ");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Visible content if the title names the viewport, article content otherwise.
pub fn classify(title: &str) -> Priority {
    if VISIBLE_MARKERS.iter().any(|marker| title.contains(marker)) {
        Priority::VisibleContent
    } else {
        Priority::ArticleContent
    }
}

/// The `Article Title:` / `URL:` / `Language:` header.
pub fn metadata_header(title: &str, url: Option<&str>, language: Option<&str>) -> String {
    let mut header = format!("Article Title: {title}");
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
        header.push_str(&format!("\nURL: {url}"));
    }
    if let Some(language) = language.filter(|l| !l.trim().is_empty()) {
        header.push_str(&format!("\nLanguage: {language}"));
    }
    header
}

/// Condense `body` toward `max_tokens * 0.25` tokens.
///
/// Returns `None` when the body already fits.
pub fn shrink(kind: Priority, body: &str, max_tokens: usize) -> Option<String> {
    let token_target = max_tokens / 4;
    let char_target = token_target * 4;
    let len = body.chars().count();

    if len <= char_target {
        return None;
    }

    if kind == Priority::VisibleContent {
        return Some(format!(
            "{}\n\n[Note: visible content truncated to {char_target} of {len} characters]",
            char_range(body, 0, char_target)
        ));
    }

    // Strictly longer than 1.5x the budget.
    if len * 2 > char_target * 3 {
        let slice = (char_target / 5).max(1);
        let beginning = char_range(body, 0, slice * 2);
        let middle_start = (len / 2).saturating_sub(slice / 2);
        let middle = char_range(body, middle_start, middle_start + slice);
        let ending = char_range(body, len - slice, len);

        return Some(format!(
            "BEGINNING:\n{beginning}\n\n[...]\n\nMIDDLE SECTION:\n{middle}\n\n[...]\n\nENDING:\n{ending}\n\n\
             [Note: article condensed from {len} characters; showing beginning, middle and ending excerpts]"
        ));
    }

    Some(format!(
        "{}...\n\n[Note: article truncated from {len} characters]",
        char_range(body, 0, char_target)
    ))
}

/// `s[start..end]` counted in chars.
fn char_range(s: &str, start: usize, end: usize) -> &str {
    let byte = |n: usize| s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    let (from, to) = (byte(start), byte(end));
    &s[from..to.max(from)]
}

/// Summary returned by `ContextStore::article_context_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleContextInfo {
    pub title: String,
    /// Characters of the block as it will be rendered.
    pub content_length: usize,
    pub token_count: usize,
    pub kind: Priority,
    pub condensed: bool,
}

/// The single article or visible-content block of a session.
#[derive(Debug, Clone)]
pub struct ArticleContext {
    title: String,
    header: String,
    body: String,
    condensed: bool,
    message: ContextMessage,
}

impl ArticleContext {
    pub fn new(title: &str, raw_content: &str, url: Option<&str>, language: Option<&str>) -> Self {
        let header = metadata_header(title, url, language);
        let body = clean_content(raw_content);
        let message = ContextMessage::new(Role::System, compose(&header, &body), classify(title));

        Self {
            title: title.to_string(),
            header,
            body,
            condensed: false,
            message,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// `VisibleContent` or `ArticleContent`.
    pub fn kind(&self) -> Priority {
        self.message.priority
    }

    /// The cleaned content before any condensing.
    pub fn original_content(&self) -> &str {
        &self.body
    }

    pub fn message(&self) -> &ContextMessage {
        &self.message
    }

    pub fn token_count(&self) -> usize {
        self.message.token_count
    }

    pub fn is_condensed(&self) -> bool {
        self.condensed
    }

    pub fn info(&self) -> ArticleContextInfo {
        ArticleContextInfo {
            title: self.title.clone(),
            content_length: self.message.content.chars().count(),
            token_count: self.message.token_count,
            kind: self.kind(),
            condensed: self.condensed,
        }
    }

    /// Condense from the original content. Applies at most once.
    pub(crate) fn condense(&mut self, max_tokens: usize) -> bool {
        if self.condensed {
            return false;
        }
        let Some(shrunk) = shrink(self.kind(), &self.body, max_tokens) else {
            return false;
        };

        self.message.content = compose(&self.header, &shrunk);
        self.message.token_count = crate::context::token::estimate_tokens(&self.message.content);
        self.condensed = true;
        true
    }
}

fn compose(header: &str, body: &str) -> String {
    if body.is_empty() {
        header.to_string()
    } else {
        format!("{header}\n\n{body}")
    }
}
