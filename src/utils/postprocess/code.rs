//! Extraction of generated templates from chat replies.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HANDLEBARS_BLOCK_RE: Regex = Regex::new(r"(?s)```\s*(handlebars|hbs)?\s+(.*?)\s+```").unwrap();
    static ref BLOCK_SET_OPEN_RE: Regex = Regex::new(r"\{\{(~?)\s*#set\b").unwrap();
    static ref BLOCK_SET_CLOSE_RE: Regex = Regex::new(r"\{\{~?\s*/set\s*~?\}\}").unwrap();
}

/// Returns the body of the first fenced code block of a reply, optionally tagged `handlebars`.
///
/// The fences and the whitespace right inside them are stripped.
pub fn extract_handlebars_block(reply: &str) -> Option<&str> {
    HANDLEBARS_BLOCK_RE
        .captures(reply)
        .and_then(|captures| captures.get(2))
        .map(|body| body.as_str())
}

/// Repairs the two mistakes models make most often in generated templates.
///
/// * `{{#set ...}}` written as a block without any `{{/set}}` becomes the inline `{{set ...}}`.
/// * `{{Guess: ...}}` notes become comments.
pub fn sanitize_plan(template: &str) -> String {
    let template = if BLOCK_SET_CLOSE_RE.is_match(template) {
        template.to_string()
    } else {
        BLOCK_SET_OPEN_RE.replace_all(template, "{{${1}set").into_owned()
    };
    template.replace("{{Guess:", "{{! Guess:")
}
