//! Preparing generated markup for the sandbox.

/// Id of the element injected content is mounted under.
pub const CONTENT_ROOT_ID: &str = "__ai_root";

pub const PLACEHOLDER: &str = "<div style='padding:2rem;color:#666;font:14px system-ui'>\
    No content yet. Enter a prompt and click Generate.</div>";

pub(crate) const ERROR_PREFIX: &str =
    "<div style='padding:2rem;font-family:system-ui;color:#b00'>Error: ";

/// Neutralises script blocks: opening tags are escaped, closing tags removed.
/// Matching is ASCII case-insensitive.
pub fn sanitize_markup(markup: &str) -> String {
    let escaped = replace_ignore_ascii_case(markup, "<script", "&lt;script");
    replace_ignore_ascii_case(&escaped, "</script>", "")
}

/// Wraps content in the document handed to a fresh sandbox instance.
pub fn compose_document(content: &str) -> String {
    let body = if content.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        sanitize_markup(content)
    };

    format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'/><style>\
         html,body{{margin:0;font-family:system-ui,sans-serif}}body{{padding:0}}\
         </style></head><body><div id=\"{CONTENT_ROOT_ID}\">{body}</div></body></html>"
    )
}

/// Drops a leading ```` ```lang ```` fence and a trailing ```` ``` ````, then
/// trims.
pub fn strip_code_fences(raw: &str) -> String {
    let mut text = raw;

    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.trim_start_matches(|ch: char| ch.is_ascii_alphabetic());
        text = rest.strip_prefix('\n').unwrap_or(rest);
    }

    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    text.trim().to_string()
}

/// Content shown in place of generated markup when generation fails. The
/// message is escaped so server text cannot inject markup.
pub fn error_fragment(message: &str) -> String {
    format!("{ERROR_PREFIX}{}</div>", escape_html(message))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn replace_ignore_ascii_case(haystack: &str, needle: &str, replacement: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `haystack`.
    let lowered = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;

    while let Some(found) = lowered[cursor..].find(&needle) {
        let start = cursor + found;
        out.push_str(&haystack[cursor..start]);
        out.push_str(replacement);
        cursor = start + needle.len();
    }

    out.push_str(&haystack[cursor..]);
    out
}
