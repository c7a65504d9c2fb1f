//! Streaming `</head>` injection.
//!
//! The render engine emits markup in arbitrary chunks. Before the first
//! closing head tag the injector inserts, in order:
//!
//! 1. the hydration envelope as a JSON script
//! 2. a stylesheet preload and link, when the page has a stylesheet
//! 3. the inline theme script
//!
//! The tag may be split across chunks, so up to `"</head>".len() - 1` bytes
//! are held back until the next chunk shows whether they start the tag.
//! Everything else passes through unchanged.

use crate::compose::HydrationEnvelope;
use crate::constants::{HEAD_CLOSE, HYDRATION_SCRIPT_ID, THEME_STORAGE_KEY};

/// Single-pass transform inserting a payload before the first `</head>`.
#[derive(Debug)]
pub struct HeadInjector {
    pending: Vec<u8>,
    payload: Option<Vec<u8>>,
}

impl HeadInjector {
    /// Injector that will insert `payload` once.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            pending: Vec::new(),
            payload: Some(payload),
        }
    }

    /// Whether the payload has been emitted.
    pub fn injected(&self) -> bool {
        self.payload.is_none()
    }

    /// Feeds one chunk and returns the bytes that are safe to emit now.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        if self.payload.is_none() {
            return chunk.to_vec();
        }

        self.pending.extend_from_slice(chunk);

        if let Some(pos) = find(&self.pending, HEAD_CLOSE) {
            let payload = self.payload.take().unwrap_or_default();
            let mut out = Vec::with_capacity(self.pending.len() + payload.len());
            out.extend_from_slice(&self.pending[..pos]);
            out.extend_from_slice(&payload);
            out.extend_from_slice(&self.pending[pos..]);
            self.pending.clear();
            return out;
        }

        let hold = HEAD_CLOSE.len() - 1;
        if self.pending.len() > hold {
            let split = self.pending.len() - hold;
            return self.pending.drain(..split).collect();
        }
        Vec::new()
    }

    /// Ends the stream, releasing anything still held back.
    pub fn finish(self) -> Vec<u8> {
        self.pending
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Markup injected before `</head>`.
pub fn head_payload(
    envelope: &HydrationEnvelope,
    stylesheet_href: Option<&str>,
) -> Result<Vec<u8>, serde_json::Error> {
    let json = escape_script_json(&serde_json::to_string(envelope)?);
    let mut out = format!(
        r#"<script id="{HYDRATION_SCRIPT_ID}" type="application/json">{json}</script>"#
    );

    if let Some(href) = stylesheet_href {
        let href = escape_attr(href);
        out.push_str(&format!(
            r#"<link rel="preload" href="{href}" as="style"><link rel="stylesheet" href="{href}">"#
        ));
    }

    out.push_str("<script>");
    out.push_str(&theme_script());
    out.push_str("</script>");
    Ok(out.into_bytes())
}

/// Applies the stored theme before first paint, falling back to the
/// system preference.
fn theme_script() -> String {
    format!(
        "(function(){{try{{var t=localStorage.getItem(\"{THEME_STORAGE_KEY}\");\
         if(t!==\"dark\"&&t!==\"light\"){{t=window.matchMedia(\"(prefers-color-scheme: dark)\").matches?\"dark\":\"light\";}}\
         document.documentElement.setAttribute(\"data-theme\",t);}}catch(e){{}}}})();"
    )
}

/// Makes JSON safe inside a `<script>` element.
fn escape_script_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
