//! Normalized streaming types.
//!
//! Provider adapters turn upstream events into [`StreamingChunk`]s. Image
//! payloads travel as [`ImageRef::Deferred`] so the `data:` URL is only built
//! when the outgoing JSON is written.

use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

use crate::request::MessageRole;

/// A single normalized delta
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingChunk {
    /// Role announced by the first delta
    pub role: Option<MessageRole>,
    /// Text delta
    pub content: Option<String>,
    /// Reasoning text delta
    pub reasoning: Option<String>,
    /// Tool call deltas
    pub tool_calls: Vec<ToolCallDelta>,
    /// Generated images
    pub images: Vec<ImageRef>,
    /// Finish reason on the last delta
    pub finish_reason: Option<String>,
    /// Usage reported by the upstream
    pub usage: Option<Usage>,
}

impl StreamingChunk {
    /// Chunk carrying only text
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Chunk carrying only a finish reason
    #[must_use]
    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Whether the chunk carries content, tool calls or images
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
            || self.reasoning.as_deref().is_some_and(|c| !c.is_empty())
            || !self.tool_calls.is_empty()
            || !self.images.is_empty()
    }

    /// Whether the chunk carries nothing worth forwarding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && !self.has_output()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

/// Incremental tool call, OpenAI delta shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call in the assistant message
    pub index: u32,
    /// Call id, present on the first delta of a call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Always `function` when present
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function name and argument fragment
    #[serde(default)]
    pub function: FunctionDelta,
}

/// Function part of a [`ToolCallDelta`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument JSON fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Usage from prompt and completion counts
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Reference to an image payload.
///
/// `Deferred` keeps the MIME type and raw base64 separate. Use
/// [`ImageRef::write_json_string`] or the `Serialize` impl to emit the URL
/// without building the concatenated string first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Ready-to-use URL (http(s) or `data:`)
    Materialized {
        /// Image URL
        url: String,
    },
    /// Inline image not yet turned into a `data:` URL
    Deferred {
        /// MIME type such as `image/png`
        mime_type: String,
        /// Raw base64 payload
        data: String,
    },
}

impl ImageRef {
    /// Deferred inline image
    #[must_use]
    pub fn deferred(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Deferred {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Image by URL
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::Materialized { url: url.into() }
    }

    /// Build the URL. Allocates only for deferred images.
    #[must_use]
    pub fn realize(&self) -> Cow<'_, str> {
        match self {
            Self::Materialized { url } => Cow::Borrowed(url),
            Self::Deferred { .. } => Cow::Owned(self.to_string()),
        }
    }

    /// Length of the realized URL in bytes
    #[must_use]
    pub fn url_len(&self) -> usize {
        match self {
            Self::Materialized { url } => url.len(),
            Self::Deferred { mime_type, data } => {
                "data:".len() + mime_type.len() + ";base64,".len() + data.len()
            }
        }
    }

    /// Append the URL to `out` as a quoted JSON string
    pub fn write_json_string(&self, out: &mut String) {
        out.reserve(self.url_len() + 2);
        out.push('"');
        match self {
            Self::Materialized { url } => push_json_escaped(out, url),
            Self::Deferred { mime_type, data } => {
                out.push_str("data:");
                push_json_escaped(out, mime_type);
                out.push_str(";base64,");
                push_json_escaped(out, data);
            }
        }
        out.push('"');
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialized { url } => f.write_str(url),
            Self::Deferred { mime_type, data } => {
                f.write_str("data:")?;
                f.write_str(mime_type)?;
                f.write_str(";base64,")?;
                f.write_str(data)
            }
        }
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Append `s` to `out` with JSON string escaping
pub fn push_json_escaped(out: &mut String, s: &str) {
    if !s.bytes().any(|b| b == b'"' || b == b'\\' || b < 0x20) {
        out.push_str(s);
        return;
    }
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_realize() {
        let image = ImageRef::deferred("image/png", "iVBORw0KGgo=");
        assert_eq!(image.realize(), "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(image.url_len(), image.realize().len());
    }

    #[test]
    fn test_materialized_realize_borrows() {
        let image = ImageRef::url("https://cdn.example.com/a.png");
        assert!(matches!(image.realize(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_write_json_string_matches_serde() {
        let image = ImageRef::deferred("image/jpeg", "abc+/=");
        let mut out = String::new();
        image.write_json_string(&mut out);
        assert_eq!(out, serde_json::to_string(&image).expect("serialize"));

        let quoted = ImageRef::url("https://x/\"q\"\n");
        let mut out = String::new();
        quoted.write_json_string(&mut out);
        assert_eq!(out, serde_json::to_string(&quoted).expect("serialize"));
    }

    #[test]
    fn test_has_output() {
        assert!(!StreamingChunk::finish("stop").has_output());
        assert!(!StreamingChunk::text("").has_output());
        assert!(StreamingChunk::text("hi").has_output());
        let chunk = StreamingChunk {
            tool_calls: vec![ToolCallDelta::default()],
            ..StreamingChunk::default()
        };
        assert!(chunk.has_output());
    }
}
