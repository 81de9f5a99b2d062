//! Image splicing and counting.
//!
//! Generated images can be several megabytes of base64. Rather than building
//! a `data:` URL and re-serializing the whole delta, the delta is serialized
//! without images and the image array is written straight into the text,
//! just before the delta object's closing brace.

use gateway_core::{ChatMessage, ContentPart, ImageRef, MessageContent};
use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static IMAGE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bhttps?://[^\s\)\]\x22']+\.(?:png|jpe?g|gif|webp|bmp|svg)(?:\?[^\s\)\]\x22']*)?|data:image/[a-z0-9.+-]+;base64,")
        .expect("valid image URL pattern")
});

/// Index of the `}` closing the object that opens at `open`.
///
/// Scans with depth tracking and skips over string literals.
#[must_use]
pub fn find_object_end(json: &str, open: usize) -> Option<usize> {
    let bytes = json.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (b == b'}').then_some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Write `"images":[...]` into the object stored under `key` in `json`.
///
/// Returns the new text, or `None` when the key or a well-formed object
/// after it cannot be found.
#[must_use]
pub fn splice_images(json: &str, key: &str, images: &[ImageRef]) -> Option<String> {
    let needle = format!("\"{key}\":");
    let key_at = find_key(json, &needle)?;
    let open = key_at + needle.len() + json[key_at + needle.len()..].find('{')?;
    let close = find_object_end(json, open)?;
    let empty = json[open + 1..close].trim().is_empty();

    let payload: usize = images.iter().map(|i| i.url_len() + 48).sum();
    let mut out = String::with_capacity(json.len() + payload + 16);
    out.push_str(&json[..close]);
    if !empty {
        out.push(',');
    }
    out.push_str("\"images\":[");
    for (i, image) in images.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("{\"type\":\"image_url\",\"image_url\":{\"url\":");
        image.write_json_string(&mut out);
        out.push_str("}}");
    }
    out.push(']');
    out.push_str(&json[close..]);
    Some(out)
}

/// First occurrence of `needle` outside string literals
fn find_key(json: &str, needle: &str) -> Option<usize> {
    let bytes = json.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            if json[i..].starts_with(needle) {
                return Some(i);
            }
            in_string = true;
        }
    }
    None
}

/// Bare image URLs inside free text
#[must_use]
pub fn count_images_in_text(text: &str) -> usize {
    IMAGE_URL.find_iter(text).count()
}

/// Images in request messages: explicit image parts plus URLs in text
#[must_use]
pub fn count_message_images(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|message| match &message.content {
            MessageContent::Text(text) => count_images_in_text(text),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::ImageUrl { .. } => 1,
                    ContentPart::Text { text } => count_images_in_text(text),
                })
                .sum(),
        })
        .sum()
}
