//! Normalized non-streaming completion.

use serde_json::{json, Value};

use crate::request::ToolCall;
use crate::streaming::{FunctionDelta, ImageRef, StreamingChunk, ToolCallDelta, Usage};

/// Completion parsed from an upstream JSON body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    /// Assistant text
    pub content: Option<String>,
    /// Reasoning text
    pub reasoning: Option<String>,
    /// Tool calls
    pub tool_calls: Vec<ToolCall>,
    /// Generated images
    pub images: Vec<ImageRef>,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Token usage
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Whether the completion produced anything
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
            || !self.tool_calls.is_empty()
            || !self.images.is_empty()
    }

    /// Render as an OpenAI `chat.completion` object
    #[must_use]
    pub fn to_openai_json(&self, id: &str, model: &str, created: i64) -> Value {
        let mut message = json!({
            "role": "assistant",
            "content": self.content,
        });
        if let Some(reasoning) = &self.reasoning {
            message["reasoning"] = json!(reasoning);
        }
        if !self.tool_calls.is_empty() {
            message["tool_calls"] = json!(self.tool_calls);
        }
        if !self.images.is_empty() {
            message["images"] = Value::Array(
                self.images
                    .iter()
                    .map(|img| json!({"type": "image_url", "image_url": {"url": img}}))
                    .collect(),
            );
        }

        json!({
            "id": id,
            "object": "chat.completion",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": self.finish_reason.as_deref().unwrap_or("stop"),
            }],
            "usage": self.usage,
        })
    }

    /// Split into deltas for SSE synthesis
    #[must_use]
    pub fn into_chunks(self) -> Vec<StreamingChunk> {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| ToolCallDelta {
                index: u32::try_from(index).unwrap_or(u32::MAX),
                id: Some(call.id),
                call_type: Some(call.tool_type),
                function: FunctionDelta {
                    name: Some(call.function.name),
                    arguments: Some(call.function.arguments),
                },
            })
            .collect();

        vec![
            StreamingChunk {
                role: Some(crate::request::MessageRole::Assistant),
                content: self.content,
                reasoning: self.reasoning,
                tool_calls,
                images: self.images,
                finish_reason: None,
                usage: None,
            },
            StreamingChunk {
                finish_reason: Some(self.finish_reason.unwrap_or_else(|| "stop".to_string())),
                usage: self.usage,
                ..StreamingChunk::default()
            },
        ]
    }
}
