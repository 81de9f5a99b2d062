//! Anthropic Messages API.

use std::collections::HashMap;

use gateway_core::request::FunctionCall;
use gateway_core::streaming::FunctionDelta;
use gateway_core::{
    ChatCompletion, ChatMessage, ContentPart, GatewayError, GatewayRequest, GatewayResult,
    ImageRef, MessageContent, MessageRole, StreamingChunk, ToolCall, ToolCallDelta, Usage,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapter::{
    base_url, decode_with_images, parse_data_url, upstream_error, DecodeOutcome, HttpRequestSpec,
    ProviderAdapter, StreamDecoder, UpstreamTarget,
};

/// Default Anthropic API base URL
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output cap sent when neither the request nor the catalog sets one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic adapter
#[derive(Debug, Clone, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    /// Create the adapter
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn default_base_url(&self) -> Option<&str> {
        Some(ANTHROPIC_BASE_URL)
    }

    fn build_request(
        &self,
        request: &GatewayRequest,
        target: &UpstreamTarget<'_>,
    ) -> GatewayResult<HttpRequestSpec> {
        let base = base_url(self, target)?;
        let body = messages_body(request, target)?;
        HttpRequestSpec::new("anthropic", format!("{base}/v1/messages"), body, target.stream)
            .header("anthropic-version", ANTHROPIC_VERSION)?
            .secret_header("x-api-key", "", target.token)
    }

    fn parse_response(&self, body: &[u8]) -> GatewayResult<ChatCompletion> {
        let (response, images): (MessagesResponse, _) = decode_with_images(self, body)?;
        let mut completion = ChatCompletion {
            images,
            finish_reason: response.stop_reason.as_deref().map(map_stop_reason),
            usage: response.usage.map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            ..ChatCompletion::default()
        };
        for block in response.content {
            match block {
                ContentBlock::Text { text } => {
                    completion.content.get_or_insert_with(String::new).push_str(&text);
                }
                ContentBlock::Thinking { thinking } => {
                    completion
                        .reasoning
                        .get_or_insert_with(String::new)
                        .push_str(&thinking);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    completion.tool_calls.push(ToolCall {
                        id,
                        tool_type: "function".to_string(),
                        function: FunctionCall {
                            name,
                            arguments: input.to_string(),
                        },
                    });
                }
                ContentBlock::Other => {}
            }
        }
        Ok(completion)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(MessagesStreamDecoder::default())
    }

    // The Messages API does not generate images
    fn extract_images(&self, _payload: &mut Value) -> Vec<ImageRef> {
        Vec::new()
    }
}

fn messages_body(request: &GatewayRequest, target: &UpstreamTarget<'_>) -> GatewayResult<Value> {
    let mut body = Map::new();
    body.insert("model".into(), json!(target.model_name));

    let system: Vec<String> = request
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(ChatMessage::text)
        .collect();
    if !system.is_empty() {
        body.insert("system".into(), json!(system.join("\n\n")));
    }

    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(convert_message)
        .collect();
    body.insert("messages".into(), Value::Array(messages));

    let max_tokens = request
        .max_tokens
        .or(target.max_output)
        .unwrap_or(DEFAULT_MAX_TOKENS);
    body.insert("max_tokens".into(), json!(max_tokens));

    let thinking_budget = request.reasoning_effort.as_deref().and_then(thinking_budget);
    if let Some(budget) = thinking_budget {
        body.insert(
            "thinking".into(),
            json!({ "type": "enabled", "budget_tokens": budget.min(max_tokens.saturating_sub(1)) }),
        );
    } else if let Some(temperature) = request.temperature {
        // Extended thinking rejects a custom temperature
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if let Some(stop) = &request.stop {
        body.insert("stop_sequences".into(), json!(stop));
    }
    if let Some(tools) = &request.tools {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "input_schema": t.function.parameters.clone()
                        .unwrap_or_else(|| json!({ "type": "object" })),
                })
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = request.tool_choice.as_ref().and_then(convert_tool_choice) {
        body.insert("tool_choice".into(), choice);
    }
    if let Some(user) = &request.user {
        body.insert("metadata".into(), json!({ "user_id": user }));
    }
    if target.stream {
        body.insert("stream".into(), Value::Bool(true));
    }
    Ok(Value::Object(body))
}

fn thinking_budget(effort: &str) -> Option<u32> {
    match effort {
        "low" => Some(1024),
        "medium" => Some(4096),
        "high" => Some(16384),
        _ => None,
    }
}

fn convert_tool_choice(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(json!({ "type": "auto" })),
            "required" => Some(json!({ "type": "any" })),
            "none" => Some(json!({ "type": "none" })),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| json!({ "type": "tool", "name": name })),
        _ => None,
    }
}

fn convert_message(message: &ChatMessage) -> Value {
    match message.role {
        MessageRole::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.text(),
            }],
        }),
        MessageRole::Assistant => {
            let mut blocks = Vec::new();
            let text = message.text();
            if !text.is_empty() {
                blocks.push(json!({ "type": "text", "text": text }));
            }
            for call in message.tool_calls.iter().flatten() {
                let input: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.function.name,
                    "input": input,
                }));
            }
            json!({ "role": "assistant", "content": blocks })
        }
        MessageRole::User | MessageRole::System => {
            let content = match &message.content {
                MessageContent::Text(text) => json!(text),
                MessageContent::Parts(parts) => {
                    Value::Array(parts.iter().map(convert_part).collect())
                }
            };
            json!({ "role": "user", "content": content })
        }
    }
}

fn convert_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
        ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
            Some((media_type, data)) => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data },
            }),
            None => json!({
                "type": "image",
                "source": { "type": "url", "url": image_url.url },
            }),
        },
    }
}

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        _ => "stop",
    }
    .to_string()
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

/// Maps content block positions onto OpenAI tool call indices
#[derive(Debug, Default)]
struct MessagesStreamDecoder {
    input_tokens: u32,
    tool_indices: HashMap<u32, u32>,
}

impl MessagesStreamDecoder {
    fn tool_delta(&self, block: u32) -> Option<u32> {
        self.tool_indices.get(&block).copied()
    }
}

impl StreamDecoder for MessagesStreamDecoder {
    fn decode(&mut self, _event: Option<&str>, data: Value) -> DecodeOutcome {
        let event: StreamEvent = match serde_json::from_value(data) {
            Ok(event) => event,
            Err(e) => {
                return DecodeOutcome::Error(GatewayError::streaming(format!(
                    "malformed event from anthropic: {e}"
                )))
            }
        };

        let chunk = match event {
            StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.map_or(0, |u| u.input_tokens);
                StreamingChunk {
                    role: Some(MessageRole::Assistant),
                    ..StreamingChunk::default()
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = u32::try_from(self.tool_indices.len()).unwrap_or(u32::MAX);
                    self.tool_indices.insert(index, tool_index);
                    StreamingChunk {
                        tool_calls: vec![ToolCallDelta {
                            index: tool_index,
                            id: Some(id),
                            call_type: Some("function".to_string()),
                            function: FunctionDelta {
                                name: Some(name),
                                arguments: Some(String::new()),
                            },
                        }],
                        ..StreamingChunk::default()
                    }
                }
                ContentBlock::Text { text } if !text.is_empty() => StreamingChunk::text(text),
                _ => StreamingChunk::default(),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => StreamingChunk::text(text),
                BlockDelta::ThinkingDelta { thinking } => StreamingChunk {
                    reasoning: Some(thinking),
                    ..StreamingChunk::default()
                },
                BlockDelta::InputJsonDelta { partial_json } => match self.tool_delta(index) {
                    Some(tool_index) => StreamingChunk {
                        tool_calls: vec![ToolCallDelta {
                            index: tool_index,
                            function: FunctionDelta {
                                name: None,
                                arguments: Some(partial_json),
                            },
                            ..ToolCallDelta::default()
                        }],
                        ..StreamingChunk::default()
                    },
                    None => StreamingChunk::default(),
                },
                BlockDelta::Other => StreamingChunk::default(),
            },
            StreamEvent::MessageDelta { delta, usage } => StreamingChunk {
                finish_reason: delta.stop_reason.as_deref().map(map_stop_reason),
                usage: usage.map(|u| Usage::new(self.input_tokens, u.output_tokens)),
                ..StreamingChunk::default()
            },
            StreamEvent::MessageStop => return DecodeOutcome::Done,
            StreamEvent::Error { error } => {
                let status = error_status(&error.error_type);
                let body = json!({ "error": { "type": error.error_type, "message": error.message } });
                return DecodeOutcome::Error(upstream_error("anthropic", status, &body.to_string()));
            }
            StreamEvent::Ignored => StreamingChunk::default(),
        };

        if chunk.is_empty() {
            DecodeOutcome::Chunks(Vec::new())
        } else {
            DecodeOutcome::Chunks(vec![chunk])
        }
    }
}

fn error_status(error_type: &str) -> u16 {
    match error_type {
        "invalid_request_error" => 400,
        "authentication_error" => 401,
        "permission_error" => 403,
        "not_found_error" => 404,
        "rate_limit_error" => 429,
        "overloaded_error" => 529,
        _ => 500,
    }
}
