//! OpenAI and OpenAI-compatible chat completions.
//!
//! The same wire format is spoken by many hosted providers, so the adapter
//! can be registered under any id with its own base URL.

use gateway_core::{
    ChatCompletion, GatewayError, GatewayRequest, GatewayResult, ImageRef, MessageRole,
    StreamingChunk, ToolCall, ToolCallDelta, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::adapter::{
    base_url, decode_with_images, image_from_url, upstream_error, DecodeOutcome, HttpRequestSpec,
    ProviderAdapter, StreamDecoder, UpstreamTarget,
};

/// Default OpenAI API base URL
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible adapter
#[derive(Debug, Clone)]
pub struct OpenAIAdapter {
    id: String,
    base_url: Option<String>,
}

impl OpenAIAdapter {
    /// Adapter for api.openai.com
    #[must_use]
    pub fn new() -> Self {
        Self::compatible("openai", OPENAI_BASE_URL)
    }

    /// Adapter for an OpenAI-compatible provider
    #[must_use]
    pub fn compatible(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: Some(base_url.into()),
        }
    }
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for OpenAIAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn build_request(
        &self,
        request: &GatewayRequest,
        target: &UpstreamTarget<'_>,
    ) -> GatewayResult<HttpRequestSpec> {
        let base = base_url(self, target)?;
        let body = chat_body(request, Some(target.model_name), target.stream)?;
        HttpRequestSpec::new(&self.id, format!("{base}/chat/completions"), body, target.stream)
            .secret_header("authorization", "Bearer ", target.token)
    }

    fn parse_response(&self, body: &[u8]) -> GatewayResult<ChatCompletion> {
        parse_chat_response(self, body)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ChatChunkDecoder::new(&self.id))
    }

    fn extract_images(&self, payload: &mut Value) -> Vec<ImageRef> {
        take_choice_images(payload)
    }
}

/// Chat completions body. `model` is omitted for deployment-addressed APIs.
pub(crate) fn chat_body(
    request: &GatewayRequest,
    model: Option<&str>,
    stream: bool,
) -> GatewayResult<Value> {
    let mut body = Map::new();
    if let Some(model) = model {
        body.insert("model".into(), json!(model));
    }
    body.insert("messages".into(), to_value(&request.messages)?);
    insert_opt(&mut body, "temperature", &request.temperature)?;
    insert_opt(&mut body, "max_tokens", &request.max_tokens)?;
    insert_opt(&mut body, "top_p", &request.top_p)?;
    insert_opt(&mut body, "stop", &request.stop)?;
    insert_opt(&mut body, "tools", &request.tools)?;
    insert_opt(&mut body, "tool_choice", &request.tool_choice)?;
    insert_opt(&mut body, "response_format", &request.response_format)?;
    insert_opt(&mut body, "reasoning_effort", &request.reasoning_effort)?;
    insert_opt(&mut body, "seed", &request.seed)?;
    insert_opt(&mut body, "user", &request.user)?;
    if stream {
        body.insert("stream".into(), Value::Bool(true));
        body.insert("stream_options".into(), json!({ "include_usage": true }));
    }
    Ok(Value::Object(body))
}

fn insert_opt<T: Serialize>(
    body: &mut Map<String, Value>,
    key: &str,
    value: &Option<T>,
) -> GatewayResult<()> {
    if let Some(value) = value {
        body.insert(key.to_string(), to_value(value)?);
    }
    Ok(())
}

fn to_value<T: Serialize>(value: &T) -> GatewayResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::internal(format!("failed to encode request: {e}")))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    #[serde(default)]
    message: Value,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

pub(crate) fn parse_chat_response(
    adapter: &dyn ProviderAdapter,
    body: &[u8],
) -> GatewayResult<ChatCompletion> {
    let (response, images): (ChatResponse, _) = decode_with_images(adapter, body)?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Ok(ChatCompletion {
            images,
            usage: response.usage,
            ..ChatCompletion::default()
        });
    };
    let message: ResponseMessage = serde_json::from_value(choice.message).map_err(|e| {
        GatewayError::transport(
            adapter.provider_id(),
            format!("malformed response message: {e}"),
        )
    })?;
    Ok(ChatCompletion {
        content: message.content,
        reasoning: message.reasoning.or(message.reasoning_content),
        tool_calls: message.tool_calls,
        images,
        finish_reason: choice.finish_reason,
        usage: response.usage,
    })
}

/// Move `images: [{image_url: {url}}]` out of the first choice's message or delta
pub(crate) fn take_choice_images(payload: &mut Value) -> Vec<ImageRef> {
    let Some(choice) = payload.pointer_mut("/choices/0").and_then(Value::as_object_mut) else {
        return Vec::new();
    };
    let images = ["message", "delta"]
        .iter()
        .find_map(|key| choice.get_mut(*key)?.as_object_mut()?.remove("images"));
    let Some(Value::Array(images)) = images else {
        return Vec::new();
    };
    images
        .into_iter()
        .filter_map(|mut image| {
            let url = match image.pointer_mut("/image_url/url") {
                Some(url) => url.take(),
                None => image.get_mut("url").map(Value::take)?,
            };
            match url {
                Value::String(url) => Some(image_from_url(&url)),
                _ => None,
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Value,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    role: Option<MessageRole>,
    content: Option<String>,
    reasoning: Option<String>,
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

/// Decoder for `chat.completion.chunk` events
#[derive(Debug)]
pub(crate) struct ChatChunkDecoder {
    provider: String,
}

impl ChatChunkDecoder {
    pub(crate) fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
        }
    }
}

impl StreamDecoder for ChatChunkDecoder {
    fn decode(&mut self, _event: Option<&str>, data: Value) -> DecodeOutcome {
        if let Some(error) = data.get("error") {
            return DecodeOutcome::Error(stream_error(&self.provider, error));
        }
        let body: ChunkBody = match serde_json::from_value(data) {
            Ok(body) => body,
            Err(e) => {
                return DecodeOutcome::Error(GatewayError::streaming(format!(
                    "malformed chunk from {}: {e}",
                    self.provider
                )))
            }
        };

        let mut chunk = StreamingChunk {
            usage: body.usage,
            ..StreamingChunk::default()
        };
        if let Some(choice) = body.choices.into_iter().next() {
            let delta: Delta = serde_json::from_value(choice.delta).unwrap_or_default();
            chunk.role = delta.role;
            chunk.content = delta.content;
            chunk.reasoning = delta.reasoning.or(delta.reasoning_content);
            chunk.tool_calls = delta.tool_calls;
            chunk.finish_reason = choice.finish_reason;
        }

        if chunk.is_empty() {
            DecodeOutcome::Chunks(Vec::new())
        } else {
            DecodeOutcome::Chunks(vec![chunk])
        }
    }
}

/// Error object embedded in a stream
fn stream_error(provider: &str, error: &Value) -> GatewayError {
    let status = ["status", "code"]
        .iter()
        .find_map(|key| error.get(*key).and_then(Value::as_u64))
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(502);
    upstream_error(provider, status, &json!({ "error": error }).to_string())
}
