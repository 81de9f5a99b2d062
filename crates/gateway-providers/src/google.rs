//! Google AI Studio (Gemini) adapter.
//!
//! Gemini returns generated images as `inlineData` parts. Those are moved out
//! of the payload by [`ProviderAdapter::extract_images`] and handed on as
//! [`ImageRef::Deferred`], so the base64 payload goes straight from the
//! parsed event into the outgoing delta without being copied into a
//! `data:` URL first.

use gateway_core::request::FunctionCall;
use gateway_core::streaming::FunctionDelta;
use gateway_core::{
    ChatCompletion, ContentPart, ErrorClass, GatewayError, GatewayRequest, GatewayResult,
    ImageRef, MessageContent, MessageRole, StreamingChunk, ToolCall, ToolCallDelta, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{
    base_url, decode_with_images, parse_data_url, DecodeOutcome, HttpRequestSpec, ProviderAdapter,
    StreamDecoder, UpstreamTarget,
};

/// Default Generative Language API base URL
pub const GOOGLE_AI_STUDIO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google AI Studio adapter
#[derive(Debug, Clone, Default)]
pub struct GoogleAdapter;

impl GoogleAdapter {
    /// Create the adapter
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn provider_id(&self) -> &str {
        "google-ai-studio"
    }

    fn default_base_url(&self) -> Option<&str> {
        Some(GOOGLE_AI_STUDIO_BASE_URL)
    }

    fn build_request(
        &self,
        request: &GatewayRequest,
        target: &UpstreamTarget<'_>,
    ) -> GatewayResult<HttpRequestSpec> {
        let base = base_url(self, target)?;
        let url = if target.stream {
            format!(
                "{base}/models/{}:streamGenerateContent?alt=sse",
                target.model_name
            )
        } else {
            format!("{base}/models/{}:generateContent", target.model_name)
        };
        let body = serde_json::to_value(transform_request(request))
            .map_err(|e| GatewayError::internal(format!("failed to encode request: {e}")))?;
        HttpRequestSpec::new("google-ai-studio", url, body, target.stream).secret_header(
            "x-goog-api-key",
            "",
            target.token,
        )
    }

    fn parse_response(&self, body: &[u8]) -> GatewayResult<ChatCompletion> {
        let (response, images): (GoogleResponse, _) = decode_with_images(self, body)?;
        check_prompt_blocked(&response)?;
        let mut tool_index = 0;
        let chunk = response_to_chunk(response, &mut tool_index);
        Ok(ChatCompletion {
            content: chunk.content,
            reasoning: chunk.reasoning,
            tool_calls: chunk
                .tool_calls
                .into_iter()
                .map(|delta| ToolCall {
                    id: delta.id.unwrap_or_default(),
                    tool_type: "function".to_string(),
                    function: FunctionCall {
                        name: delta.function.name.unwrap_or_default(),
                        arguments: delta.function.arguments.unwrap_or_default(),
                    },
                })
                .collect(),
            images,
            finish_reason: chunk.finish_reason,
            usage: chunk.usage,
        })
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(GoogleStreamDecoder::default())
    }

    fn extract_images(&self, payload: &mut Value) -> Vec<ImageRef> {
        let Some(parts) = payload
            .pointer_mut("/candidates/0/content/parts")
            .and_then(Value::as_array_mut)
        else {
            return Vec::new();
        };
        let mut images = Vec::new();
        parts.retain_mut(|part| {
            let Some(inline) = part.get_mut("inlineData") else {
                return true;
            };
            let mime_type = inline.get_mut("mimeType").map(Value::take);
            let data = inline.get_mut("data").map(Value::take);
            if let (Some(Value::String(mime_type)), Some(Value::String(data))) = (mime_type, data) {
                images.push(ImageRef::Deferred { mime_type, data });
            }
            false
        });
        images
    }
}

fn transform_request(request: &GatewayRequest) -> GoogleRequest {
    let mut contents = Vec::new();
    let mut system_parts = Vec::new();

    for message in &request.messages {
        match message.role {
            MessageRole::System => system_parts.push(GooglePart::Text {
                text: message.text(),
            }),
            MessageRole::User => contents.push(GoogleContent {
                role: Some("user".to_string()),
                parts: transform_content(&message.content),
            }),
            MessageRole::Assistant => {
                let mut parts = Vec::new();
                let text = message.text();
                if !text.is_empty() {
                    parts.push(GooglePart::Text { text });
                }
                for call in message.tool_calls.iter().flatten() {
                    parts.push(GooglePart::FunctionCall {
                        function_call: GoogleFunctionCallData {
                            name: call.function.name.clone(),
                            args: serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| json!({})),
                        },
                    });
                }
                contents.push(GoogleContent {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            MessageRole::Tool => {
                let name = message
                    .name
                    .clone()
                    .or_else(|| message.tool_call_id.clone())
                    .unwrap_or_default();
                let text = message.text();
                let response = serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({ "content": text }));
                contents.push(GoogleContent {
                    role: Some("user".to_string()),
                    parts: vec![GooglePart::FunctionResponse {
                        function_response: GoogleFunctionResponseData { name, response },
                    }],
                });
            }
        }
    }

    let (response_mime_type, response_schema) = match request.response_format.as_ref() {
        Some(f) if f.format_type == "json_schema" => (
            Some("application/json".to_string()),
            f.json_schema
                .as_ref()
                .map(|s| s.get("schema").cloned().unwrap_or_else(|| s.clone())),
        ),
        Some(f) if f.format_type == "json_object" => (Some("application/json".to_string()), None),
        _ => (None, None),
    };

    let generation_config = GoogleGenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop.clone(),
        response_mime_type,
        response_schema,
    };

    let tools = request.tools.as_ref().map(|tools| {
        vec![GoogleTool {
            function_declarations: tools
                .iter()
                .map(|t| GoogleFunctionDeclaration {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                })
                .collect(),
        }]
    });

    GoogleRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then_some(GoogleContent {
            role: None,
            parts: system_parts,
        }),
        generation_config: Some(generation_config),
        tools,
    }
}

fn transform_content(content: &MessageContent) -> Vec<GooglePart> {
    match content {
        MessageContent::Text(text) => vec![GooglePart::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => GooglePart::Text { text: text.clone() },
                ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
                    Some((mime_type, data)) => GooglePart::InlineData {
                        inline_data: GoogleInlineData {
                            mime_type: mime_type.to_string(),
                            data: data.to_string(),
                        },
                    },
                    None => GooglePart::FileData {
                        file_data: GoogleFileData {
                            mime_type: guess_image_mime(&image_url.url).to_string(),
                            file_uri: image_url.url.clone(),
                        },
                    },
                },
            })
            .collect(),
    }
}

fn guess_image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => "content_filter",
        _ => "stop",
    }
}

fn check_prompt_blocked(response: &GoogleResponse) -> GatewayResult<()> {
    let blocked = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref());
    match blocked {
        Some(reason) if response.candidates.is_empty() => Err(GatewayError::Upstream {
            provider: "google-ai-studio".to_string(),
            class: ErrorClass::ContentFilter,
            status_code: None,
            message: format!("prompt blocked: {reason}"),
            response_text: None,
        }),
        _ => Ok(()),
    }
}

/// Flatten the first candidate into one chunk, moving part payloads
fn response_to_chunk(response: GoogleResponse, tool_index: &mut u32) -> StreamingChunk {
    let mut chunk = StreamingChunk {
        usage: response.usage_metadata.map(|u| {
            let completion = u.candidates_token_count + u.thoughts_token_count;
            Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: completion,
                total_tokens: u
                    .total_token_count
                    .unwrap_or(u.prompt_token_count + completion),
            }
        }),
        ..StreamingChunk::default()
    };

    let Some(candidate) = response.candidates.into_iter().next() else {
        return chunk;
    };

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            GooglePart::Thought { text, thought } if thought => {
                chunk.reasoning.get_or_insert_with(String::new).push_str(&text);
            }
            GooglePart::Thought { text, .. } | GooglePart::Text { text } => {
                chunk.content.get_or_insert_with(String::new).push_str(&text);
            }
            GooglePart::FunctionCall { function_call } => {
                chunk.tool_calls.push(ToolCallDelta {
                    index: *tool_index,
                    id: Some(format!("call_{}", uuid::Uuid::new_v4().simple())),
                    call_type: Some("function".to_string()),
                    function: FunctionDelta {
                        name: Some(function_call.name),
                        arguments: Some(function_call.args.to_string()),
                    },
                });
                *tool_index += 1;
            }
            GooglePart::InlineData { .. }
            | GooglePart::FileData { .. }
            | GooglePart::FunctionResponse { .. } => {
                debug!("Ignoring non-output part in Gemini response");
            }
        }
    }

    chunk.finish_reason = candidate.finish_reason.as_deref().map(|reason| {
        if !chunk.tool_calls.is_empty() && reason == "STOP" {
            "tool_calls".to_string()
        } else {
            map_finish_reason(reason).to_string()
        }
    });
    chunk
}

/// Each SSE event is a complete `GenerateContentResponse`
#[derive(Debug, Default)]
struct GoogleStreamDecoder {
    tool_index: u32,
}

impl StreamDecoder for GoogleStreamDecoder {
    fn decode(&mut self, _event: Option<&str>, data: Value) -> DecodeOutcome {
        if let Some(error) = data.get("error") {
            let status = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(502);
            let body = json!({ "error": error }).to_string();
            return DecodeOutcome::Error(crate::adapter::upstream_error(
                "google-ai-studio",
                status,
                &body,
            ));
        }
        let response: GoogleResponse = match serde_json::from_value(data) {
            Ok(response) => response,
            Err(e) => {
                return DecodeOutcome::Error(GatewayError::streaming(format!(
                    "malformed event from google-ai-studio: {e}"
                )))
            }
        };
        if let Err(e) = check_prompt_blocked(&response) {
            return DecodeOutcome::Error(e);
        }
        let chunk = response_to_chunk(response, &mut self.tool_index);
        if chunk.is_empty() {
            DecodeOutcome::Chunks(Vec::new())
        } else {
            DecodeOutcome::Chunks(vec![chunk])
        }
    }
}

// Google API Types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRequest {
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GoogleGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GoogleTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GooglePart {
    Thought {
        text: String,
        thought: bool,
    },
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GoogleInlineData,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: GoogleFileData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GoogleFunctionCallData,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GoogleFunctionResponseData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleFileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoogleFunctionCallData {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoogleFunctionResponseData {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTool {
    function_declarations: Vec<GoogleFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GoogleFunctionDeclaration {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GooglePromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<GoogleUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    thoughts_token_count: u32,
    #[serde(default)]
    total_token_count: Option<u32>,
}
