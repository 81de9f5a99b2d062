//! Request types for the gateway.
//!
//! The inbound request follows the OpenAI chat/completions shape. The router
//! only looks at the parts that influence candidate selection: the model
//! selector, an optional provider pin and the capabilities the request needs.

use crate::error::GatewayError;
use crate::types::RequestId;
use serde::{Deserialize, Serialize};

/// Provider-agnostic chat/completions request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// Unique request identifier
    #[serde(default = "RequestId::generate", skip_serializing)]
    pub id: RequestId,

    /// Logical model id, optionally prefixed with a provider (`"anthropic/claude-3-5-sonnet"`)
    pub model: String,

    /// Chat messages for conversation
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature (0.0 - 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p (nucleus sampling) parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Enable streaming response
    #[serde(default)]
    pub stream: bool,

    /// Tool/function definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,

    /// Response format configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Reasoning effort hint (`low`, `medium`, `high`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Seed for deterministic generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// User identifier for abuse tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Restrict routing to a single provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl GatewayRequest {
    /// Create a new builder for `GatewayRequest`
    #[must_use]
    pub fn builder() -> GatewayRequestBuilder {
        GatewayRequestBuilder::default()
    }

    /// Split the model field into model id and provider pin.
    ///
    /// An explicit `provider` field wins over a prefix in `model`.
    #[must_use]
    pub fn selector(&self) -> ModelSelector {
        let mut selector = ModelSelector::parse(&self.model);
        if let Some(provider) = self.provider.as_deref().filter(|p| !p.is_empty()) {
            selector.provider = Some(provider.to_string());
        }
        selector
    }

    /// Capabilities the serving mapping must offer
    #[must_use]
    pub fn requirements(&self) -> RequestRequirements {
        let format = self.response_format.as_ref().map(|f| f.format_type.as_str());
        RequestRequirements {
            streaming: self.stream,
            vision: self.messages.iter().any(ChatMessage::has_image),
            json_output: format == Some("json_object"),
            json_schema: format == Some("json_schema"),
            tools: self.tools.as_ref().is_some_and(|t| !t.is_empty()),
            reasoning: self.reasoning_effort.is_some(),
        }
    }

    /// Validate the request
    ///
    /// # Errors
    /// Returns error if any field is invalid
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation(
                "model is required",
                Some("model".to_string()),
                "missing_model",
            ));
        }

        if self.messages.is_empty() {
            return Err(GatewayError::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::validation(
                    format!("temperature must be between 0.0 and 2.0, got {t}"),
                    Some("temperature".to_string()),
                    "invalid_temperature",
                ));
            }
        }

        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(GatewayError::validation(
                    format!("top_p must be between 0.0 and 1.0, got {p}"),
                    Some("top_p".to_string()),
                    "invalid_top_p",
                ));
            }
        }

        if self.max_tokens == Some(0) {
            return Err(GatewayError::validation(
                "max_tokens must be greater than 0",
                Some("max_tokens".to_string()),
                "invalid_max_tokens",
            ));
        }

        Ok(())
    }
}

/// Parsed model selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelector {
    /// Logical model id
    pub model: String,
    /// Provider pin, when the caller asked for a specific provider
    pub provider: Option<String>,
}

impl ModelSelector {
    /// Parse `"model"` or `"provider/model"`.
    ///
    /// Only the first `/` separates the provider, so upstream names such as
    /// `"openrouter/meta-llama/llama-3"` keep their inner slashes.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Self {
                model: model.to_string(),
                provider: Some(provider.to_string()),
            },
            _ => Self {
                model: raw.to_string(),
                provider: None,
            },
        }
    }
}

/// Capability requirements derived from a request
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestRequirements {
    /// Caller asked for a stream
    pub streaming: bool,
    /// A message carries an image part
    pub vision: bool,
    /// `response_format` is `json_object`
    pub json_output: bool,
    /// `response_format` is `json_schema`
    pub json_schema: bool,
    /// Tools are declared
    pub tools: bool,
    /// Reasoning effort was requested
    pub reasoning: bool,
}

/// Builder for `GatewayRequest`
#[derive(Debug, Default)]
pub struct GatewayRequestBuilder {
    id: Option<RequestId>,
    model: Option<String>,
    messages: Vec<ChatMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    stream: bool,
    tools: Option<Vec<ToolDefinition>>,
    response_format: Option<ResponseFormat>,
    reasoning_effort: Option<String>,
    provider: Option<String>,
}

impl GatewayRequestBuilder {
    /// Set the request ID
    #[must_use]
    pub fn id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add a message
    #[must_use]
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max_tokens
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enable streaming
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set tools
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set response_format
    #[must_use]
    pub fn response_format(mut self, format_type: impl Into<String>) -> Self {
        self.response_format = Some(ResponseFormat {
            format_type: format_type.into(),
            json_schema: None,
        });
        self
    }

    /// Set reasoning effort
    #[must_use]
    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    /// Pin the provider
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Build the request
    ///
    /// # Errors
    /// Returns error if required fields are missing
    pub fn build(self) -> Result<GatewayRequest, GatewayError> {
        let model = self.model.ok_or_else(|| {
            GatewayError::validation("model is required", Some("model".to_string()), "missing_model")
        })?;

        let request = GatewayRequest {
            id: self.id.unwrap_or_else(RequestId::generate),
            model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: None,
            stop: None,
            stream: self.stream,
            tools: self.tools,
            tool_choice: None,
            response_format: self.response_format,
            reasoning_effort: self.reasoning_effort,
            seed: None,
            user: None,
            provider: self.provider,
        };

        request.validate()?;

        Ok(request)
    }
}

/// Chat message with role and content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author
    pub role: MessageRole,

    /// Content of the message
    #[serde(default)]
    pub content: MessageContent,

    /// Optional name of the author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call ID for tool response messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_text(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_text(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_text(MessageRole::Assistant, content)
    }

    /// Create a user message with text and an image
    #[must_use]
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                        detail: None,
                    },
                },
            ]),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Whether the message carries an image part
    #[must_use]
    pub fn has_image(&self) -> bool {
        match &self.content {
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
            MessageContent::Text(_) => false,
        }
    }

    /// Concatenated text of the message
    #[must_use]
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool response message
    Tool,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Message content (text or multimodal parts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Multimodal content parts
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Content part for multimodal messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content part
    Text {
        /// The text content
        text: String,
    },
    /// Image content part
    ImageUrl {
        /// Image URL details
        image_url: ImageUrl,
    },
}

/// Image URL for vision models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// URL of the image (http(s) or `data:` URL)
    pub url: String,
    /// Detail level for processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tool/function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (currently only "function" is supported)
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters (JSON Schema)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool call made by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool type
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function call details
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Function arguments as JSON string
    pub arguments: String,
}

/// Response format configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// Format type: `text`, `json_object` or `json_schema`
    #[serde(rename = "type")]
    pub format_type: String,
    /// Schema for `json_schema`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<serde_json::Value>,
}
