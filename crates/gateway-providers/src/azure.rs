//! Azure OpenAI adapter.
//!
//! Requests are addressed by deployment, so the catalog's provider model
//! name is the deployment name and the host is derived from the `resource`
//! companion setting of the credential in use.

use gateway_core::{ChatCompletion, GatewayError, GatewayRequest, GatewayResult, ImageRef};
use serde_json::Value;

use crate::adapter::{HttpRequestSpec, ProviderAdapter, StreamDecoder, UpstreamTarget};
use crate::openai::{chat_body, parse_chat_response, take_choice_images, ChatChunkDecoder};

/// Default API version
pub const DEFAULT_API_VERSION: &str = "2024-10-21";

/// Companion setting naming the Azure resource
pub const RESOURCE_SETTING: &str = "resource";

/// Azure OpenAI adapter
#[derive(Debug, Clone)]
pub struct AzureOpenAIAdapter {
    api_version: String,
}

impl AzureOpenAIAdapter {
    /// Adapter using [`DEFAULT_API_VERSION`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Override the API version
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    fn endpoint(&self, target: &UpstreamTarget<'_>) -> GatewayResult<String> {
        let host = match target.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => {
                let resource = target
                    .settings
                    .get(RESOURCE_SETTING)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        GatewayError::configuration("Azure resource name is not configured")
                    })?;
                format!("https://{resource}.openai.azure.com")
            }
        };
        Ok(format!(
            "{host}/openai/deployments/{}/chat/completions?api-version={}",
            target.model_name, self.api_version
        ))
    }
}

impl Default for AzureOpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for AzureOpenAIAdapter {
    fn provider_id(&self) -> &str {
        "azure"
    }

    fn default_base_url(&self) -> Option<&str> {
        None
    }

    fn required_settings(&self) -> &'static [&'static str] {
        &[RESOURCE_SETTING]
    }

    fn build_request(
        &self,
        request: &GatewayRequest,
        target: &UpstreamTarget<'_>,
    ) -> GatewayResult<HttpRequestSpec> {
        let url = self.endpoint(target)?;
        let body = chat_body(request, None, target.stream)?;
        HttpRequestSpec::new("azure", url, body, target.stream).secret_header(
            "api-key",
            "",
            target.token,
        )
    }

    fn parse_response(&self, body: &[u8]) -> GatewayResult<ChatCompletion> {
        parse_chat_response(self, body)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ChatChunkDecoder::new("azure"))
    }

    fn extract_images(&self, payload: &mut Value) -> Vec<ImageRef> {
        take_choice_images(payload)
    }
}
