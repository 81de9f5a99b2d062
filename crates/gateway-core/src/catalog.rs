//! Model catalog data model.
//!
//! A [`ModelDefinition`] is a logical model id served by one or more
//! [`ProviderMapping`]s. Catalog data is immutable once loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maturity of a model or a provider mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityLevel {
    /// Generally available
    #[default]
    Stable,
    /// Preview
    Beta,
    /// Known to misbehave
    Unstable,
    /// Research preview
    Experimental,
}

impl StabilityLevel {
    /// Ordering rank, lower is preferred. Unstable and experimental tie.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Stable => 0,
            Self::Beta => 1,
            Self::Unstable | Self::Experimental => 2,
        }
    }
}

/// Output modality of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text output
    Text,
    /// Image output
    Image,
}

/// Capability flags of a provider mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelCapabilities {
    /// Supports SSE streaming
    pub streaming: bool,
    /// Accepts image input
    pub vision: bool,
    /// Supports reasoning effort
    pub reasoning: bool,
    /// Supports tool calls
    pub tools: bool,
    /// Supports `json_object` response format
    pub json_output: bool,
    /// Supports `json_schema` response format
    pub json_output_schema: bool,
    /// Supports web search
    pub web_search: bool,
}

/// Prices in USD per token (or per image / request)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderPricing {
    /// Price per input token
    pub input_price: f64,
    /// Price per output token
    pub output_price: f64,
    /// Price per cached input token, when the mapping supports caching
    pub cached_input_price: Option<f64>,
    /// Price per input image
    pub image_input_price: Option<f64>,
    /// Flat price per request
    pub request_price: Option<f64>,
}

impl ProviderPricing {
    /// Whether the mapping charges nothing for any dimension
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.input_price == 0.0
            && self.output_price == 0.0
            && self.request_price.unwrap_or(0.0) == 0.0
    }
}

/// A concrete (provider, upstream model) pair serving a logical model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMapping {
    /// Provider id (`openai`, `anthropic`, ...)
    pub provider_id: String,
    /// Model name sent upstream
    pub model_name: String,
    /// Prices
    #[serde(flatten)]
    pub pricing: ProviderPricing,
    /// Context window in tokens
    #[serde(default)]
    pub context_size: Option<u32>,
    /// Maximum output tokens
    #[serde(default)]
    pub max_output: Option<u32>,
    /// Capability flags
    #[serde(flatten)]
    pub capabilities: ModelCapabilities,
    /// Mapping-level stability, falls back to the model's
    #[serde(default)]
    pub stability: Option<StabilityLevel>,
    /// After this instant the mapping is never selected
    #[serde(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Informational deprecation date
    #[serde(default)]
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl ProviderMapping {
    /// Create a mapping with default capabilities and zero pricing
    #[must_use]
    pub fn new(provider_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_name: model_name.into(),
            pricing: ProviderPricing::default(),
            context_size: None,
            max_output: None,
            capabilities: ModelCapabilities {
                streaming: true,
                ..ModelCapabilities::default()
            },
            stability: None,
            deactivated_at: None,
            deprecated_at: None,
        }
    }

    /// Whether the mapping may be selected at `now`
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.deactivated_at.map_or(true, |at| at > now)
    }
}

/// A logical model and the mappings that serve it, in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    /// Logical model id
    pub id: String,
    /// Model family (`openai`, `claude`, ...)
    pub family: String,
    /// Free model flag
    #[serde(default)]
    pub free: bool,
    /// Model-level stability
    #[serde(default)]
    pub stability: StabilityLevel,
    /// Output modalities
    #[serde(default = "default_output")]
    pub output: Vec<Modality>,
    /// Provider mappings in declaration order
    pub providers: Vec<ProviderMapping>,
}

fn default_output() -> Vec<Modality> {
    vec![Modality::Text]
}

impl ModelDefinition {
    /// Effective stability of a mapping of this model
    #[must_use]
    pub fn mapping_stability(&self, mapping: &ProviderMapping) -> StabilityLevel {
        mapping.stability.unwrap_or(self.stability)
    }
}
