//! Provider catalog resolver.
//!
//! The catalog is loaded once at startup and never mutated. Lookups are by
//! logical model id; mappings keep their declaration order, which is the
//! final tie-breaker of candidate ordering.

use chrono::{DateTime, Utc};
use gateway_core::{GatewayError, GatewayResult, ModelDefinition, ProviderMapping, StabilityLevel};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const BUILTIN_CATALOG: &str = include_str!("../catalog/models.json");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelDefinition>,
}

/// Immutable set of model definitions
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    models: Vec<ModelDefinition>,
    index: HashMap<String, usize>,
}

impl ProviderCatalog {
    /// Build a catalog; model ids must be unique
    pub fn new(models: Vec<ModelDefinition>) -> GatewayResult<Self> {
        let mut index = HashMap::with_capacity(models.len());
        for (i, model) in models.iter().enumerate() {
            if model.id.trim().is_empty() {
                return Err(GatewayError::configuration("catalog model with an empty id"));
            }
            if index.insert(model.id.clone(), i).is_some() {
                return Err(GatewayError::configuration(format!(
                    "duplicate catalog model id {}",
                    model.id
                )));
            }
        }
        Ok(Self { models, index })
    }

    /// Catalog shipped with the gateway
    pub fn builtin() -> GatewayResult<Self> {
        Self::parse("json", BUILTIN_CATALOG)
    }

    /// Load a catalog file; the format follows the extension
    pub async fn load(path: &Path) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::configuration(format!(
                "failed to read catalog {}: {e}",
                path.display()
            ))
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json");
        let catalog = Self::parse(ext, &content)?;
        info!(path = %path.display(), models = catalog.len(), "Loaded model catalog");
        Ok(catalog)
    }

    /// Parse catalog text in the given format (`json`, `yaml`/`yml`, `toml`)
    pub fn parse(format: &str, content: &str) -> GatewayResult<Self> {
        let file: CatalogFile = match format.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            "toml" => toml::from_str(content).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(content).map_err(|e| e.to_string()),
            other => Err(format!("unsupported catalog format {other}")),
        }
        .map_err(|e| GatewayError::configuration(format!("invalid catalog: {e}")))?;
        Self::new(file.models)
    }

    /// Look up a logical model
    pub fn resolve(&self, model_id: &str) -> GatewayResult<&ModelDefinition> {
        self.index
            .get(model_id)
            .map(|&i| &self.models[i])
            .ok_or_else(|| GatewayError::unknown_model(model_id))
    }

    /// All models in declaration order
    #[must_use]
    pub fn models(&self) -> &[ModelDefinition] {
        &self.models
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog has no models
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Mappings of `model` that may be selected right now
#[must_use]
pub fn active_mappings(model: &ModelDefinition) -> Vec<&ProviderMapping> {
    active_mappings_at(model, Utc::now())
}

/// Mappings of `model` whose deactivation time is not before `now`
#[must_use]
pub fn active_mappings_at(model: &ModelDefinition, now: DateTime<Utc>) -> Vec<&ProviderMapping> {
    model
        .providers
        .iter()
        .filter(|mapping| mapping.is_active_at(now))
        .collect()
}

/// A paid, stable-enough model with at least one mapping offering JSON
/// output, tool calls, streaming and cached-input pricing together
#[must_use]
pub fn is_coding_model(model: &ModelDefinition, now: DateTime<Utc>) -> bool {
    if model.free
        || matches!(
            model.stability,
            StabilityLevel::Unstable | StabilityLevel::Experimental
        )
    {
        return false;
    }
    active_mappings_at(model, now).into_iter().any(|mapping| {
        let caps = &mapping.capabilities;
        caps.json_output && caps.tools && caps.streaming && mapping.pricing.cached_input_price.is_some()
    })
}

/// Free flag set and no mapping charges a per-request price
#[must_use]
pub fn is_truly_free(model: &ModelDefinition) -> bool {
    model.free
        && model
            .providers
            .iter()
            .all(|mapping| mapping.pricing.request_price.map_or(true, |p| p == 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn model(id: &str, mappings: Vec<ProviderMapping>) -> ModelDefinition {
        ModelDefinition {
            id: id.to_string(),
            family: "test".to_string(),
            free: false,
            stability: StabilityLevel::Stable,
            output: vec![gateway_core::Modality::Text],
            providers: mappings,
        }
    }

    fn coding_mapping(provider: &str) -> ProviderMapping {
        let mut mapping = ProviderMapping::new(provider, "m");
        mapping.capabilities.tools = true;
        mapping.capabilities.json_output = true;
        mapping.pricing.input_price = 0.000_001;
        mapping.pricing.cached_input_price = Some(0.000_000_1);
        mapping
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = ProviderCatalog::builtin().expect("builtin catalog");
        assert!(!catalog.is_empty());
        let gpt = catalog.resolve("gpt-4o").expect("gpt-4o");
        assert_eq!(gpt.providers[0].provider_id, "openai");
        assert_eq!(gpt.providers[1].provider_id, "azure");
        assert!(is_coding_model(gpt, Utc::now()));
    }

    #[test]
    fn test_unknown_model() {
        let catalog = ProviderCatalog::builtin().expect("builtin catalog");
        let err = catalog.resolve("no-such-model").unwrap_err();
        assert!(matches!(err, GatewayError::UnknownModel { ref model } if model == "no-such-model"));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ProviderCatalog::new(vec![model("a", vec![]), model("a", vec![])]);
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[test]
    fn test_active_mappings_skip_deactivated() {
        let now = Utc::now();
        let mut gone = ProviderMapping::new("openai", "old");
        gone.deactivated_at = Some(now - Duration::hours(1));
        let mut later = ProviderMapping::new("azure", "soon-gone");
        later.deactivated_at = Some(now + Duration::hours(1));
        let m = model("x", vec![gone, later, ProviderMapping::new("anthropic", "y")]);

        let active: Vec<&str> = active_mappings_at(&m, now)
            .into_iter()
            .map(|mapping| mapping.provider_id.as_str())
            .collect();
        assert_eq!(active, vec!["azure", "anthropic"]);
    }

    #[test]
    fn test_is_coding_model() {
        let now = Utc::now();
        assert!(is_coding_model(&model("c", vec![coding_mapping("openai")]), now));

        let mut free = model("c", vec![coding_mapping("openai")]);
        free.free = true;
        assert!(!is_coding_model(&free, now));

        let mut experimental = model("c", vec![coding_mapping("openai")]);
        experimental.stability = StabilityLevel::Experimental;
        assert!(!is_coding_model(&experimental, now));

        let mut uncached = coding_mapping("openai");
        uncached.pricing.cached_input_price = None;
        assert!(!is_coding_model(&model("c", vec![uncached]), now));

        // Capabilities spread over two mappings do not count
        let mut tools_only = coding_mapping("openai");
        tools_only.capabilities.json_output = false;
        let mut json_only = coding_mapping("azure");
        json_only.capabilities.tools = false;
        assert!(!is_coding_model(&model("c", vec![tools_only, json_only]), now));

        let mut deactivated = coding_mapping("openai");
        deactivated.deactivated_at = Some(now - Duration::minutes(1));
        assert!(!is_coding_model(&model("c", vec![deactivated]), now));
    }

    #[test]
    fn test_is_truly_free() {
        let mut m = model("f", vec![ProviderMapping::new("google-ai-studio", "g")]);
        assert!(!is_truly_free(&m));
        m.free = true;
        assert!(is_truly_free(&m));

        let mut charged = ProviderMapping::new("openai", "h");
        charged.pricing.request_price = Some(0.01);
        m.providers.push(charged);
        assert!(!is_truly_free(&m));
    }

    #[test]
    fn test_parse_yaml_catalog() {
        let yaml = r"
models:
  - id: local-llama
    family: llama
    providers:
      - providerId: ollama
        modelName: llama3.1
        inputPrice: 0.0
        outputPrice: 0.0
        streaming: true
";
        let catalog = ProviderCatalog::parse("yaml", yaml).expect("yaml catalog");
        let m = catalog.resolve("local-llama").expect("model");
        assert_eq!(m.providers[0].model_name, "llama3.1");
        assert!(m.providers[0].capabilities.streaming);
    }

    #[test]
    fn test_unsupported_format() {
        assert!(ProviderCatalog::parse("ini", "").is_err());
    }
}
