//! Router fixtures and sample data for integration tests

use std::sync::Arc;

use gateway_config::{CacheSettings, ProviderSettings, StaticSecretSource};
use gateway_core::{
    ApiKeyRecord, CallerContext, ChatMessage, GatewayRequest, InMemoryMetadataStore,
    MetadataStore, ModelDefinition, OrganizationRecord, ProjectRecord, ProviderMapping,
    RecordStatus, StabilityLevel,
};
use gateway_providers::{OpenAIAdapter, ProviderRegistry, UpstreamTransport};
use gateway_resilience::{CredentialResolver, CredentialRotator, KeyHealthTracker};
use gateway_routing::{CachedMetadata, ProviderCatalog, Router, RouterConfig};
use gateway_server::AppState;
use serde_json::{json, Value};

use crate::mock_transport::MockTransport;

/// Gateway API token seeded by [`TestGatewayBuilder::build`]
pub const TEST_TOKEN: &str = "gw-test-token";
/// API key id behind [`TEST_TOKEN`]
pub const TEST_API_KEY_ID: &str = "key-test";

/// Secret name holding the upstream keys of `provider`
pub fn secret_name(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Text model served by `providers` in declaration order, with the given input prices
pub fn text_model(id: &str, providers: &[(&str, f64)]) -> ModelDefinition {
    ModelDefinition {
        id: id.to_string(),
        family: "test".to_string(),
        free: false,
        stability: StabilityLevel::Stable,
        output: vec![],
        providers: providers
            .iter()
            .map(|(provider, price)| {
                let mut mapping = ProviderMapping::new(*provider, format!("{id}-upstream"));
                mapping.pricing.input_price = *price;
                mapping.pricing.output_price = *price;
                mapping
            })
            .collect(),
    }
}

/// Caller matching the seeded tenant
pub fn test_caller() -> CallerContext {
    CallerContext {
        api_key_id: TEST_API_KEY_ID.to_string(),
        project_id: "proj-test".to_string(),
        organization_id: "org-test".to_string(),
    }
}

/// Single-message chat request
pub fn chat_request(model: &str, stream: bool) -> GatewayRequest {
    GatewayRequest::builder()
        .model(model)
        .message(ChatMessage::user("Hello, how are you?"))
        .stream(stream)
        .build()
        .expect("Failed to build request")
}

/// Upstream chat completion body
pub fn completion_body(content: &str) -> Value {
    json!({
        "id": "upstream-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
    })
}

/// Upstream streaming delta
pub fn content_delta(content: &str) -> Value {
    json!({"choices": [{"index": 0, "delta": {"content": content}}]})
}

/// Upstream delta carrying only the assistant role
pub fn role_delta() -> Value {
    json!({"choices": [{"index": 0, "delta": {"role": "assistant"}}]})
}

/// A router wired to a [`MockTransport`]
pub struct TestGateway {
    /// Router under test
    pub router: Arc<Router>,
    /// Scripted upstream
    pub transport: Arc<MockTransport>,
    /// Metadata backing the router's cache
    pub store: Arc<InMemoryMetadataStore>,
    /// Shared key health
    pub health: Arc<KeyHealthTracker>,
}

impl TestGateway {
    /// Start building a gateway
    pub fn builder() -> TestGatewayBuilder {
        TestGatewayBuilder::default()
    }

    /// HTTP application over the same router
    pub fn app(&self) -> axum::Router {
        gateway_server::create_router(AppState::new(Arc::clone(&self.router)))
    }
}

/// Builder for [`TestGateway`]
#[derive(Default)]
pub struct TestGatewayBuilder {
    models: Vec<ModelDefinition>,
    providers: Vec<(String, String)>,
    config: Option<RouterConfig>,
    upstream: Option<Arc<dyn UpstreamTransport>>,
}

impl TestGatewayBuilder {
    /// Register an OpenAI-compatible provider with one upstream key
    #[must_use]
    pub fn provider(self, id: &str) -> Self {
        let base_url = format!("http://{id}.test/v1");
        self.provider_at(id, base_url)
    }

    /// Register an OpenAI-compatible provider served at `base_url`
    #[must_use]
    pub fn provider_at(mut self, id: &str, base_url: impl Into<String>) -> Self {
        self.providers.push((id.to_string(), base_url.into()));
        self
    }

    /// Send upstream calls through `transport` instead of the scripted mock
    #[must_use]
    pub fn upstream(mut self, transport: Arc<dyn UpstreamTransport>) -> Self {
        self.upstream = Some(transport);
        self
    }

    /// Add a model to the catalog
    #[must_use]
    pub fn model(mut self, model: ModelDefinition) -> Self {
        self.models.push(model);
        self
    }

    /// Override the fallback loop settings
    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the router and seed one active tenant
    pub fn build(self) -> TestGateway {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        seed_tenant(&store);

        let mut registry = ProviderRegistry::new();
        let mut secrets = StaticSecretSource::new();
        let mut settings = Vec::new();
        for (id, base_url) in &self.providers {
            registry.register(Arc::new(OpenAIAdapter::compatible(
                id.as_str(),
                base_url.as_str(),
            )));
            secrets = secrets.with(secret_name(id), format!("sk-{id}"));
            settings.push(ProviderSettings::new(id.as_str(), secret_name(id)));
        }

        let health = Arc::new(KeyHealthTracker::with_defaults());
        let credentials = Arc::new(CredentialResolver::new(
            Arc::new(secrets),
            Arc::new(CredentialRotator::new()),
            Arc::clone(&health),
        ));
        let metadata = Arc::new(CachedMetadata::new(
            Arc::clone(&store) as Arc<dyn MetadataStore>,
            &CacheSettings::default(),
        ));

        let router = Router::builder()
            .catalog(Arc::new(
                ProviderCatalog::new(self.models).expect("Failed to build catalog"),
            ))
            .registry(registry)
            .transport(
                self.upstream
                    .unwrap_or_else(|| Arc::clone(&transport) as Arc<dyn UpstreamTransport>),
            )
            .credentials(credentials)
            .metadata(metadata)
            .providers(settings)
            .config(self.config.unwrap_or_default())
            .build()
            .expect("Failed to build router");

        TestGateway {
            router: Arc::new(router),
            transport,
            store,
            health,
        }
    }
}

fn seed_tenant(store: &InMemoryMetadataStore) {
    let caller = test_caller();
    store.insert_api_key(ApiKeyRecord {
        id: caller.api_key_id,
        token: TEST_TOKEN.to_string(),
        project_id: caller.project_id.clone(),
        status: RecordStatus::Active,
    });
    store.insert_project(ProjectRecord {
        id: caller.project_id,
        organization_id: caller.organization_id.clone(),
        status: RecordStatus::Active,
    });
    store.insert_organization(OrganizationRecord {
        id: caller.organization_id,
        name: "Test Org".to_string(),
    });
}
