//! Persistence read contract.
//!
//! The gateway never writes to the metadata store. Records are plain data;
//! lookups return `None` when nothing matches.

use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::GatewayResult;

/// Active/inactive flag used by several records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Record is in effect
    #[default]
    Active,
    /// Record is ignored
    Inactive,
}

/// API key presented by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Key id
    pub id: String,
    /// Token presented in the `Authorization` header
    pub token: String,
    /// Owning project
    pub project_id: String,
    /// Status
    #[serde(default)]
    pub status: RecordStatus,
}

/// Project record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Project id
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Status
    #[serde(default)]
    pub status: RecordStatus,
}

/// Organization record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    /// Organization id
    pub id: String,
    /// Display name
    pub name: String,
}

/// Organization-owned provider credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKeyRecord {
    /// Record id
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Provider id
    pub provider: String,
    /// Comma-separated token list
    #[serde(skip_serializing)]
    pub token: SecretString,
    /// Optional base URL override
    #[serde(default)]
    pub base_url: Option<String>,
    /// Status
    #[serde(default)]
    pub status: RecordStatus,
}

/// Kind of an IAM rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IamRuleType {
    /// Only listed models are allowed
    AllowModels,
    /// Listed models are denied
    DenyModels,
    /// Only listed providers are allowed
    AllowProviders,
    /// Listed providers are denied
    DenyProviders,
    /// Only matching pricing is allowed
    AllowPricing,
    /// Matching pricing is denied
    DenyPricing,
}

impl IamRuleType {
    /// Whether the rule denies on match
    #[must_use]
    pub fn is_deny(self) -> bool {
        matches!(
            self,
            Self::DenyModels | Self::DenyProviders | Self::DenyPricing
        )
    }
}

/// Value of an IAM rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamRuleValue {
    /// Model ids for model rules
    #[serde(default)]
    pub models: Vec<String>,
    /// Provider ids for provider rules
    #[serde(default)]
    pub providers: Vec<String>,
    /// `free` or `paid` for pricing rules
    #[serde(default)]
    pub pricing_type: Option<String>,
    /// Input price ceiling per token
    #[serde(default)]
    pub max_input_price: Option<f64>,
    /// Output price ceiling per token
    #[serde(default)]
    pub max_output_price: Option<f64>,
}

/// Access rule attached to an API key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamRule {
    /// Rule id
    pub id: String,
    /// API key the rule belongs to
    pub api_key_id: String,
    /// Rule kind
    pub rule_type: IamRuleType,
    /// Rule payload
    #[serde(default)]
    pub rule_value: IamRuleValue,
    /// Status
    #[serde(default)]
    pub status: RecordStatus,
}

/// Serializable contents of an [`InMemoryMetadataStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    /// Gateway API keys
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
    /// Projects
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
    /// Organizations
    #[serde(default)]
    pub organizations: Vec<OrganizationRecord>,
    /// Organization-owned provider keys
    #[serde(default)]
    pub provider_keys: Vec<ProviderKeyRecord>,
    /// IAM rules
    #[serde(default)]
    pub iam_rules: Vec<IamRule>,
}

/// Read-only metadata lookups consumed by the gateway
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Find an API key by the token presented by the caller
    async fn find_api_key_by_token(&self, token: &str) -> GatewayResult<Option<ApiKeyRecord>>;

    /// Find a project
    async fn find_project_by_id(&self, id: &str) -> GatewayResult<Option<ProjectRecord>>;

    /// Find an organization
    async fn find_organization_by_id(&self, id: &str) -> GatewayResult<Option<OrganizationRecord>>;

    /// Provider keys owned by an organization
    async fn find_provider_keys_by_org(&self, org_id: &str) -> GatewayResult<Vec<ProviderKeyRecord>>;

    /// IAM rules attached to an API key
    async fn find_iam_rules(&self, api_key_id: &str) -> GatewayResult<Vec<IamRule>>;
}

/// In-memory [`MetadataStore`], used by tests and single-tenant deployments
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    api_keys: RwLock<HashMap<String, ApiKeyRecord>>,
    projects: RwLock<HashMap<String, ProjectRecord>>,
    organizations: RwLock<HashMap<String, OrganizationRecord>>,
    provider_keys: RwLock<Vec<ProviderKeyRecord>>,
    iam_rules: RwLock<Vec<IamRule>>,
}

impl InMemoryMetadataStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an API key
    pub fn insert_api_key(&self, record: ApiKeyRecord) {
        self.api_keys.write().insert(record.token.clone(), record);
    }

    /// Insert a project
    pub fn insert_project(&self, record: ProjectRecord) {
        self.projects.write().insert(record.id.clone(), record);
    }

    /// Insert an organization
    pub fn insert_organization(&self, record: OrganizationRecord) {
        self.organizations.write().insert(record.id.clone(), record);
    }

    /// Insert a provider key
    pub fn insert_provider_key(&self, record: ProviderKeyRecord) {
        self.provider_keys.write().push(record);
    }

    /// Insert an IAM rule
    pub fn insert_iam_rule(&self, rule: IamRule) {
        self.iam_rules.write().push(rule);
    }

    /// Store holding every record of `snapshot`
    #[must_use]
    pub fn from_snapshot(snapshot: MetadataSnapshot) -> Self {
        let store = Self::new();
        snapshot.api_keys.into_iter().for_each(|r| store.insert_api_key(r));
        snapshot.projects.into_iter().for_each(|r| store.insert_project(r));
        snapshot
            .organizations
            .into_iter()
            .for_each(|r| store.insert_organization(r));
        snapshot
            .provider_keys
            .into_iter()
            .for_each(|r| store.insert_provider_key(r));
        snapshot.iam_rules.into_iter().for_each(|r| store.insert_iam_rule(r));
        store
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn find_api_key_by_token(&self, token: &str) -> GatewayResult<Option<ApiKeyRecord>> {
        Ok(self.api_keys.read().get(token).cloned())
    }

    async fn find_project_by_id(&self, id: &str) -> GatewayResult<Option<ProjectRecord>> {
        Ok(self.projects.read().get(id).cloned())
    }

    async fn find_organization_by_id(&self, id: &str) -> GatewayResult<Option<OrganizationRecord>> {
        Ok(self.organizations.read().get(id).cloned())
    }

    async fn find_provider_keys_by_org(&self, org_id: &str) -> GatewayResult<Vec<ProviderKeyRecord>> {
        Ok(self
            .provider_keys
            .read()
            .iter()
            .filter(|k| k.organization_id == org_id)
            .cloned()
            .collect())
    }

    async fn find_iam_rules(&self, api_key_id: &str) -> GatewayResult<Vec<IamRule>> {
        Ok(self
            .iam_rules
            .read()
            .iter()
            .filter(|r| r.api_key_id == api_key_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lookups() {
        let store = InMemoryMetadataStore::new();
        store.insert_api_key(ApiKeyRecord {
            id: "key_1".into(),
            token: "gw-token".into(),
            project_id: "proj_1".into(),
            status: RecordStatus::Active,
        });
        store.insert_iam_rule(IamRule {
            id: "rule_1".into(),
            api_key_id: "key_1".into(),
            rule_type: IamRuleType::DenyProviders,
            rule_value: IamRuleValue {
                providers: vec!["openai".into()],
                ..IamRuleValue::default()
            },
            status: RecordStatus::Active,
        });

        let key = store
            .find_api_key_by_token("gw-token")
            .await
            .expect("lookup")
            .expect("key exists");
        assert_eq!(key.id, "key_1");
        assert!(store.find_api_key_by_token("nope").await.expect("lookup").is_none());

        let rules = store.find_iam_rules("key_1").await.expect("lookup");
        assert_eq!(rules.len(), 1);
        assert!(rules[0].rule_type.is_deny());
        assert!(store.find_iam_rules("key_2").await.expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn test_from_snapshot() {
        let json = r#"{
            "api_keys": [{"id": "key_1", "token": "gw-token", "project_id": "proj_1"}],
            "projects": [{"id": "proj_1", "organization_id": "org_1"}],
            "organizations": [{"id": "org_1", "name": "Acme"}],
            "provider_keys": [
                {"id": "pk_1", "organization_id": "org_1", "provider": "openai", "token": "sk-a,sk-b"}
            ]
        }"#;
        let snapshot: MetadataSnapshot = serde_json::from_str(json).expect("snapshot");
        let store = InMemoryMetadataStore::from_snapshot(snapshot);

        let key = store
            .find_api_key_by_token("gw-token")
            .await
            .expect("lookup")
            .expect("key exists");
        assert_eq!(key.status, RecordStatus::Active);
        assert!(store.find_project_by_id("proj_1").await.expect("lookup").is_some());
        let keys = store.find_provider_keys_by_org("org_1").await.expect("lookup");
        assert_eq!(keys.len(), 1);
        assert!(store.find_iam_rules("key_1").await.expect("lookup").is_empty());
    }

    #[test]
    fn test_rule_deserialization() {
        let json = r#"{
            "id": "r1",
            "api_key_id": "k1",
            "rule_type": "allow_pricing",
            "rule_value": {"pricing_type": "free"}
        }"#;
        let rule: IamRule = serde_json::from_str(json).expect("deserialize");
        assert_eq!(rule.rule_type, IamRuleType::AllowPricing);
        assert_eq!(rule.status, RecordStatus::Active);
        assert_eq!(rule.rule_value.pricing_type.as_deref(), Some("free"));
    }
}
