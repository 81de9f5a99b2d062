//! Metadata lookups fronted by stale-while-revalidate caches.

use gateway_config::CacheSettings;
use gateway_core::{
    ApiKeyRecord, CallerContext, GatewayError, GatewayResult, IamRule, MetadataStore,
    OrganizationRecord, ProjectRecord, ProviderKeyRecord, RecordStatus,
};
use gateway_resilience::{SwrCache, SwrCacheStats, SwrOptions};
use std::sync::Arc;
use tracing::debug;

/// Cached read access to the metadata store
pub struct CachedMetadata {
    store: Arc<dyn MetadataStore>,
    api_keys: SwrCache<ApiKeyRecord>,
    projects: SwrCache<ProjectRecord>,
    organizations: SwrCache<OrganizationRecord>,
    provider_keys: SwrCache<Vec<ProviderKeyRecord>>,
    iam_rules: SwrCache<Vec<IamRule>>,
}

impl std::fmt::Debug for CachedMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedMetadata")
            .field("api_keys", &self.api_keys.len())
            .field("iam_rules", &self.iam_rules.len())
            .finish_non_exhaustive()
    }
}

impl CachedMetadata {
    /// Wrap a store with the given freshness windows
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, settings: &CacheSettings) -> Self {
        let options = SwrOptions {
            stale_time: settings.stale_time,
            max_age: settings.max_age,
            negative_max_age: settings.negative_max_age,
        };
        let prefix = &settings.key_prefix;
        Self {
            store,
            api_keys: SwrCache::new(format!("{prefix}:api_key"), options),
            projects: SwrCache::new(format!("{prefix}:project"), options),
            organizations: SwrCache::new(format!("{prefix}:organization"), options),
            provider_keys: SwrCache::new(format!("{prefix}:provider_keys"), options),
            iam_rules: SwrCache::new(format!("{prefix}:iam_rules"), options),
        }
    }

    /// API key presented by a caller
    pub async fn api_key(&self, token: &str) -> GatewayResult<Option<ApiKeyRecord>> {
        let store = Arc::clone(&self.store);
        let owned = token.to_string();
        self.api_keys
            .get(token, move || async move { store.find_api_key_by_token(&owned).await })
            .await
    }

    /// Project by id
    pub async fn project(&self, id: &str) -> GatewayResult<Option<ProjectRecord>> {
        let store = Arc::clone(&self.store);
        let owned = id.to_string();
        self.projects
            .get(id, move || async move { store.find_project_by_id(&owned).await })
            .await
    }

    /// Organization by id
    pub async fn organization(&self, id: &str) -> GatewayResult<Option<OrganizationRecord>> {
        let store = Arc::clone(&self.store);
        let owned = id.to_string();
        self.organizations
            .get(id, move || async move { store.find_organization_by_id(&owned).await })
            .await
    }

    /// Provider keys of an organization; an empty list is cached as negative
    pub async fn provider_keys(&self, org_id: &str) -> GatewayResult<Vec<ProviderKeyRecord>> {
        let store = Arc::clone(&self.store);
        let owned = org_id.to_string();
        let keys = self
            .provider_keys
            .get(org_id, move || async move {
                let keys = store.find_provider_keys_by_org(&owned).await?;
                Ok((!keys.is_empty()).then_some(keys))
            })
            .await?;
        Ok(keys.unwrap_or_default())
    }

    /// Active provider key of an organization for one provider
    pub async fn provider_key(
        &self,
        org_id: &str,
        provider: &str,
    ) -> GatewayResult<Option<ProviderKeyRecord>> {
        Ok(self
            .provider_keys(org_id)
            .await?
            .into_iter()
            .find(|key| key.provider == provider && key.status == RecordStatus::Active))
    }

    /// IAM rules attached to an API key
    pub async fn iam_rules(&self, api_key_id: &str) -> GatewayResult<Vec<IamRule>> {
        let store = Arc::clone(&self.store);
        let owned = api_key_id.to_string();
        let rules = self
            .iam_rules
            .get(api_key_id, move || async move {
                let rules = store.find_iam_rules(&owned).await?;
                Ok((!rules.is_empty()).then_some(rules))
            })
            .await?;
        Ok(rules.unwrap_or_default())
    }

    /// Resolve a presented token to the calling key, project and organization
    pub async fn authenticate(&self, token: &str) -> GatewayResult<CallerContext> {
        let key = self
            .api_key(token)
            .await?
            .filter(|key| key.status == RecordStatus::Active)
            .ok_or_else(|| GatewayError::unauthorized("invalid or inactive API key"))?;

        let project = self
            .project(&key.project_id)
            .await?
            .filter(|project| project.status == RecordStatus::Active)
            .ok_or_else(|| GatewayError::unauthorized("API key belongs to an inactive project"))?;

        if self.organization(&project.organization_id).await?.is_none() {
            return Err(GatewayError::unauthorized(
                "API key belongs to an unknown organization",
            ));
        }

        debug!(api_key_id = %key.id, project_id = %project.id, "Authenticated caller");
        Ok(CallerContext {
            api_key_id: key.id,
            project_id: project.id,
            organization_id: project.organization_id,
        })
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.api_keys.clear();
        self.projects.clear();
        self.organizations.clear();
        self.provider_keys.clear();
        self.iam_rules.clear();
    }

    /// Statistics of the IAM rule cache, the hottest one per request
    #[must_use]
    pub fn iam_rule_stats(&self) -> SwrCacheStats {
        self.iam_rules.stats()
    }
}
