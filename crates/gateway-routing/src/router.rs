//! Candidate selection and the per-request fallback loop.
//!
//! For each request the router resolves the model, orders its active
//! mappings and walks them until one succeeds:
//!
//! 1. IAM, credential and precondition checks run before dispatch. A failure
//!    skips the candidate without counting as an attempt.
//! 2. The upstream call runs under the attempt timeout. Transient failures
//!    (`upstream_error` class and timeouts) move on to the next candidate;
//!    every other failure is returned as is.
//! 3. Streams commit to a candidate once the first body chunk arrives.
//!    Failures after that point are reported inside the stream.
//!
//! Every dispatched attempt reports its outcome to the key health tracker.
//! For a committed stream that happens when its last frame is produced.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use gateway_config::{ProviderSettings, RoutingSettings};
use gateway_core::{
    describe_error_chain, CallerContext, GatewayError, GatewayRequest, GatewayResult, Guardrails,
    NoopGuardrails, ProviderMapping,
};
use gateway_providers::{
    ByteStream, HttpRequestSpec, ProviderAdapter, ProviderRegistry, UpstreamResponse,
    UpstreamTarget, UpstreamTransport,
};
use gateway_resilience::{CredentialResolver, KeyHealthTracker, ResolvedCredential};
use gateway_streaming::{ReframedStream, Reframer, StreamSummary};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::catalog::ProviderCatalog;
use crate::iam::IamEvaluator;
use crate::metadata::CachedMetadata;
use crate::selector::{Candidate, CandidateQueue};

/// Fallback loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Timeout of one upstream attempt (until headers for streams)
    pub attempt_timeout: Duration,
    /// Time allowed between stream headers and the first body chunk
    pub first_byte_timeout: Duration,
    /// Maximum silence between two stream chunks
    pub stream_idle_timeout: Duration,
    /// Maximum dispatched attempts, 0 for no limit
    pub max_attempts: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from(&RoutingSettings::default())
    }
}

impl From<&RoutingSettings> for RouterConfig {
    fn from(settings: &RoutingSettings) -> Self {
        Self {
            attempt_timeout: settings.attempt_timeout,
            first_byte_timeout: settings.first_byte_timeout,
            stream_idle_timeout: settings.stream_idle_timeout,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Where a request was served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Provider that served the request
    pub provider: String,
    /// Logical model id
    pub model: String,
    /// Model name sent upstream
    pub upstream_model: String,
    /// Dispatched attempts including the successful one
    pub attempts: usize,
}

/// Successful routing result
pub enum RouteOutcome {
    /// Buffered `chat.completion` body
    Completion {
        /// Serving candidate
        info: RouteInfo,
        /// OpenAI-shaped response body
        body: Value,
        /// Usage accounting
        summary: StreamSummary,
    },
    /// Re-framed SSE stream
    Stream {
        /// Serving candidate
        info: RouteInfo,
        /// Outgoing frames and their summary
        stream: ReframedStream,
    },
}

impl RouteOutcome {
    /// Serving candidate
    #[must_use]
    pub fn info(&self) -> &RouteInfo {
        match self {
            Self::Completion { info, .. } | Self::Stream { info, .. } => info,
        }
    }
}

impl fmt::Debug for RouteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completion { info, summary, .. } => f
                .debug_struct("Completion")
                .field("info", info)
                .field("summary", summary)
                .finish_non_exhaustive(),
            Self::Stream { info, .. } => f
                .debug_struct("Stream")
                .field("info", info)
                .finish_non_exhaustive(),
        }
    }
}

/// A candidate that passed every pre-dispatch check
struct PreparedAttempt {
    adapter: Arc<dyn ProviderAdapter>,
    credential: ResolvedCredential,
    spec: HttpRequestSpec,
}

/// Adaptive request router
pub struct Router {
    catalog: Arc<ProviderCatalog>,
    registry: ProviderRegistry,
    transport: Arc<dyn UpstreamTransport>,
    credentials: Arc<CredentialResolver>,
    metadata: Arc<CachedMetadata>,
    iam: IamEvaluator,
    guardrails: Arc<dyn Guardrails>,
    providers: HashMap<String, ProviderSettings>,
    config: RouterConfig,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("models", &self.catalog.len())
            .field("adapters", &self.registry.ids())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Model catalog
    #[must_use]
    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Cached metadata, also used for caller authentication
    #[must_use]
    pub fn metadata(&self) -> &Arc<CachedMetadata> {
        &self.metadata
    }

    /// Process-wide key health
    #[must_use]
    pub fn key_health(&self) -> &Arc<KeyHealthTracker> {
        self.credentials.health()
    }

    /// Loop configuration
    #[must_use]
    pub fn config(&self) -> RouterConfig {
        self.config
    }

    /// Route a request on behalf of `caller`
    #[instrument(skip_all, fields(request_id = %request.id, model = %request.model, stream = request.stream))]
    pub async fn route(
        &self,
        mut request: GatewayRequest,
        caller: &CallerContext,
    ) -> GatewayResult<RouteOutcome> {
        request.validate()?;

        let guardrail = self.guardrails.check(&request.messages).await?;
        if guardrail.blocked {
            info!(violations = ?guardrail.violations, "Request blocked by guardrails");
            return Err(GatewayError::GuardrailBlocked {
                violations: guardrail.violations,
            });
        }
        guardrail.apply_redactions(&mut request.messages);

        let selector = request.selector();
        let model = self.catalog.resolve(&selector.model)?;
        let now = Utc::now();
        let mappings: Vec<(usize, &ProviderMapping)> = model
            .providers
            .iter()
            .enumerate()
            .filter(|(_, mapping)| mapping.is_active_at(now))
            .filter(|(_, mapping)| {
                selector
                    .provider
                    .as_deref()
                    .map_or(true, |pinned| mapping.provider_id == pinned)
            })
            .collect();
        if mappings.is_empty() {
            return Err(GatewayError::NoCandidates {
                model: model.id.clone(),
                provider: selector.provider,
            });
        }

        let mut queue = CandidateQueue::new(model, mappings, request.requirements());
        let mut attempted = 0usize;
        let mut last_attempt_error: Option<GatewayError> = None;
        let mut last_skip_error: Option<GatewayError> = None;

        while let Some(candidate) = queue.next_candidate() {
            if self.config.max_attempts > 0 && attempted >= self.config.max_attempts {
                debug!(max_attempts = self.config.max_attempts, "Attempt limit reached");
                break;
            }

            let prepared = match self.prepare(&request, caller, &candidate).await {
                Ok(prepared) => prepared,
                Err(err) if err.is_candidate_scoped() => {
                    debug!(
                        provider = %candidate.provider(),
                        upstream_model = %candidate.mapping.model_name,
                        error = %err,
                        "Skipping candidate"
                    );
                    queue.record_failure(candidate.provider());
                    last_skip_error = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            attempted += 1;
            let secret = prepared.credential.secret_name.clone();
            let key_index = prepared.credential.index;
            debug!(
                provider = %candidate.provider(),
                upstream_model = %candidate.mapping.model_name,
                secret = %secret,
                key_index,
                attempt = attempted,
                "Dispatching upstream"
            );

            match self.dispatch(&request, &candidate, prepared, attempted).await {
                Ok(outcome) => {
                    // Streams report once their last frame is out
                    if matches!(outcome, RouteOutcome::Completion { .. }) {
                        self.key_health().report_success(&secret, key_index);
                    }
                    info!(
                        provider = %candidate.provider(),
                        upstream_model = %candidate.mapping.model_name,
                        attempts = attempted,
                        "Request routed"
                    );
                    return Ok(outcome);
                }
                Err(err) => {
                    self.key_health()
                        .report_error(&secret, key_index, err.upstream_status());
                    if !err.is_fallback_eligible() {
                        warn!(
                            provider = %candidate.provider(),
                            class = %err.class(),
                            error = %describe_error_chain(&err),
                            "Upstream failure is not retryable"
                        );
                        return Err(err);
                    }
                    warn!(
                        provider = %candidate.provider(),
                        attempt = attempted,
                        class = %err.class(),
                        error = %describe_error_chain(&err),
                        "Upstream attempt failed, trying next candidate"
                    );
                    queue.record_failure(candidate.provider());
                    last_attempt_error = Some(err);
                }
            }
        }

        match (last_attempt_error, last_skip_error) {
            (Some(last), _) => Err(GatewayError::CandidatesExhausted {
                attempted,
                last: Box::new(last),
            }),
            (None, Some(skip)) => Err(skip),
            (None, None) => Err(GatewayError::NoCandidates {
                model: model.id.clone(),
                provider: selector.provider,
            }),
        }
    }

    /// Run every check that can rule out a candidate before dispatch
    async fn prepare(
        &self,
        request: &GatewayRequest,
        caller: &CallerContext,
        candidate: &Candidate<'_>,
    ) -> GatewayResult<PreparedAttempt> {
        let provider = candidate.provider();
        self.iam
            .validate_model_access(&caller.api_key_id, candidate.model, candidate.mapping)
            .await?;

        let adapter = self.registry.get(provider).ok_or_else(|| {
            GatewayError::configuration(format!("no adapter registered for provider {provider}"))
        })?;
        let settings = self.providers.get(provider);

        let (credential, base_url) = match self
            .metadata
            .provider_key(&caller.organization_id, provider)
            .await?
        {
            Some(key) => {
                let secret_name = format!("org:{}:{provider}", caller.organization_id);
                let credential = self
                    .credentials
                    .resolve_value(&secret_name, key.token.expose_secret())?;
                let base_url = key
                    .base_url
                    .clone()
                    .or_else(|| settings.and_then(|s| s.base_url.clone()));
                (credential, base_url)
            }
            None => {
                let settings = settings.ok_or_else(|| {
                    GatewayError::configuration(format!("provider {provider} is not configured"))
                })?;
                (
                    self.credentials.resolve(&settings.secret_name)?,
                    settings.base_url.clone(),
                )
            }
        };

        let companions = self.companion_settings(adapter.as_ref(), settings, credential.index)?;
        let target = UpstreamTarget {
            model_name: &candidate.mapping.model_name,
            base_url: base_url.as_deref(),
            token: &credential.token,
            settings: &companions,
            stream: request.stream && candidate.mapping.capabilities.streaming,
            max_output: candidate.mapping.max_output,
        };
        let spec = adapter.build_request(request, &target)?;

        Ok(PreparedAttempt {
            adapter,
            credential,
            spec,
        })
    }

    /// Resolve companion settings at the key index; required ones must exist
    fn companion_settings(
        &self,
        adapter: &dyn ProviderAdapter,
        settings: Option<&ProviderSettings>,
        index: usize,
    ) -> GatewayResult<HashMap<String, String>> {
        let mut resolved = HashMap::new();
        if let Some(settings) = settings {
            for (name, secret) in &settings.companion_settings {
                match self.credentials.companion(secret, index, None) {
                    Ok(value) => {
                        resolved.insert(name.clone(), value);
                    }
                    Err(err) if adapter.required_settings().contains(&name.as_str()) => {
                        return Err(err)
                    }
                    Err(_) => {}
                }
            }
        }
        for required in adapter.required_settings() {
            if !resolved.contains_key(*required) {
                return Err(GatewayError::configuration(format!(
                    "provider {} requires the {required} setting",
                    adapter.provider_id()
                )));
            }
        }
        Ok(resolved)
    }

    async fn dispatch(
        &self,
        request: &GatewayRequest,
        candidate: &Candidate<'_>,
        prepared: PreparedAttempt,
        attempts: usize,
    ) -> GatewayResult<RouteOutcome> {
        let PreparedAttempt {
            adapter,
            credential,
            spec,
        } = prepared;
        let upstream_stream = spec.stream;
        let info = RouteInfo {
            provider: candidate.provider().to_string(),
            model: candidate.model.id.clone(),
            upstream_model: candidate.mapping.model_name.clone(),
            attempts,
        };

        // A committed stream's outcome is known only after its last frame
        let health = Arc::clone(self.key_health());
        let provider = info.provider.clone();
        let reframer = Reframer::new(Arc::clone(&adapter), request.id.as_str(), &candidate.model.id)
            .on_complete(move |summary| match summary.error {
                Some(class) => {
                    debug!(
                        provider = %provider,
                        secret = %credential.secret_name,
                        key_index = credential.index,
                        class = %class,
                        "Stream ended with an error"
                    );
                    health.report_error(
                        &credential.secret_name,
                        credential.index,
                        summary.error_status,
                    );
                }
                None => health.report_success(&credential.secret_name, credential.index),
            });

        if upstream_stream {
            let response = self.send(adapter.as_ref(), spec).await?;
            let body = self.await_first_chunk(&info.provider, response).await?;
            let stream = reframer.into_sse_stream(body, self.config.stream_idle_timeout);
            return Ok(RouteOutcome::Stream { info, stream });
        }

        let timeout = self.config.attempt_timeout;
        let completion = tokio::time::timeout(timeout, async {
            let response = self.send(adapter.as_ref(), spec).await?;
            let body = response.bytes().await?;
            adapter.parse_response(&body)
        })
        .await
        .map_err(|_| GatewayError::timeout(info.provider.clone(), timeout))??;

        if request.stream {
            debug!(provider = %info.provider, "Synthesizing stream from buffered response");
            let stream = reframer.into_synthesized_stream(completion);
            return Ok(RouteOutcome::Stream { info, stream });
        }

        let summary = StreamSummary::from_completion(&completion);
        let body = completion.to_openai_json(
            request.id.as_str(),
            &candidate.model.id,
            Utc::now().timestamp(),
        );
        Ok(RouteOutcome::Completion {
            info,
            body,
            summary,
        })
    }

    /// Send and wait for response headers; non-2xx becomes a classified error
    async fn send(
        &self,
        adapter: &dyn ProviderAdapter,
        spec: HttpRequestSpec,
    ) -> GatewayResult<UpstreamResponse> {
        let provider = spec.provider.clone();
        let timeout = self.config.attempt_timeout;
        tokio::time::timeout(timeout, async {
            let response = self.transport.send(spec).await?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(response.into_error(adapter).await)
            }
        })
        .await
        .map_err(|_| GatewayError::timeout(provider, timeout))?
    }

    /// Wait for the first body chunk; only then is the candidate committed
    async fn await_first_chunk(
        &self,
        provider: &str,
        response: UpstreamResponse,
    ) -> GatewayResult<ByteStream> {
        let mut body = response.body;
        let timeout = self.config.first_byte_timeout;
        match tokio::time::timeout(timeout, body.next()).await {
            Err(_) => Err(GatewayError::timeout(provider, timeout)),
            Ok(Some(Err(err))) => Err(err),
            Ok(Some(Ok(first))) => Ok(stream::once(async move { Ok(first) }).chain(body).boxed()),
            // An empty body is committed; the re-framer reports it in-stream
            Ok(None) => Ok(body),
        }
    }
}

/// Builder for [`Router`]
#[derive(Default)]
pub struct RouterBuilder {
    catalog: Option<Arc<ProviderCatalog>>,
    registry: Option<ProviderRegistry>,
    transport: Option<Arc<dyn UpstreamTransport>>,
    credentials: Option<Arc<CredentialResolver>>,
    metadata: Option<Arc<CachedMetadata>>,
    guardrails: Option<Arc<dyn Guardrails>>,
    providers: Vec<ProviderSettings>,
    config: RouterConfig,
}

impl RouterBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model catalog
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<ProviderCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the adapter registry; defaults to every compiled-in adapter
    #[must_use]
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the upstream transport
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn UpstreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the credential resolver
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the cached metadata
    #[must_use]
    pub fn metadata(mut self, metadata: Arc<CachedMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set the guardrails; defaults to passing everything
    #[must_use]
    pub fn guardrails(mut self, guardrails: Arc<dyn Guardrails>) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    /// Add provider settings; disabled providers are ignored
    #[must_use]
    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderSettings>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Set the loop configuration
    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the router
    pub fn build(self) -> GatewayResult<Router> {
        let missing = |what: &str| GatewayError::configuration(format!("router {what} not set"));
        let metadata = self.metadata.ok_or_else(|| missing("metadata"))?;
        Ok(Router {
            catalog: self.catalog.ok_or_else(|| missing("catalog"))?,
            registry: self.registry.unwrap_or_else(ProviderRegistry::with_defaults),
            transport: self.transport.ok_or_else(|| missing("transport"))?,
            credentials: self.credentials.ok_or_else(|| missing("credentials"))?,
            iam: IamEvaluator::new(Arc::clone(&metadata)),
            metadata,
            guardrails: self
                .guardrails
                .unwrap_or_else(|| Arc::new(NoopGuardrails)),
            providers: self
                .providers
                .into_iter()
                .filter(|p| p.enabled)
                .map(|p| (p.id.clone(), p))
                .collect(),
            config: self.config,
        })
    }
}
