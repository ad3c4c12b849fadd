//! Multi-site router: owns one (auth, request, cache, invalidation) set per
//! site and exposes the single `execute` entrypoint the tool layer uses.

// std
use std::collections::HashMap;
// crates.io
use reqwest::{Client, redirect::Policy};
use serde_json::{Map as JsonMap, Value};
use tokio::sync::RwLock;
// self
use crate::{
    _prelude::*,
    auth::{AuthManager, CredentialBundle, OAuthAuthorization},
    cache::{
        invalidation::{InvalidationEngine, InvalidationEvent},
        manager::{CacheManager, Fetched},
        store::{CacheStats, CacheStore},
    },
    config::SiteConfig,
    context::Ctx,
    http::{
        rate::{GlobalLimiter, RateLimiter},
        request::{RequestManager, RequestOptions},
    },
    metrics::{SiteMetrics, SiteMetricsSnapshot},
    ops::{self, OperationSpec},
};

/// SEO plugins the probe can recognize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeoPlugin {
    /// Yoast SEO.
    Yoast,
    /// Rank Math.
    RankMath,
    /// All in One SEO.
    AllInOneSeo,
}
impl SeoPlugin {
    /// Stable label for diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yoast => "yoast",
            Self::RankMath => "rank-math",
            Self::AllInOneSeo => "all-in-one-seo",
        }
    }

    fn from_namespace(namespace: &str) -> Option<Self> {
        if namespace.starts_with("yoast/") {
            Some(Self::Yoast)
        } else if namespace.starts_with("rankmath/") {
            Some(Self::RankMath)
        } else if namespace.starts_with("aioseo/") {
            Some(Self::AllInOneSeo)
        } else {
            None
        }
    }
}

/// Result envelope of one execution.
#[derive(Clone, Debug)]
pub struct Execution {
    /// Response body.
    pub body: Arc<Value>,
    /// Execution metadata.
    pub meta: ExecutionMeta,
}

/// Metadata describing how an execution was served.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionMeta {
    /// Whether the body came from the cache without an upstream call.
    pub from_cache: bool,
    /// HTTP status of the originating response.
    pub status: u16,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
    /// HTTP attempts beyond the first.
    pub retries: u32,
    /// Total matching items for list responses.
    pub total: Option<u64>,
    /// Total pages for list responses.
    pub total_pages: Option<u64>,
}

/// Status projection for one site.
#[derive(Clone, Debug)]
pub struct SiteDiagnostics {
    /// Site identifier.
    pub site_id: String,
    /// Display name.
    pub name: String,
    /// Configured auth method label.
    pub auth_method: &'static str,
    /// Current auth lifecycle phase label.
    pub auth_phase: &'static str,
    /// Cache statistics.
    pub cache: CacheStats,
    /// Rate-limiter tokens currently available.
    pub rate_tokens: f64,
    /// Request counters.
    pub requests: SiteMetricsSnapshot,
}

/// Builder for [`Router`] enabling multi-site configuration.
#[derive(Debug, Default)]
pub struct RouterBuilder {
    sites: Vec<SiteConfig>,
    global_concurrency: Option<usize>,
}
impl RouterBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one site configuration.
    pub fn add_site(mut self, site: SiteConfig) -> Self {
        self.sites.push(site);

        self
    }

    /// Add every site from a multi-site JSON document.
    pub fn sites_from_json(mut self, document: &str) -> Result<Self> {
        self.sites.extend(SiteConfig::table_from_json(document)?);

        Ok(self)
    }

    /// Add the single site described by the process environment.
    pub fn site_from_env(mut self) -> Result<Self> {
        self.sites.push(SiteConfig::from_env()?);

        Ok(self)
    }

    /// Bound concurrent outbound requests across all sites.
    pub fn global_concurrency(mut self, concurrency: usize) -> Self {
        self.global_concurrency = Some(concurrency);

        self
    }

    /// Finalize the configuration and construct a [`Router`].
    pub fn build(self) -> Result<Router> {
        let global = Arc::new(match self.global_concurrency {
            Some(concurrency) => GlobalLimiter::new(concurrency),
            None => GlobalLimiter::default(),
        });
        let mut handles = HashMap::with_capacity(self.sites.len());

        for site in self.sites {
            if handles.contains_key(&site.id) {
                return Err(Error::Config {
                    field: "sites",
                    reason: format!("Duplicate site id '{}'.", site.id),
                });
            }

            let handle = SiteHandle::build(site, global.clone())?;

            handles.insert(handle.config.id.clone(), Arc::new(handle));
        }

        Ok(Router {
            inner: Arc::new(RwLock::new(handles)),
            global,
        })
    }
}

/// The single entrypoint the tool layer talks to.
#[derive(Clone, Debug)]
pub struct Router {
    inner: Arc<RwLock<HashMap<String, Arc<SiteHandle>>>>,
    global: Arc<GlobalLimiter>,
}
impl Router {
    /// Create a [`RouterBuilder`].
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Register or replace a site at runtime.
    pub async fn register_site(&self, site: SiteConfig) -> Result<()> {
        let handle = SiteHandle::build(site, self.global.clone())?;
        let mut inner = self.inner.write().await;

        inner.insert(handle.config.id.clone(), Arc::new(handle));

        Ok(())
    }

    /// Remove a site registration if present.
    pub async fn unregister_site(&self, site_id: &str) -> bool {
        self.inner.write().await.remove(site_id).is_some()
    }

    /// Identifiers of every registered site.
    pub async fn site_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.keys().cloned().collect();

        ids.sort_unstable();

        ids
    }

    /// Execute a named operation against a site.
    #[tracing::instrument(skip(self, params, ctx), fields(site = site_id, op = op_name))]
    pub async fn execute(
        &self,
        site_id: &str,
        op_name: &str,
        params: JsonMap<String, Value>,
        ctx: &Ctx,
    ) -> Result<Execution> {
        let handle = self.handle(site_id).await?;
        let Some(spec) = ops::lookup(op_name) else {
            return Err(Error::UnknownOperation {
                name: op_name.to_owned(),
            });
        };

        if matches!(spec.name, "getSeoMetadata" | "updateSeoMetadata") {
            self.require_seo_support(&handle, ctx).await?;
        }

        let result = handle.run(spec, &params, ctx).await;

        match &result {
            Ok(execution) => {
                handle.metrics.record_execution(
                    execution.meta.from_cache,
                    execution.meta.retries + 1,
                    Duration::from_millis(execution.meta.elapsed_ms),
                );
                #[cfg(feature = "metrics")]
                crate::metrics::record_execution(
                    site_id,
                    op_name,
                    execution.meta.from_cache,
                    execution.meta.retries + 1,
                    Duration::from_millis(execution.meta.elapsed_ms),
                );
            }
            Err(err) => {
                handle.metrics.record_error();
                #[cfg(feature = "metrics")]
                crate::metrics::record_error(site_id, op_name, err.kind().as_str());

                tracing::debug!(kind = %err.kind(), "execution failed");
            }
        }

        result
    }

    /// Probe the site's credential against the users endpoint.
    pub async fn validate_auth(&self, site_id: &str, ctx: &Ctx) -> Result<bool> {
        self.handle(site_id).await?.auth.validate(ctx).await
    }

    /// Begin an OAuth authorization flow for the site.
    pub async fn start_oauth(&self, site_id: &str) -> Result<OAuthAuthorization> {
        self.handle(site_id).await?.auth.start_oauth().await
    }

    /// Complete an OAuth authorization flow with the callback values.
    pub async fn complete_oauth(
        &self,
        site_id: &str,
        code: &str,
        state: &str,
        ctx: &Ctx,
    ) -> Result<()> {
        self.handle(site_id)
            .await?
            .auth
            .complete_oauth(ctx, code, state)
            .await
    }

    /// Validate and atomically switch the site's credential bundle.
    pub async fn switch_credentials(
        &self,
        site_id: &str,
        bundle: CredentialBundle,
        ctx: &Ctx,
    ) -> Result<()> {
        self.handle(site_id).await?.auth.switch(ctx, bundle).await
    }

    /// Best-effort detection of the active SEO plugin via the discovery
    /// document; the result is cached with the document itself.
    pub async fn detect_seo_plugin(&self, site_id: &str, ctx: &Ctx) -> Result<Option<SeoPlugin>> {
        let handle = self.handle(site_id).await?;

        handle.detect_seo_plugin(ctx).await
    }

    /// Status projection for one site.
    pub async fn diagnostics(&self, site_id: &str) -> Result<SiteDiagnostics> {
        let handle = self.handle(site_id).await?;

        Ok(SiteDiagnostics {
            site_id: handle.config.id.clone(),
            name: handle.config.name.clone(),
            auth_method: handle.auth.method().await,
            auth_phase: handle.auth.phase().await.as_str(),
            cache: handle.store.stats(),
            rate_tokens: handle.requests.rate().available(),
            requests: handle.metrics.snapshot(),
        })
    }

    /// Drop every cached entry for one site.
    pub async fn clear_cache(&self, site_id: &str) -> Result<()> {
        self.handle(site_id).await?.store.clear();

        Ok(())
    }

    async fn handle(&self, site_id: &str) -> Result<Arc<SiteHandle>> {
        let inner = self.inner.read().await;

        inner
            .get(site_id)
            .cloned()
            .ok_or_else(|| Error::UnknownSite {
                site: site_id.to_owned(),
            })
    }

    async fn require_seo_support(&self, handle: &SiteHandle, ctx: &Ctx) -> Result<()> {
        match handle.detect_seo_plugin(ctx).await {
            Ok(Some(_)) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(Error::Timeout) => Err(Error::Timeout),
            Ok(None) | Err(_) => Err(Error::UpstreamClient {
                status: 501,
                excerpt: Some("No supported SEO plugin is active on this site.".into()),
            }),
        }
    }
}

#[derive(Debug)]
struct SiteHandle {
    config: SiteConfig,
    auth: Arc<AuthManager>,
    requests: Arc<RequestManager>,
    store: Arc<CacheStore>,
    cache: CacheManager,
    invalidation: InvalidationEngine,
    metrics: Arc<SiteMetrics>,
}
impl SiteHandle {
    fn build(config: SiteConfig, global: Arc<GlobalLimiter>) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .redirect(Policy::limited(10))
            .user_agent(format!("wp-relay/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.settings.connect_timeout)
            .build()?;
        let auth = Arc::new(AuthManager::new(
            config.id.clone(),
            config.base_url.clone(),
            config.credentials.clone(),
            client.clone(),
        ));
        let rate = Arc::new(RateLimiter::new(
            config.id.clone(),
            config.settings.rate_per_minute,
            config.settings.rate_burst,
        ));
        let requests = Arc::new(RequestManager::new(
            config.id.clone(),
            config.base_url.clone(),
            config.settings.clone(),
            client,
            auth.clone(),
            rate,
            global,
        ));
        let store = Arc::new(CacheStore::new(config.settings.cache_max_bytes));
        let cache = CacheManager::new(
            config.id.as_str(),
            config.base_url.clone(),
            config.settings.cache_ttl_override,
            store.clone(),
            requests.clone(),
        );
        let invalidation = InvalidationEngine::new(config.id.as_str(), store.clone());

        Ok(Self {
            config,
            auth,
            requests,
            store,
            cache,
            invalidation,
            metrics: SiteMetrics::new(),
        })
    }

    async fn run(
        &self,
        spec: &'static OperationSpec,
        params: &JsonMap<String, Value>,
        ctx: &Ctx,
    ) -> Result<Execution> {
        if spec.cacheable() && self.config.settings.cache_enabled {
            let fetched = self.cache.fetch(spec, params, ctx).await?;

            return Ok(fetched_to_execution(fetched));
        }

        let outcome = self
            .requests
            .execute(spec, params, ctx, RequestOptions::default())
            .await?;
        let meta = ExecutionMeta {
            from_cache: false,
            status: outcome.status.as_u16(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            retries: outcome.attempts.saturating_sub(1),
            total: outcome.list_meta.total,
            total_pages: outcome.list_meta.total_pages,
        };
        let body = Arc::new(outcome.body);

        if let Some(mutation) = spec.mutation {
            // Invalidation runs before the mutation returns so a subsequent
            // read on the same site observes a coherent cache. Failures are
            // logged, never surfaced.
            let event = InvalidationEvent::from_mutation(mutation, params, &body);

            if let Err(err) = self.invalidation.invalidate(&event) {
                tracing::warn!(
                    site = %self.config.id,
                    op = spec.name,
                    error = %err,
                    "cache invalidation failed"
                );
            }
        }

        Ok(Execution { body, meta })
    }

    async fn detect_seo_plugin(&self, ctx: &Ctx) -> Result<Option<SeoPlugin>> {
        let spec = ops::lookup("getSiteInfo").ok_or_else(|| Error::UnknownOperation {
            name: "getSiteInfo".to_owned(),
        })?;
        let discovery = if spec.cacheable() && self.config.settings.cache_enabled {
            self.cache.fetch(spec, &JsonMap::new(), ctx).await?.body
        } else {
            Arc::new(
                self.requests
                    .execute(spec, &JsonMap::new(), ctx, RequestOptions::default())
                    .await?
                    .body,
            )
        };
        let detected = discovery
            .get("namespaces")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find_map(SeoPlugin::from_namespace);

        Ok(detected)
    }
}

fn fetched_to_execution(fetched: Fetched) -> Execution {
    Execution {
        body: fetched.body,
        meta: ExecutionMeta {
            from_cache: fetched.from_cache,
            status: fetched.status,
            elapsed_ms: fetched.elapsed.as_millis() as u64,
            retries: fetched.attempts.saturating_sub(1),
            total: fetched.list_meta.total,
            total_pages: fetched.list_meta.total_pages,
        },
    }
}
