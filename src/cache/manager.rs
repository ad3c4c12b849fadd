//! Read-through HTTP cache for one site.
//!
//! Applies cache semantics on top of the request manager: deterministic key
//! derivation, per-key single-flight so concurrent identical GETs share one
//! upstream call, conditional revalidation of stale entries, and negative
//! caching of 404s. Leaders run in spawned tasks, so cancelling a joiner
//! never cancels the upstream fetch and the in-flight registry cannot retain
//! a completed flight.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use serde_json::{Map as JsonMap, Value};
use tokio::sync::watch;
use url::Url;
// self
use crate::{
    _prelude::*,
    cache::{
        key::cache_key,
        store::{CacheStore, CachedResponse, Lookup},
    },
    context::Ctx,
    http::{
        request::{HttpOutcome, RequestManager, RequestOptions},
        semantics::{ListMeta, effective_ttl},
    },
    ops::{CacheClass, OperationSpec},
    security,
};

/// Result of a cache-aware fetch.
#[derive(Clone, Debug)]
pub struct Fetched {
    /// Response body.
    pub body: Arc<Value>,
    /// HTTP status of the originating response.
    pub status: u16,
    /// Pagination metadata for list responses.
    pub list_meta: ListMeta,
    /// Whether the value was served from the cache without an upstream call.
    pub from_cache: bool,
    /// Wall-clock duration of the upstream call; zero for cache hits.
    pub elapsed: Duration,
    /// HTTP attempts performed; zero for cache hits.
    pub attempts: u32,
}

#[derive(Clone, Debug)]
enum FlightOutput {
    Success(Fetched),
    Failure(Arc<Error>),
}

type FlightReceiver = watch::Receiver<Option<FlightOutput>>;

/// Cache wrapper coordinating the store, single-flight registry, and request
/// manager for one site.
#[derive(Clone, Debug)]
pub struct CacheManager {
    site_id: Arc<str>,
    base_url: Url,
    ttl_override: Option<Duration>,
    store: Arc<CacheStore>,
    requests: Arc<RequestManager>,
    flights: Arc<Mutex<HashMap<String, FlightReceiver>>>,
}
impl CacheManager {
    /// Build a wrapper over the site's store and request manager.
    pub fn new(
        site_id: impl Into<Arc<str>>,
        base_url: Url,
        ttl_override: Option<Duration>,
        store: Arc<CacheStore>,
        requests: Arc<RequestManager>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            base_url,
            ttl_override,
            store,
            requests,
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch a cacheable GET, serving from the store when possible.
    #[tracing::instrument(skip(self, params, ctx), fields(site = %self.site_id, op = spec.name))]
    pub async fn fetch(
        &self,
        spec: &'static OperationSpec,
        params: &JsonMap<String, Value>,
        ctx: &Ctx,
    ) -> Result<Fetched> {
        let key = cache_key(&self.site_id, spec.name, params);
        let grace = spec.cache_class.revalidation_grace();

        match self.store.lookup(&key, grace) {
            Lookup::Hit(cached) => {
                tracing::debug!(%key, "cache hit");

                cached_to_fetched(cached)
            }
            Lookup::Stale(cached) => {
                tracing::debug!(%key, "stale cache entry; revalidating");

                self.join_or_lead(key, spec, params, ctx, Some(cached))
                    .await
            }
            Lookup::Miss => self.join_or_lead(key, spec, params, ctx, None).await,
        }
    }

    /// Effective TTL for a cache class, honoring the site-wide override.
    fn class_ttl(&self, class: CacheClass) -> Duration {
        self.ttl_override
            .or_else(|| class.ttl())
            .unwrap_or(Duration::ZERO)
    }

    async fn join_or_lead(
        &self,
        key: String,
        spec: &'static OperationSpec,
        params: &JsonMap<String, Value>,
        ctx: &Ctx,
        stale: Option<CachedResponse>,
    ) -> Result<Fetched> {
        let mut receiver = {
            let mut flights = self.flights.lock().expect("flight registry mutex poisoned");

            match flights.get(&key) {
                Some(receiver) => receiver.clone(),
                None => {
                    let (sender, receiver) = watch::channel(None);

                    flights.insert(key.clone(), receiver.clone());
                    self.spawn_leader(key.clone(), spec, params.clone(), stale, sender);

                    receiver
                }
            }
        };
        let output = ctx
            .run(async {
                let slot = receiver
                    .wait_for(|slot| slot.is_some())
                    .await
                    .map_err(|_| Error::Transport("Single-flight leader vanished.".into()))?;

                Ok((*slot).clone())
            })
            .await?;

        match output {
            Some(FlightOutput::Success(fetched)) => Ok(fetched),
            Some(FlightOutput::Failure(err)) => Err(shared_error(&err)),
            None => Err(Error::Transport("Single-flight leader vanished.".into())),
        }
    }

    fn spawn_leader(
        &self,
        key: String,
        spec: &'static OperationSpec,
        params: JsonMap<String, Value>,
        stale: Option<CachedResponse>,
        sender: watch::Sender<Option<FlightOutput>>,
    ) {
        let manager = self.clone();

        tokio::spawn(async move {
            // The leader runs detached from every joiner's context; the
            // request manager bounds it with the site's request timeout.
            let leader_ctx = Ctx::background();
            let output = match manager
                .fetch_upstream(&key, spec, &params, &leader_ctx, stale)
                .await
            {
                Ok(fetched) => FlightOutput::Success(fetched),
                Err(err) => FlightOutput::Failure(Arc::new(err)),
            };

            {
                let mut flights = manager
                    .flights
                    .lock()
                    .expect("flight registry mutex poisoned");

                flights.remove(&key);
            }

            let _ = sender.send(Some(output));
        });
    }

    async fn fetch_upstream(
        &self,
        key: &str,
        spec: &'static OperationSpec,
        params: &JsonMap<String, Value>,
        ctx: &Ctx,
        stale: Option<CachedResponse>,
    ) -> Result<Fetched> {
        let ttl = self.class_ttl(spec.cache_class);
        let conditional = stale
            .as_ref()
            .map(|cached| cached.validators.clone())
            .filter(|v| v.usable());
        let options = RequestOptions { conditional };
        let outcome = match self.requests.execute(spec, params, ctx, options).await {
            Ok(outcome) => outcome,
            Err(Error::UpstreamClient {
                status: 404,
                excerpt,
            }) => {
                // Negative caching: remember the 404 briefly so repeated
                // discovery probes do not hammer the origin.
                let negative = CachedResponse {
                    status: 404,
                    body: Arc::new(Value::Null),
                    validators: Default::default(),
                    list_meta: Default::default(),
                };
                let negative_ttl = CacheClass::Short.ttl().unwrap_or(Duration::from_secs(60));

                self.store.set(key, negative, negative_ttl);

                return Err(Error::UpstreamClient {
                    status: 404,
                    excerpt,
                });
            }
            Err(err) => return Err(err),
        };

        if outcome.not_modified() {
            return match stale {
                Some(cached) => {
                    let refreshed_ttl =
                        effective_ttl(ttl, self.base_url.as_str(), &outcome.headers);

                    self.store
                        .refresh_ttl(key, refreshed_ttl, Some(outcome.validators));

                    tracing::debug!(%key, "revalidated via 304");

                    Ok(Fetched {
                        body: cached.body,
                        status: cached.status,
                        list_meta: cached.list_meta,
                        from_cache: true,
                        elapsed: outcome.elapsed,
                        attempts: outcome.attempts,
                    })
                }
                None => {
                    // A 304 without a reusable entry means the cached payload
                    // vanished underneath the validators; evict the key and
                    // fetch once unconditionally.
                    self.store.delete(key);

                    let retry = self
                        .requests
                        .execute(spec, params, ctx, RequestOptions::default())
                        .await?;

                    if retry.not_modified() {
                        return Err(Error::CacheCorruption {
                            key: key.to_owned(),
                        });
                    }

                    Ok(self.store_success(key, spec, retry))
                }
            };
        }

        Ok(self.store_success(key, spec, outcome))
    }

    fn store_success(
        &self,
        key: &str,
        spec: &'static OperationSpec,
        outcome: HttpOutcome,
    ) -> Fetched {
        let ttl = effective_ttl(
            self.class_ttl(spec.cache_class),
            self.base_url.as_str(),
            &outcome.headers,
        );
        let cached = CachedResponse {
            status: outcome.status.as_u16(),
            body: Arc::new(outcome.body),
            validators: outcome.validators,
            list_meta: outcome.list_meta,
        };

        if !ttl.is_zero() {
            if spec.name == "getSiteInfo" {
                // The discovery document backs plugin detection; keep it
                // resident regardless of byte pressure.
                self.store.set_pinned(key, cached.clone(), ttl);
            } else {
                self.store.set(key, cached.clone(), ttl);
            }
        }

        Fetched {
            body: cached.body,
            status: cached.status,
            list_meta: cached.list_meta,
            from_cache: false,
            elapsed: outcome.elapsed,
            attempts: outcome.attempts,
        }
    }
}

fn cached_to_fetched(cached: CachedResponse) -> Result<Fetched> {
    if cached.status == 404 {
        return Err(Error::UpstreamClient {
            status: 404,
            excerpt: None,
        });
    }

    Ok(Fetched {
        body: cached.body,
        status: cached.status,
        list_meta: cached.list_meta,
        from_cache: true,
        elapsed: Duration::ZERO,
        attempts: 0,
    })
}

/// Reconstruct an equivalent error for a single-flight joiner.
fn shared_error(err: &Error) -> Error {
    match err {
        Error::UpstreamClient { status, excerpt } => Error::UpstreamClient {
            status: *status,
            excerpt: excerpt.clone(),
        },
        Error::UpstreamUnavailable {
            status,
            attempts,
            excerpt,
        } => Error::UpstreamUnavailable {
            status: *status,
            attempts: *attempts,
            excerpt: excerpt.clone(),
        },
        Error::UpstreamRateLimited { retry_after } => Error::UpstreamRateLimited {
            retry_after: *retry_after,
        },
        Error::RateLimited { site } => Error::RateLimited { site: site.clone() },
        Error::AuthRequired(message) => Error::AuthRequired(message.clone()),
        Error::AuthExpired => Error::AuthExpired,
        Error::AuthRefreshFailed(message) => Error::AuthRefreshFailed(message.clone()),
        Error::AuthMethodUnsupported(what) => Error::AuthMethodUnsupported(what),
        Error::Param {
            operation,
            param,
            reason,
        } => Error::Param {
            operation,
            param: param.clone(),
            reason: reason.clone(),
        },
        Error::UnknownSite { site } => Error::UnknownSite { site: site.clone() },
        Error::UnknownOperation { name } => Error::UnknownOperation { name: name.clone() },
        Error::Config { field, reason } => Error::Config {
            field,
            reason: reason.clone(),
        },
        Error::CacheCorruption { key } => Error::CacheCorruption { key: key.clone() },
        Error::InvalidationFailed(message) => Error::InvalidationFailed(message.clone()),
        Error::Timeout => Error::Timeout,
        Error::Cancelled => Error::Cancelled,
        other => Error::Transport(security::redact_secrets(&other.to_string())),
    }
}
