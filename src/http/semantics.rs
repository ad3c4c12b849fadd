//! HTTP cache semantics helpers: effective TTLs, validators, pacing hints,
//! and WordPress list metadata.

// crates.io
use http::{
    HeaderMap, Request, Response,
    header::{ETAG, LAST_MODIFIED, RETRY_AFTER},
};
use http_cache_semantics::CachePolicy;
// self
use crate::_prelude::*;

const WP_TOTAL: &str = "x-wp-total";
const WP_TOTAL_PAGES: &str = "x-wp-totalpages";

/// Validators advertised by the origin for a cached representation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validators {
    /// Entity tag, when present.
    pub etag: Option<String>,
    /// Last-Modified timestamp, when present.
    pub last_modified: Option<DateTime<Utc>>,
}
impl Validators {
    /// Extract validators from response headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let etag = headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| httpdate::parse_http_date(raw).ok())
            .map(DateTime::<Utc>::from);

        Self {
            etag,
            last_modified,
        }
    }

    /// Whether any validator is available for a conditional request.
    pub fn usable(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Pagination metadata WordPress attaches to list responses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListMeta {
    /// Total matching items, from `X-WP-Total`.
    pub total: Option<u64>,
    /// Total pages at the requested page size, from `X-WP-TotalPages`.
    pub total_pages: Option<u64>,
}
impl ListMeta {
    /// Parse list metadata headers when present.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.parse::<u64>().ok())
        };

        Self {
            total: parse(WP_TOTAL),
            total_pages: parse(WP_TOTAL_PAGES),
        }
    }
}

/// Effective TTL for a cacheable response: the cache-class default, tightened
/// by an explicit `Cache-Control: max-age` when the origin advertises a
/// shorter lifetime.
pub fn effective_ttl(class_ttl: Duration, url: &str, headers: &HeaderMap) -> Duration {
    let Some(policy) = response_policy(url, headers) else {
        return class_ttl;
    };

    if !policy.is_storable() {
        return class_ttl;
    }

    let origin_ttl = policy.time_to_live(SystemTime::now());

    if origin_ttl.is_zero() || origin_ttl >= class_ttl {
        class_ttl
    } else {
        tracing::debug!(?origin_ttl, ?class_ttl, "origin max-age tightens cache ttl");

        origin_ttl
    }
}

/// Parse a `Retry-After` header as either delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;

    if let Ok(seconds) = raw.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = httpdate::parse_http_date(raw).ok()?;

    when.duration_since(SystemTime::now()).ok()
}

fn response_policy(url: &str, headers: &HeaderMap) -> Option<CachePolicy> {
    let request = Request::builder().method("GET").uri(url).body(()).ok()?;
    let mut builder = Response::builder().status(200);

    if let Some(existing) = builder.headers_mut() {
        existing.extend(
            headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
    }

    let response = builder.body(()).ok()?;

    Some(CachePolicy::new(&request, &response))
}
