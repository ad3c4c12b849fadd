//! Site configuration: client settings, environment and JSON loaders, and
//! validation.

// std
use std::collections::HashSet;
// crates.io
use serde::Deserialize;
use url::Url;
// self
use crate::{
    _prelude::*,
    auth::CredentialBundle,
    http::rate::{DEFAULT_BURST, DEFAULT_RATE_PER_MINUTE},
    http::retry::DEFAULT_RETRY_ATTEMPTS,
    security,
};

/// Default total timeout for one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default total timeout for streaming uploads.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default per-site cache byte bound (64 MiB).
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 64 * 1024 * 1024;
/// Default chunk size for streaming uploads (64 KiB).
pub const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 64 * 1024;
/// Minimum accepted cache byte bound.
pub const MIN_CACHE_BYTES: u64 = 64 * 1024;

/// Tunable client behavior for one site.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    /// Total timeout for one request.
    pub request_timeout: Duration,
    /// Total timeout for streaming uploads.
    pub upload_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Retries after the initial attempt.
    pub retry_attempts: u32,
    /// Rate budget in requests per minute.
    pub rate_per_minute: u32,
    /// Burst allowance on top of the steady rate.
    pub rate_burst: u32,
    /// Whether responses are cached at all.
    pub cache_enabled: bool,
    /// Per-site cache byte bound.
    pub cache_max_bytes: u64,
    /// Read chunk size for streaming uploads.
    pub upload_chunk_bytes: usize,
    /// Override applied to every cache class TTL, when set.
    pub cache_ttl_override: Option<Duration>,
    /// Widens tracing spans for this site.
    pub debug: bool,
}
impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            rate_burst: DEFAULT_BURST,
            cache_enabled: true,
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
            cache_ttl_override: None,
            debug: false,
        }
    }
}
impl ClientSettings {
    /// Validate settings invariants.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout < Duration::from_millis(100) {
            return Err(Error::Config {
                field: "request_timeout",
                reason: "Must be at least 100 ms.".into(),
            });
        }
        if self.upload_timeout < self.request_timeout {
            return Err(Error::Config {
                field: "upload_timeout",
                reason: "Must be greater than or equal to request_timeout.".into(),
            });
        }
        if self.rate_per_minute == 0 {
            return Err(Error::Config {
                field: "rate_per_minute",
                reason: "Must be at least 1.".into(),
            });
        }
        if self.cache_max_bytes < MIN_CACHE_BYTES {
            return Err(Error::Config {
                field: "cache_max_bytes",
                reason: format!("Must be at least {MIN_CACHE_BYTES} bytes."),
            });
        }

        Ok(())
    }
}

/// Complete configuration for one managed site.
#[derive(Clone, Debug)]
pub struct SiteConfig {
    /// Stable identifier used for routing and cache-key prefixes.
    pub id: String,
    /// Display name for diagnostics.
    pub name: String,
    /// Base URL of the WordPress installation.
    pub base_url: Url,
    /// Credential bundle for the site.
    pub credentials: CredentialBundle,
    /// Client behavior tunables.
    pub settings: ClientSettings,
}
impl SiteConfig {
    /// Construct a site configuration with default settings.
    pub fn new(
        id: impl Into<String>,
        base_url: impl AsRef<str>,
        credentials: CredentialBundle,
    ) -> Result<Self> {
        let id = id.into();
        let base_url = Url::parse(base_url.as_ref())?;

        Ok(Self {
            name: id.clone(),
            id,
            base_url,
            credentials,
            settings: ClientSettings::default(),
        })
    }

    /// Validate the configuration against the documented constraints.
    pub fn validate(&self) -> Result<()> {
        validate_site_id(&self.id)?;
        security::enforce_https(&self.base_url)?;
        self.settings.validate()?;

        Ok(())
    }

    /// Load a single site from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Load a single site from the given variable lookup.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("WORDPRESS_SITE_URL").ok_or(Error::Config {
            field: "WORDPRESS_SITE_URL",
            reason: "Required environment variable is missing.".into(),
        })?;
        let username = lookup("WORDPRESS_USERNAME").unwrap_or_default();
        let method = lookup("WORDPRESS_AUTH_METHOD");
        let credentials = credentials_from_env(&lookup, username, method.as_deref())?;
        let mut site = Self::new("default", base_url, credentials)?;

        if let Some(raw) = lookup("REQUEST_TIMEOUT") {
            site.settings.request_timeout =
                Duration::from_secs(parse_number("REQUEST_TIMEOUT", &raw)?);
            site.settings.upload_timeout = site
                .settings
                .upload_timeout
                .max(site.settings.request_timeout);
        }
        if let Some(raw) = lookup("RETRY_ATTEMPTS") {
            site.settings.retry_attempts = parse_number("RETRY_ATTEMPTS", &raw)? as u32;
        }
        if let Some(raw) = lookup("CACHE_ENABLED") {
            site.settings.cache_enabled = parse_bool("CACHE_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_TTL") {
            site.settings.cache_ttl_override =
                Some(Duration::from_secs(parse_number("CACHE_TTL", &raw)?));
        }
        if let Some(raw) = lookup("DEBUG") {
            site.settings.debug = parse_bool("DEBUG", &raw)?;
        }

        site.validate()?;

        Ok(site)
    }

    /// Load a multi-site table from a JSON document.
    pub fn table_from_json(document: &str) -> Result<Vec<Self>> {
        let document: MultiSiteDocument = serde_json::from_str(document)?;

        if document.sites.is_empty() {
            return Err(Error::Config {
                field: "sites",
                reason: "At least one site is required.".into(),
            });
        }

        let mut seen = HashSet::new();
        let mut sites = Vec::with_capacity(document.sites.len());

        for entry in document.sites {
            if !seen.insert(entry.id.clone()) {
                return Err(Error::Config {
                    field: "sites",
                    reason: format!("Duplicate site id '{}'.", entry.id),
                });
            }

            let site = entry.into_site()?;

            site.validate()?;
            sites.push(site);
        }

        Ok(sites)
    }
}

fn credentials_from_env(
    lookup: &impl Fn(&str) -> Option<String>,
    username: String,
    method: Option<&str>,
) -> Result<CredentialBundle> {
    let app_password = lookup("WORDPRESS_APP_PASSWORD");
    let password = lookup("WORDPRESS_PASSWORD");
    let jwt_secret = lookup("WORDPRESS_JWT_PASSWORD").or_else(|| password.clone());
    let oauth = (
        lookup("WORDPRESS_OAUTH_CLIENT_ID"),
        lookup("WORDPRESS_OAUTH_CLIENT_SECRET"),
        lookup("WORDPRESS_OAUTH_REDIRECT_URI"),
    );

    match method {
        // `api-key` is an alias retained for older deployments; it carries
        // the same Basic application-password scheme.
        Some("app-password") | Some("api-key") | None => {
            let Some(app_password) = app_password else {
                return Err(Error::Config {
                    field: "WORDPRESS_APP_PASSWORD",
                    reason: "Required for the app-password auth method.".into(),
                });
            };

            Ok(CredentialBundle::AppPassword {
                username,
                app_password: security::Secret::new(app_password),
            })
        }
        Some("basic") => {
            let Some(password) = password else {
                return Err(Error::Config {
                    field: "WORDPRESS_PASSWORD",
                    reason: "Required for the basic auth method.".into(),
                });
            };

            Ok(CredentialBundle::Basic {
                username,
                password: security::Secret::new(password),
            })
        }
        Some("jwt") => {
            let Some(password) = jwt_secret else {
                return Err(Error::Config {
                    field: "WORDPRESS_JWT_PASSWORD",
                    reason: "Required for the jwt auth method.".into(),
                });
            };

            Ok(CredentialBundle::Jwt {
                username,
                password: security::Secret::new(password),
                token: None,
            })
        }
        Some("oauth") => {
            let (Some(client_id), Some(client_secret), Some(redirect_uri)) = oauth else {
                return Err(Error::Config {
                    field: "WORDPRESS_OAUTH_CLIENT_ID",
                    reason: "OAuth requires client id, client secret, and redirect URI.".into(),
                });
            };

            Ok(CredentialBundle::OAuth {
                client_id,
                client_secret: security::Secret::new(client_secret),
                redirect_uri: Url::parse(&redirect_uri)?,
                scope: lookup("WORDPRESS_OAUTH_SCOPE").unwrap_or_else(|| "basic".into()),
                token: None,
                pending: None,
            })
        }
        Some(other) => Err(Error::Config {
            field: "WORDPRESS_AUTH_METHOD",
            reason: format!("Unknown auth method '{other}'."),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct MultiSiteDocument {
    sites: Vec<SiteEntry>,
}

#[derive(Debug, Deserialize)]
struct SiteEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    config: RawSiteConfig,
}
impl SiteEntry {
    fn into_site(self) -> Result<SiteConfig> {
        let raw = self.config;
        let credentials = raw.credentials()?;
        let mut site = SiteConfig::new(self.id, raw.site_url, credentials)?;

        if let Some(name) = self.name {
            site.name = name;
        }
        if let Some(seconds) = raw.request_timeout {
            site.settings.request_timeout = Duration::from_secs(seconds);
            site.settings.upload_timeout = site
                .settings
                .upload_timeout
                .max(site.settings.request_timeout);
        }
        if let Some(attempts) = raw.retry_attempts {
            site.settings.retry_attempts = attempts;
        }
        if let Some(per_minute) = raw.rate_per_minute {
            site.settings.rate_per_minute = per_minute;
        }
        if let Some(enabled) = raw.cache_enabled {
            site.settings.cache_enabled = enabled;
        }
        if let Some(seconds) = raw.cache_ttl {
            site.settings.cache_ttl_override = Some(Duration::from_secs(seconds));
        }
        if let Some(bytes) = raw.cache_max_bytes {
            site.settings.cache_max_bytes = bytes;
        }
        if let Some(debug) = raw.debug {
            site.settings.debug = debug;
        }

        Ok(site)
    }
}

#[derive(Debug, Deserialize)]
struct RawSiteConfig {
    site_url: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    auth_method: Option<String>,
    #[serde(default)]
    app_password: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    oauth_client_id: Option<String>,
    #[serde(default)]
    oauth_client_secret: Option<String>,
    #[serde(default)]
    oauth_redirect_uri: Option<String>,
    #[serde(default)]
    oauth_scope: Option<String>,
    #[serde(default)]
    request_timeout: Option<u64>,
    #[serde(default)]
    retry_attempts: Option<u32>,
    #[serde(default)]
    rate_per_minute: Option<u32>,
    #[serde(default)]
    cache_enabled: Option<bool>,
    #[serde(default)]
    cache_ttl: Option<u64>,
    #[serde(default)]
    cache_max_bytes: Option<u64>,
    #[serde(default)]
    debug: Option<bool>,
}
impl RawSiteConfig {
    fn credentials(&self) -> Result<CredentialBundle> {
        let lookup = |name: &str| -> Option<String> {
            match name {
                "WORDPRESS_APP_PASSWORD" => self.app_password.clone(),
                "WORDPRESS_PASSWORD" | "WORDPRESS_JWT_PASSWORD" => self.password.clone(),
                "WORDPRESS_OAUTH_CLIENT_ID" => self.oauth_client_id.clone(),
                "WORDPRESS_OAUTH_CLIENT_SECRET" => self.oauth_client_secret.clone(),
                "WORDPRESS_OAUTH_REDIRECT_URI" => self.oauth_redirect_uri.clone(),
                "WORDPRESS_OAUTH_SCOPE" => self.oauth_scope.clone(),
                _ => None,
            }
        };

        credentials_from_env(&lookup, self.username.clone(), self.auth_method.as_deref())
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| Error::Config {
        field,
        reason: format!("'{raw}' is not a non-negative integer."),
    })
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config {
            field,
            reason: format!("'{raw}' is not a boolean."),
        }),
    }
}

fn validate_site_id(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Config {
            field: "id",
            reason: "Must not be empty.".into(),
        });
    }
    if value.len() > 64 {
        return Err(Error::Config {
            field: "id",
            reason: "Must be 64 characters or fewer.".into(),
        });
    }
    if !value
        .as_bytes()
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
    {
        return Err(Error::Config {
            field: "id",
            reason: "May only contain ASCII letters, numbers, '-', or '_'.".into(),
        });
    }

    Ok(())
}
