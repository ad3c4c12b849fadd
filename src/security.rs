//! Security utilities covering HTTPS enforcement and secret redaction.
//!
//! # Threat Model
//! These helpers assume upstream TLS validation is handled by the transport
//! and focus on keeping credentials out of logs, error excerpts, and debug
//! output, and on refusing cleartext transports for non-local sites.

// std
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::OnceLock,
};
// crates.io
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::{Host, Url};
// self
use crate::_prelude::*;

/// Maximum length of a sanitized upstream body excerpt.
pub const EXCERPT_MAX_CHARS: usize = 256;

/// Credential material that never appears in debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);
impl Secret {
    /// Wrap a sensitive string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the underlying value; callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Secret(***)")
    }
}
impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}
impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Whether the URL points at a loopback host.
pub fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Ensure the base URL uses HTTPS; cleartext HTTP is tolerated only for
/// loopback hosts.
pub fn enforce_https(url: &Url) -> Result<()> {
    if url.scheme() == "https" || is_loopback(url) {
        Ok(())
    } else {
        Err(Error::Config {
            field: "base_url",
            reason: format!("URL {url} must use HTTPS unless the host is loopback."),
        })
    }
}

fn redaction_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();

    PATTERNS.get_or_init(|| {
		[
			Regex::new(r"(?i)(bearer|basic)\s+[A-Za-z0-9._~+/=-]+").expect("static pattern"),
			Regex::new(r#"(?i)"(password|app_password|client_secret|access_token|refresh_token|token)"\s*:\s*"[^"]*""#)
				.expect("static pattern"),
			Regex::new(r"(?i)(password|client_secret|access_token|refresh_token|code)=[^&\s]+")
				.expect("static pattern"),
			Regex::new(r"(?i)(authorization):\s*\S+").expect("static pattern"),
		]
	})
}

/// Strip credential material from text destined for logs or error values.
pub fn redact_secrets(text: &str) -> String {
    let mut redacted = text.to_owned();

    for pattern in redaction_patterns() {
        redacted = pattern.replace_all(&redacted, "$1=***").into_owned();
    }

    redacted
}

/// Produce a bounded, redacted excerpt of an upstream response body.
pub fn excerpt(body: &str) -> Option<String> {
    let trimmed = body.trim();

    if trimmed.is_empty() {
        return None;
    }

    let redacted = redact_secrets(trimmed);
    let clipped = match redacted.char_indices().nth(EXCERPT_MAX_CHARS) {
        Some((index, _)) => format!("{}…", &redacted[..index]),
        None => redacted,
    };

    Some(clipped)
}
