//! Async multi-site WordPress REST client core with per-site auth, rate
//! limiting, TTL+LRU caching, and cascade invalidation — built for agent
//! tool servers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod metrics;
pub mod ops;
pub mod router;
pub mod security;

mod error;
mod _prelude {
    pub use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    pub use chrono::{DateTime, Utc};
    pub use tokio::time::Instant;

    pub use crate::{Error, Result};
}
#[cfg(feature = "prometheus")]
pub use crate::metrics::install_default_exporter;
pub use crate::{
    auth::{AuthManager, AuthPhase, CredentialBundle, OAuthAuthorization, RefreshOutcome},
    config::{ClientSettings, SiteConfig},
    context::Ctx,
    error::{Error, ErrorKind, Result},
    router::{Execution, ExecutionMeta, Router, RouterBuilder, SeoPlugin, SiteDiagnostics},
};
