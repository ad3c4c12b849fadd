//! Operation vocabulary: typed descriptions of the WordPress REST surface.
//!
//! Each entry fixes the HTTP method, path template, parameter bindings with
//! their constraints, cache class, and the mutation it represents. The table
//! is the single source of truth for request rendering, cache-key derivation,
//! and the invalidation rule set.

// std
use std::{collections::HashMap, sync::OnceLock};
// crates.io
use http::Method;
use serde_json::{Map as JsonMap, Value};
// self
use crate::_prelude::*;

/// Coarse TTL band assigned to a cacheable operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheClass {
    /// Never cached.
    None,
    /// 60 second TTL for volatile listings.
    Short,
    /// 15 minute TTL for detail reads.
    Medium,
    /// 60 minute TTL for slow-moving resources.
    Long,
    /// 24 hour TTL for effectively static data.
    Static,
}
impl CacheClass {
    /// Default TTL for the class; `None` for uncacheable operations.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Short => Some(Duration::from_secs(60)),
            Self::Medium => Some(Duration::from_secs(15 * 60)),
            Self::Long => Some(Duration::from_secs(60 * 60)),
            Self::Static => Some(Duration::from_secs(24 * 60 * 60)),
        }
    }

    /// Grace window after expiry during which a stale entry is revalidated
    /// with conditional headers instead of refetched outright.
    pub fn revalidation_grace(&self) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Short => Duration::from_secs(30),
            Self::Medium => Duration::from_secs(5 * 60),
            Self::Long => Duration::from_secs(10 * 60),
            Self::Static => Duration::from_secs(60 * 60),
        }
    }
}

/// WordPress resource families the invalidation engine reasons about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Resource {
    Posts,
    Pages,
    Media,
    Users,
    Comments,
    Categories,
    Tags,
    Settings,
    ApplicationPasswords,
    Seo,
}

/// Mutation event classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Event {
    Create,
    Update,
    Delete,
}

/// The mutation an operation performs, used to drive cache invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mutation {
    /// Resource family the mutation touches.
    pub resource: Resource,
    /// Event class of the mutation.
    pub event: Event,
}

/// Where a parameter is bound in the rendered request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Substituted into the path template.
    Path,
    /// Appended to the query string.
    Query,
    /// Serialized into the JSON request body.
    Body,
    /// Local file path streamed as the multipart payload.
    File,
}

/// Accepted value shapes for a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// JSON integer.
    Integer,
    /// JSON string.
    String,
    /// JSON boolean.
    Boolean,
    /// JSON array of integers.
    IntList,
    /// Arbitrary JSON object passed through verbatim.
    Object,
    /// String restricted to a fixed set of values.
    Choice(&'static [&'static str]),
}

/// Typed description of a single operation parameter.
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    /// Parameter name as supplied by the caller.
    pub name: &'static str,
    /// Request position the value binds to.
    pub binding: Binding,
    /// Accepted value shape.
    pub kind: ParamKind,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Maximum string length, when constrained.
    pub max_len: Option<usize>,
    /// Inclusive integer range, when constrained.
    pub range: Option<(i64, i64)>,
}
impl ParamSpec {
    const fn new(name: &'static str, binding: Binding, kind: ParamKind) -> Self {
        Self {
            name,
            binding,
            kind,
            required: false,
            max_len: None,
            range: None,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;

        self
    }

    const fn max_len(mut self, limit: usize) -> Self {
        self.max_len = Some(limit);

        self
    }

    const fn range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));

        self
    }
}

/// Static descriptor for one WordPress REST operation.
#[derive(Clone, Debug)]
pub struct OperationSpec {
    /// Operation name exposed to the tool layer.
    pub name: &'static str,
    /// HTTP method of the rendered request.
    pub method: Method,
    /// Path template with `{param}` placeholders.
    pub path: &'static str,
    /// Query pairs always present on the rendered request.
    pub fixed_query: &'static [(&'static str, &'static str)],
    /// Parameter bindings accepted by the operation.
    pub params: &'static [ParamSpec],
    /// Cache band for GET responses.
    pub cache_class: CacheClass,
    /// Mutation classification, when the operation writes.
    pub mutation: Option<Mutation>,
    /// Whether the operation is safe to retry after bytes were sent.
    pub idempotent: bool,
    /// Whether the request body streams a local file as multipart.
    pub streaming_upload: bool,
    /// Whether unknown parameters pass through instead of being rejected.
    pub allow_extra: bool,
}
impl OperationSpec {
    /// Whether responses of this operation are cacheable.
    pub fn cacheable(&self) -> bool {
        self.method == Method::GET && self.cache_class != CacheClass::None
    }
}

const ID: ParamSpec = ParamSpec::new("id", Binding::Path, ParamKind::Integer)
    .required()
    .range(1, i64::MAX);
const PAGE: ParamSpec =
    ParamSpec::new("page", Binding::Query, ParamKind::Integer).range(1, i64::MAX);
const PER_PAGE: ParamSpec =
    ParamSpec::new("per_page", Binding::Query, ParamKind::Integer).range(1, 100);
const SEARCH: ParamSpec = ParamSpec::new("search", Binding::Query, ParamKind::String).max_len(200);
const ORDER: ParamSpec =
    ParamSpec::new("order", Binding::Query, ParamKind::Choice(&["asc", "desc"]));
const FORCE: ParamSpec = ParamSpec::new("force", Binding::Query, ParamKind::Boolean);
const CONTENT_STATUS: ParamSpec = ParamSpec::new(
    "status",
    Binding::Body,
    ParamKind::Choice(&["publish", "draft", "pending", "private", "future"]),
);

/// The complete operation table.
pub static OPERATIONS: &[OperationSpec] = &[
    // Posts.
    OperationSpec {
        name: "listPosts",
        method: Method::GET,
        path: "/wp-json/wp/v2/posts",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ORDER,
            ParamSpec::new(
                "orderby",
                Binding::Query,
                ParamKind::Choice(&["date", "id", "title", "slug", "modified"]),
            ),
            ParamSpec::new(
                "status",
                Binding::Query,
                ParamKind::Choice(&["publish", "draft", "pending", "private", "future", "any"]),
            ),
            ParamSpec::new("author", Binding::Query, ParamKind::Integer).range(1, i64::MAX),
            ParamSpec::new("categories", Binding::Query, ParamKind::IntList),
            ParamSpec::new("tags", Binding::Query, ParamKind::IntList),
        ],
        cache_class: CacheClass::Short,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getPost",
        method: Method::GET,
        path: "/wp-json/wp/v2/posts/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createPost",
        method: Method::POST,
        path: "/wp-json/wp/v2/posts",
        fixed_query: &[],
        params: &[
            ParamSpec::new("title", Binding::Body, ParamKind::String)
                .required()
                .max_len(500),
            ParamSpec::new("content", Binding::Body, ParamKind::String),
            ParamSpec::new("excerpt", Binding::Body, ParamKind::String).max_len(1_000),
            CONTENT_STATUS,
            ParamSpec::new("categories", Binding::Body, ParamKind::IntList),
            ParamSpec::new("tags", Binding::Body, ParamKind::IntList),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Posts,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updatePost",
        method: Method::POST,
        path: "/wp-json/wp/v2/posts/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("title", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("content", Binding::Body, ParamKind::String),
            ParamSpec::new("excerpt", Binding::Body, ParamKind::String).max_len(1_000),
            CONTENT_STATUS,
            ParamSpec::new("categories", Binding::Body, ParamKind::IntList),
            ParamSpec::new("tags", Binding::Body, ParamKind::IntList),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Posts,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deletePost",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/posts/{id}",
        fixed_query: &[],
        params: &[ID, FORCE],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Posts,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "getPostRevisions",
        method: Method::GET,
        path: "/wp-json/wp/v2/posts/{id}/revisions",
        fixed_query: &[],
        params: &[ID, PAGE, PER_PAGE],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Pages.
    OperationSpec {
        name: "listPages",
        method: Method::GET,
        path: "/wp-json/wp/v2/pages",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ORDER,
            ParamSpec::new("parent", Binding::Query, ParamKind::Integer).range(0, i64::MAX),
            ParamSpec::new(
                "status",
                Binding::Query,
                ParamKind::Choice(&["publish", "draft", "pending", "private", "future", "any"]),
            ),
        ],
        cache_class: CacheClass::Short,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getPage",
        method: Method::GET,
        path: "/wp-json/wp/v2/pages/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createPage",
        method: Method::POST,
        path: "/wp-json/wp/v2/pages",
        fixed_query: &[],
        params: &[
            ParamSpec::new("title", Binding::Body, ParamKind::String)
                .required()
                .max_len(500),
            ParamSpec::new("content", Binding::Body, ParamKind::String),
            CONTENT_STATUS,
            ParamSpec::new("parent", Binding::Body, ParamKind::Integer).range(0, i64::MAX),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Pages,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updatePage",
        method: Method::POST,
        path: "/wp-json/wp/v2/pages/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("title", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("content", Binding::Body, ParamKind::String),
            CONTENT_STATUS,
            ParamSpec::new("parent", Binding::Body, ParamKind::Integer).range(0, i64::MAX),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Pages,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deletePage",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/pages/{id}",
        fixed_query: &[],
        params: &[ID, FORCE],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Pages,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "getPageRevisions",
        method: Method::GET,
        path: "/wp-json/wp/v2/pages/{id}/revisions",
        fixed_query: &[],
        params: &[ID, PAGE, PER_PAGE],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Media.
    OperationSpec {
        name: "listMedia",
        method: Method::GET,
        path: "/wp-json/wp/v2/media",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ParamSpec::new(
                "media_type",
                Binding::Query,
                ParamKind::Choice(&["image", "video", "audio", "application"]),
            ),
            ParamSpec::new("mime_type", Binding::Query, ParamKind::String).max_len(100),
        ],
        cache_class: CacheClass::Short,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getMedia",
        method: Method::GET,
        path: "/wp-json/wp/v2/media/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "uploadMedia",
        method: Method::POST,
        path: "/wp-json/wp/v2/media",
        fixed_query: &[],
        params: &[
            ParamSpec::new("file", Binding::File, ParamKind::String)
                .required()
                .max_len(4_096),
            ParamSpec::new("title", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("alt_text", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("caption", Binding::Body, ParamKind::String).max_len(1_000),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Media,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: true,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateMedia",
        method: Method::POST,
        path: "/wp-json/wp/v2/media/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("title", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("alt_text", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("caption", Binding::Body, ParamKind::String).max_len(1_000),
            ParamSpec::new("description", Binding::Body, ParamKind::String),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Media,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deleteMedia",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/media/{id}",
        fixed_query: &[],
        params: &[ID, FORCE],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Media,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Users.
    OperationSpec {
        name: "listUsers",
        method: Method::GET,
        path: "/wp-json/wp/v2/users",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ParamSpec::new("roles", Binding::Query, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getUser",
        method: Method::GET,
        path: "/wp-json/wp/v2/users/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "getCurrentUser",
        method: Method::GET,
        path: "/wp-json/wp/v2/users/me",
        fixed_query: &[],
        params: &[],
        cache_class: CacheClass::None,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createUser",
        method: Method::POST,
        path: "/wp-json/wp/v2/users",
        fixed_query: &[],
        params: &[
            ParamSpec::new("username", Binding::Body, ParamKind::String)
                .required()
                .max_len(60),
            ParamSpec::new("email", Binding::Body, ParamKind::String)
                .required()
                .max_len(254),
            ParamSpec::new("password", Binding::Body, ParamKind::String).max_len(4_096),
            ParamSpec::new("roles", Binding::Body, ParamKind::String).max_len(200),
            ParamSpec::new("name", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Users,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateUser",
        method: Method::POST,
        path: "/wp-json/wp/v2/users/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("email", Binding::Body, ParamKind::String).max_len(254),
            ParamSpec::new("password", Binding::Body, ParamKind::String).max_len(4_096),
            ParamSpec::new("roles", Binding::Body, ParamKind::String).max_len(200),
            ParamSpec::new("name", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Users,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deleteUser",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/users/{id}",
        fixed_query: &[],
        params: &[
            ID,
            FORCE,
            ParamSpec::new("reassign", Binding::Query, ParamKind::Integer).range(1, i64::MAX),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Users,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Comments.
    OperationSpec {
        name: "listComments",
        method: Method::GET,
        path: "/wp-json/wp/v2/comments",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ParamSpec::new("post", Binding::Query, ParamKind::Integer).range(1, i64::MAX),
            ParamSpec::new(
                "status",
                Binding::Query,
                ParamKind::Choice(&["approve", "hold", "spam", "trash"]),
            ),
        ],
        cache_class: CacheClass::Short,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getComment",
        method: Method::GET,
        path: "/wp-json/wp/v2/comments/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createComment",
        method: Method::POST,
        path: "/wp-json/wp/v2/comments",
        fixed_query: &[],
        params: &[
            ParamSpec::new("post", Binding::Body, ParamKind::Integer)
                .required()
                .range(1, i64::MAX),
            ParamSpec::new("content", Binding::Body, ParamKind::String)
                .required()
                .max_len(65_525),
            ParamSpec::new("author_name", Binding::Body, ParamKind::String).max_len(245),
            ParamSpec::new("author_email", Binding::Body, ParamKind::String).max_len(254),
            ParamSpec::new("parent", Binding::Body, ParamKind::Integer).range(0, i64::MAX),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Comments,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateComment",
        method: Method::POST,
        path: "/wp-json/wp/v2/comments/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("content", Binding::Body, ParamKind::String).max_len(65_525),
            ParamSpec::new("post", Binding::Body, ParamKind::Integer).range(1, i64::MAX),
            ParamSpec::new(
                "status",
                Binding::Body,
                ParamKind::Choice(&["approve", "hold", "spam", "trash"]),
            ),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Comments,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deleteComment",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/comments/{id}",
        fixed_query: &[],
        params: &[ID, FORCE],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Comments,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Taxonomies.
    OperationSpec {
        name: "listCategories",
        method: Method::GET,
        path: "/wp-json/wp/v2/categories",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ParamSpec::new("post", Binding::Query, ParamKind::Integer).range(1, i64::MAX),
            ParamSpec::new("hide_empty", Binding::Query, ParamKind::Boolean),
        ],
        cache_class: CacheClass::Long,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getCategory",
        method: Method::GET,
        path: "/wp-json/wp/v2/categories/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Long,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createCategory",
        method: Method::POST,
        path: "/wp-json/wp/v2/categories",
        fixed_query: &[],
        params: &[
            ParamSpec::new("name", Binding::Body, ParamKind::String)
                .required()
                .max_len(200),
            ParamSpec::new("description", Binding::Body, ParamKind::String).max_len(1_000),
            ParamSpec::new("parent", Binding::Body, ParamKind::Integer).range(0, i64::MAX),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Categories,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateCategory",
        method: Method::POST,
        path: "/wp-json/wp/v2/categories/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("name", Binding::Body, ParamKind::String).max_len(200),
            ParamSpec::new("description", Binding::Body, ParamKind::String).max_len(1_000),
            ParamSpec::new("parent", Binding::Body, ParamKind::Integer).range(0, i64::MAX),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Categories,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deleteCategory",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/categories/{id}",
        fixed_query: &[],
        params: &[ID, FORCE],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Categories,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "listTags",
        method: Method::GET,
        path: "/wp-json/wp/v2/tags",
        fixed_query: &[],
        params: &[
            PAGE,
            PER_PAGE,
            SEARCH,
            ParamSpec::new("post", Binding::Query, ParamKind::Integer).range(1, i64::MAX),
            ParamSpec::new("hide_empty", Binding::Query, ParamKind::Boolean),
        ],
        cache_class: CacheClass::Long,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: true,
    },
    OperationSpec {
        name: "getTag",
        method: Method::GET,
        path: "/wp-json/wp/v2/tags/{id}",
        fixed_query: &[],
        params: &[ID],
        cache_class: CacheClass::Long,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createTag",
        method: Method::POST,
        path: "/wp-json/wp/v2/tags",
        fixed_query: &[],
        params: &[
            ParamSpec::new("name", Binding::Body, ParamKind::String)
                .required()
                .max_len(200),
            ParamSpec::new("description", Binding::Body, ParamKind::String).max_len(1_000),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Tags,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateTag",
        method: Method::POST,
        path: "/wp-json/wp/v2/tags/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("name", Binding::Body, ParamKind::String).max_len(200),
            ParamSpec::new("description", Binding::Body, ParamKind::String).max_len(1_000),
            ParamSpec::new("slug", Binding::Body, ParamKind::String).max_len(200),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Tags,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deleteTag",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/tags/{id}",
        fixed_query: &[],
        params: &[ID, FORCE],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Tags,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Site settings.
    OperationSpec {
        name: "getSiteSettings",
        method: Method::GET,
        path: "/wp-json/wp/v2/settings",
        fixed_query: &[],
        params: &[],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateSiteSettings",
        method: Method::POST,
        path: "/wp-json/wp/v2/settings",
        fixed_query: &[],
        params: &[
            ParamSpec::new("title", Binding::Body, ParamKind::String).max_len(500),
            ParamSpec::new("description", Binding::Body, ParamKind::String).max_len(1_000),
            ParamSpec::new("timezone_string", Binding::Body, ParamKind::String).max_len(100),
            ParamSpec::new("language", Binding::Body, ParamKind::String).max_len(20),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Settings,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: true,
    },
    // Application passwords.
    OperationSpec {
        name: "listApplicationPasswords",
        method: Method::GET,
        path: "/wp-json/wp/v2/users/{user_id}/application-passwords",
        fixed_query: &[],
        params: &[ParamSpec::new("user_id", Binding::Path, ParamKind::Integer)
            .required()
            .range(1, i64::MAX)],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "createApplicationPassword",
        method: Method::POST,
        path: "/wp-json/wp/v2/users/{user_id}/application-passwords",
        fixed_query: &[],
        params: &[
            ParamSpec::new("user_id", Binding::Path, ParamKind::Integer)
                .required()
                .range(1, i64::MAX),
            ParamSpec::new("name", Binding::Body, ParamKind::String)
                .required()
                .max_len(200),
            ParamSpec::new("app_id", Binding::Body, ParamKind::String).max_len(100),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::ApplicationPasswords,
            event: Event::Create,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "deleteApplicationPassword",
        method: Method::DELETE,
        path: "/wp-json/wp/v2/users/{user_id}/application-passwords/{uuid}",
        fixed_query: &[],
        params: &[
            ParamSpec::new("user_id", Binding::Path, ParamKind::Integer)
                .required()
                .range(1, i64::MAX),
            ParamSpec::new("uuid", Binding::Path, ParamKind::String)
                .required()
                .max_len(64),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::ApplicationPasswords,
            event: Event::Delete,
        }),
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // Search.
    OperationSpec {
        name: "searchSite",
        method: Method::GET,
        path: "/wp-json/wp/v2/search",
        fixed_query: &[],
        params: &[
            ParamSpec::new("search", Binding::Query, ParamKind::String)
                .required()
                .max_len(200),
            PAGE,
            PER_PAGE,
            ParamSpec::new(
                "type",
                Binding::Query,
                ParamKind::Choice(&["post", "term", "post-format"]),
            ),
            ParamSpec::new("subtype", Binding::Query, ParamKind::String).max_len(50),
        ],
        cache_class: CacheClass::Short,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    // SEO metadata, served through plugin-registered post fields.
    OperationSpec {
        name: "getSeoMetadata",
        method: Method::GET,
        path: "/wp-json/wp/v2/posts/{id}",
        fixed_query: &[("_fields", "id,meta,yoast_head_json,rank_math,aioseo_meta")],
        params: &[ID],
        cache_class: CacheClass::Medium,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
    OperationSpec {
        name: "updateSeoMetadata",
        method: Method::POST,
        path: "/wp-json/wp/v2/posts/{id}",
        fixed_query: &[],
        params: &[
            ID,
            ParamSpec::new("meta", Binding::Body, ParamKind::Object).required(),
        ],
        cache_class: CacheClass::None,
        mutation: Some(Mutation {
            resource: Resource::Seo,
            event: Event::Update,
        }),
        idempotent: false,
        streaming_upload: false,
        allow_extra: false,
    },
    // Discovery document, also used for plugin detection.
    OperationSpec {
        name: "getSiteInfo",
        method: Method::GET,
        path: "/wp-json/",
        fixed_query: &[],
        params: &[],
        cache_class: CacheClass::Static,
        mutation: None,
        idempotent: true,
        streaming_upload: false,
        allow_extra: false,
    },
];

/// Resolve an operation by its public name.
pub fn lookup(name: &str) -> Option<&'static OperationSpec> {
    static INDEX: OnceLock<HashMap<&'static str, &'static OperationSpec>> = OnceLock::new();

    INDEX
        .get_or_init(|| OPERATIONS.iter().map(|spec| (spec.name, spec)).collect())
        .get(name)
        .copied()
}

/// A request rendered from an operation descriptor and a parameter map.
#[derive(Clone, Debug, Default)]
pub struct RenderedRequest {
    /// Path with placeholders substituted.
    pub path: String,
    /// Query pairs in insertion order.
    pub query: Vec<(String, String)>,
    /// JSON body object, when any body parameter was bound.
    pub body: Option<Value>,
    /// Local file to stream as multipart, for upload operations.
    pub upload: Option<UploadSource>,
}

/// File payload streamed as the multipart body of an upload operation.
#[derive(Clone, Debug)]
pub struct UploadSource {
    /// Local filesystem path of the payload.
    pub file_path: String,
    /// Multipart field name.
    pub field: &'static str,
}

/// Render path, query, and body for `spec` from the caller's parameter map.
///
/// Required parameters must be present, every value must match its declared
/// kind and constraints, and unknown parameters are rejected unless the
/// descriptor allows pass-through.
pub fn render(
    spec: &'static OperationSpec,
    params: &JsonMap<String, Value>,
) -> Result<RenderedRequest> {
    let mut rendered = RenderedRequest {
        path: spec.path.to_owned(),
        ..Default::default()
    };
    let mut body = JsonMap::new();

    for (name, value) in spec.fixed_query {
        rendered
            .query
            .push(((*name).to_owned(), (*value).to_owned()));
    }

    for param in spec.params {
        let Some(value) = params.get(param.name) else {
            if param.required {
                return Err(Error::Param {
                    operation: spec.name,
                    param: param.name.to_owned(),
                    reason: "Required parameter is missing.".into(),
                });
            }

            continue;
        };

        validate_value(spec.name, param, value)?;

        match param.binding {
            Binding::Path => {
                let rendered_value = scalar_to_path_segment(spec.name, param, value)?;

                rendered.path = rendered
                    .path
                    .replace(&format!("{{{}}}", param.name), &rendered_value);
            }
            Binding::Query => rendered
                .query
                .push((param.name.to_owned(), scalar_to_query(value))),
            Binding::Body => {
                body.insert(param.name.to_owned(), value.clone());
            }
            Binding::File => {
                if let Value::String(path) = value {
                    rendered.upload = Some(UploadSource {
                        file_path: path.clone(),
                        field: "file",
                    });
                }
            }
        }
    }

    for name in params.keys() {
        if spec.params.iter().any(|param| param.name == name) {
            continue;
        }
        if !spec.allow_extra {
            return Err(Error::Param {
                operation: spec.name,
                param: name.clone(),
                reason: "Unknown parameter.".into(),
            });
        }

        let value = &params[name];

        if spec.method == Method::GET {
            rendered.query.push((name.clone(), scalar_to_query(value)));
        } else {
            body.insert(name.clone(), value.clone());
        }
    }

    if rendered.path.contains('{') {
        return Err(Error::Param {
            operation: spec.name,
            param: rendered.path.clone(),
            reason: "Path template has unbound placeholders.".into(),
        });
    }

    if !body.is_empty() {
        rendered.body = Some(Value::Object(body));
    }

    Ok(rendered)
}

fn validate_value(operation: &'static str, param: &ParamSpec, value: &Value) -> Result<()> {
    let mismatch = |expected: &str| Error::Param {
        operation,
        param: param.name.to_owned(),
        reason: format!("Expected {expected}."),
    };

    match param.kind {
        ParamKind::Integer => {
            let number = value.as_i64().ok_or_else(|| mismatch("an integer"))?;

            if let Some((min, max)) = param.range
                && !(min..=max).contains(&number)
            {
                return Err(Error::Param {
                    operation,
                    param: param.name.to_owned(),
                    reason: format!("Value {number} is outside [{min}, {max}]."),
                });
            }
        }
        ParamKind::String => {
            let text = value.as_str().ok_or_else(|| mismatch("a string"))?;

            if let Some(limit) = param.max_len
                && text.chars().count() > limit
            {
                return Err(Error::Param {
                    operation,
                    param: param.name.to_owned(),
                    reason: format!("Length exceeds {limit} characters."),
                });
            }
        }
        ParamKind::Boolean => {
            value.as_bool().ok_or_else(|| mismatch("a boolean"))?;
        }
        ParamKind::IntList => {
            let items = value
                .as_array()
                .ok_or_else(|| mismatch("an array of integers"))?;

            if items.iter().any(|item| item.as_i64().is_none()) {
                return Err(mismatch("an array of integers"));
            }
        }
        ParamKind::Object => {
            value.as_object().ok_or_else(|| mismatch("an object"))?;
        }
        ParamKind::Choice(choices) => {
            let text = value.as_str().ok_or_else(|| mismatch("a string"))?;

            if !choices.contains(&text) {
                return Err(Error::Param {
                    operation,
                    param: param.name.to_owned(),
                    reason: format!("Must be one of {choices:?}."),
                });
            }
        }
    }

    Ok(())
}

fn scalar_to_path_segment(
    operation: &'static str,
    param: &ParamSpec,
    value: &Value,
) -> Result<String> {
    match value {
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => {
            if text.is_empty()
                || !text
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
            {
                return Err(Error::Param {
                    operation,
                    param: param.name.to_owned(),
                    reason: "Path values may only contain ASCII letters, numbers, '-', or '_'."
                        .into(),
                });
            }

            Ok(text.clone())
        }
        _ => Err(Error::Param {
            operation,
            param: param.name.to_owned(),
            reason: "Path values must be integers or strings.".into(),
        }),
    }
}

fn scalar_to_query(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
