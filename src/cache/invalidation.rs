//! Mutation-driven cache invalidation.
//!
//! A static rule table maps each mutation class to the cache keys it must
//! evict: detail entries keyed by id, whole listings, term-filtered listings,
//! and bounded cascades into related resources. The engine runs synchronously
//! with the mutation's response, so a caller observing a successful mutation
//! sees a coherent cache on its next read.

// crates.io
use regex::Regex;
use serde_json::{Map as JsonMap, Value};
// self
use crate::{
    _prelude::*,
    cache::store::CacheStore,
    ops::{Event, Mutation, Resource},
};

/// Cascades deeper than this are cut off to prevent amplification.
pub const MAX_CASCADE_DEPTH: u8 = 3;

/// A mutation observed by the router, normalized for rule matching.
#[derive(Clone, Debug)]
pub struct InvalidationEvent {
    /// Resource family that changed.
    pub resource: Resource,
    /// What happened to it.
    pub event: Event,
    /// Primary identifier of the changed entity, when known.
    pub id: Option<i64>,
    /// Related entities named by the mutation's params or response.
    pub related: Vec<RelatedRef>,
}
impl InvalidationEvent {
    /// Build an event from an operation's mutation class, its rendered
    /// params, and the upstream response body.
    pub fn from_mutation(
        mutation: Mutation,
        params: &JsonMap<String, Value>,
        response: &Value,
    ) -> Self {
        let id_param = match mutation.resource {
            Resource::ApplicationPasswords => "user_id",
            _ => "id",
        };
        let id = params
            .get(id_param)
            .and_then(Value::as_i64)
            .or_else(|| response.get("id").and_then(Value::as_i64));
        let mut related = Vec::new();
        let mut collect_terms = |name: &str, resource: Resource| {
            if let Some(items) = params.get(name).and_then(Value::as_array) {
                related.extend(
                    items
                        .iter()
                        .filter_map(Value::as_i64)
                        .map(|id| RelatedRef { resource, id }),
                );
            }
        };

        match mutation.resource {
            Resource::Posts | Resource::Pages => {
                collect_terms("categories", Resource::Categories);
                collect_terms("tags", Resource::Tags);
            }
            Resource::Comments => {
                if let Some(post) = params
                    .get("post")
                    .and_then(Value::as_i64)
                    .or_else(|| response.get("post").and_then(Value::as_i64))
                {
                    related.push(RelatedRef {
                        resource: Resource::Posts,
                        id: post,
                    });
                }
            }
            _ => {}
        }

        Self {
            resource: mutation.resource,
            event: mutation.event,
            id,
            related,
        }
    }
}

/// Reference to an entity affected alongside the primary mutation target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelatedRef {
    /// Resource family of the related entity.
    pub resource: Resource,
    /// Its identifier.
    pub id: i64,
}

#[derive(Clone, Copy, Debug)]
enum Pattern {
    /// Keys of `op` whose `param` equals the event id.
    Detail {
        op: &'static str,
        param: &'static str,
    },
    /// Every key of `op`.
    List(&'static str),
    /// Keys of `op` whose `param` list contains the event id.
    FilteredList {
        op: &'static str,
        param: &'static str,
    },
    /// Keys of `op` whose `param` equals a related id of `resource`; falls
    /// back to every key of `op` when no related id is known.
    RelatedDetail {
        op: &'static str,
        param: &'static str,
        resource: Resource,
    },
}

#[derive(Clone, Copy, Debug)]
struct Rule {
    resource: Resource,
    patterns: &'static [Pattern],
    cascades: &'static [Resource],
}

static RULES: &[Rule] = &[
    Rule {
        resource: Resource::Posts,
        patterns: &[
            Pattern::Detail {
                op: "getPost",
                param: "id",
            },
            Pattern::Detail {
                op: "getPostRevisions",
                param: "id",
            },
            Pattern::Detail {
                op: "getSeoMetadata",
                param: "id",
            },
            Pattern::List("listPosts"),
            Pattern::List("searchSite"),
        ],
        cascades: &[Resource::Categories, Resource::Tags],
    },
    Rule {
        resource: Resource::Pages,
        patterns: &[
            Pattern::Detail {
                op: "getPage",
                param: "id",
            },
            Pattern::Detail {
                op: "getPageRevisions",
                param: "id",
            },
            Pattern::List("listPages"),
            Pattern::List("searchSite"),
        ],
        cascades: &[],
    },
    Rule {
        resource: Resource::Media,
        patterns: &[
            Pattern::Detail {
                op: "getMedia",
                param: "id",
            },
            Pattern::List("listMedia"),
        ],
        cascades: &[],
    },
    Rule {
        resource: Resource::Users,
        patterns: &[
            Pattern::Detail {
                op: "getUser",
                param: "id",
            },
            Pattern::List("listUsers"),
            Pattern::Detail {
                op: "listApplicationPasswords",
                param: "user_id",
            },
        ],
        cascades: &[],
    },
    Rule {
        resource: Resource::Comments,
        patterns: &[
            Pattern::Detail {
                op: "getComment",
                param: "id",
            },
            Pattern::RelatedDetail {
                op: "listComments",
                param: "post",
                resource: Resource::Posts,
            },
        ],
        cascades: &[],
    },
    Rule {
        resource: Resource::Categories,
        patterns: &[
            Pattern::Detail {
                op: "getCategory",
                param: "id",
            },
            Pattern::List("listCategories"),
            Pattern::FilteredList {
                op: "listPosts",
                param: "categories",
            },
        ],
        cascades: &[],
    },
    Rule {
        resource: Resource::Tags,
        patterns: &[
            Pattern::Detail {
                op: "getTag",
                param: "id",
            },
            Pattern::List("listTags"),
            Pattern::FilteredList {
                op: "listPosts",
                param: "tags",
            },
        ],
        cascades: &[],
    },
    Rule {
        resource: Resource::Settings,
        patterns: &[Pattern::List("getSiteSettings")],
        cascades: &[],
    },
    Rule {
        resource: Resource::ApplicationPasswords,
        patterns: &[Pattern::Detail {
            op: "listApplicationPasswords",
            param: "user_id",
        }],
        cascades: &[],
    },
    Rule {
        resource: Resource::Seo,
        patterns: &[
            Pattern::Detail {
                op: "getSeoMetadata",
                param: "id",
            },
            Pattern::Detail {
                op: "getPost",
                param: "id",
            },
        ],
        cascades: &[],
    },
];

/// Applies the rule table against one site's cache store.
#[derive(Clone, Debug)]
pub struct InvalidationEngine {
    site_id: Arc<str>,
    store: Arc<CacheStore>,
}
impl InvalidationEngine {
    /// Build an engine bound to one site's store.
    pub fn new(site_id: impl Into<Arc<str>>, store: Arc<CacheStore>) -> Self {
        Self {
            site_id: site_id.into(),
            store,
        }
    }

    /// Invalidate every cache entry the event's rule names, cascading into
    /// related resources up to [`MAX_CASCADE_DEPTH`].
    #[tracing::instrument(skip(self, event), fields(site = %self.site_id, resource = ?event.resource, op = ?event.event))]
    pub fn invalidate(&self, event: &InvalidationEvent) -> Result<usize> {
        let mut deleted = 0;

        self.apply(event, 0, &mut deleted)?;

        tracing::debug!(deleted, "cache invalidation complete");

        Ok(deleted)
    }

    fn apply(&self, event: &InvalidationEvent, depth: u8, deleted: &mut usize) -> Result<()> {
        if depth >= MAX_CASCADE_DEPTH {
            tracing::debug!(depth, "cascade depth bound reached");

            return Ok(());
        }

        let Some(rule) = RULES.iter().find(|rule| rule.resource == event.resource) else {
            return Ok(());
        };

        for pattern in rule.patterns {
            for regex in self.compile(pattern, event)? {
                *deleted += self.store.delete_pattern(&regex);
            }
        }

        for cascade in rule.cascades {
            for related in event
                .related
                .iter()
                .filter(|related| related.resource == *cascade)
            {
                let cascaded = InvalidationEvent {
                    resource: related.resource,
                    event: Event::Update,
                    id: Some(related.id),
                    related: Vec::new(),
                };

                self.apply(&cascaded, depth + 1, deleted)?;
            }
        }

        Ok(())
    }

    fn compile(&self, pattern: &Pattern, event: &InvalidationEvent) -> Result<Vec<Regex>> {
        let site = regex::escape(&self.site_id);
        let sources = match pattern {
            Pattern::Detail { op, param } => match event.id {
                Some(id) => vec![format!(
                    r"^site:{site}\|op:{op}\|p:(?:.*&)?{param}={id}(?:&.*)?$"
                )],
                // Without an id the detail entries cannot be targeted; drop
                // every key of the operation instead.
                None => vec![format!(r"^site:{site}\|op:{op}\|p:")],
            },
            Pattern::List(op) => vec![format!(r"^site:{site}\|op:{op}\|p:")],
            Pattern::FilteredList { op, param } => match event.id {
                Some(id) => vec![format!(
                    r"^site:{site}\|op:{op}\|p:(?:.*&)?{param}=(?:[^&]*,)?{id}(?:,[^&]*)?(?:&.*)?$"
                )],
                None => vec![format!(r"^site:{site}\|op:{op}\|p:")],
            },
            Pattern::RelatedDetail {
                op,
                param,
                resource,
            } => {
                let ids: Vec<i64> = event
                    .related
                    .iter()
                    .filter(|related| related.resource == *resource)
                    .map(|related| related.id)
                    .collect();

                if ids.is_empty() {
                    vec![format!(r"^site:{site}\|op:{op}\|p:")]
                } else {
                    ids.into_iter()
                        .map(|id| {
                            format!(r"^site:{site}\|op:{op}\|p:(?:.*&)?{param}={id}(?:&.*)?$")
                        })
                        .collect()
                }
            }
        };

        sources
            .into_iter()
            .map(|source| {
                Regex::new(&source)
                    .map_err(|err| Error::InvalidationFailed(format!("Bad pattern: {err}.")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    // crates.io
    use serde_json::json;
    // self
    use super::*;
    use crate::{
        cache::store::{CacheStore, CachedResponse, Lookup},
        http::semantics::{ListMeta, Validators},
    };

    fn store_with(keys: &[&str]) -> Arc<CacheStore> {
        let store = Arc::new(CacheStore::new(u64::MAX));

        for key in keys {
            store.set(
                (*key).to_owned(),
                CachedResponse {
                    status: 200,
                    body: Arc::new(json!({})),
                    validators: Validators::default(),
                    list_meta: ListMeta::default(),
                },
                Duration::from_secs(300),
            );
        }

        store
    }

    fn present(store: &CacheStore, key: &str) -> bool {
        matches!(store.lookup(key, Duration::ZERO), Lookup::Hit(_))
    }

    #[test]
    fn post_update_invalidates_detail_lists_and_search() {
        let store = store_with(&[
            "site:s1|op:getPost|p:id=42",
            "site:s1|op:getPost|p:id=7",
            "site:s1|op:getPostRevisions|p:id=42",
            "site:s1|op:listPosts|p:-",
            "site:s1|op:listPosts|p:page=2&per_page=10",
            "site:s1|op:searchSite|p:search=hello",
            "site:s1|op:getPage|p:id=42",
        ]);
        let engine = InvalidationEngine::new("s1", store.clone());
        let event = InvalidationEvent {
            resource: Resource::Posts,
            event: Event::Update,
            id: Some(42),
            related: Vec::new(),
        };
        let deleted = engine.invalidate(&event).expect("invalidate");

        assert_eq!(deleted, 5);
        assert!(!present(&store, "site:s1|op:getPost|p:id=42"));
        assert!(present(&store, "site:s1|op:getPost|p:id=7"));
        assert!(!present(&store, "site:s1|op:listPosts|p:-"));
        assert!(!present(&store, "site:s1|op:searchSite|p:search=hello"));
        assert!(present(&store, "site:s1|op:getPage|p:id=42"));
    }

    #[test]
    fn comment_update_targets_the_parent_posts_listings() {
        let store = store_with(&[
            "site:s1|op:getComment|p:id=9",
            "site:s1|op:listComments|p:post=5",
            "site:s1|op:listComments|p:post=6",
        ]);
        let engine = InvalidationEngine::new("s1", store.clone());
        let event = InvalidationEvent::from_mutation(
            Mutation {
                resource: Resource::Comments,
                event: Event::Update,
            },
            json!({ "id": 9, "content": "hi" })
                .as_object()
                .expect("object"),
            &json!({ "id": 9, "post": 5 }),
        );
        let deleted = engine.invalidate(&event).expect("invalidate");

        assert_eq!(deleted, 2);
        assert!(present(&store, "site:s1|op:listComments|p:post=6"));
    }

    #[test]
    fn category_update_drops_filtered_post_listings() {
        let store = store_with(&[
            "site:s1|op:getCategory|p:id=3",
            "site:s1|op:listCategories|p:-",
            "site:s1|op:listPosts|p:categories=3",
            "site:s1|op:listPosts|p:categories=2,3&page=1",
            "site:s1|op:listPosts|p:categories=30",
            "site:s1|op:listPosts|p:-",
        ]);
        let engine = InvalidationEngine::new("s1", store.clone());
        let event = InvalidationEvent {
            resource: Resource::Categories,
            event: Event::Update,
            id: Some(3),
            related: Vec::new(),
        };

        engine.invalidate(&event).expect("invalidate");

        assert!(!present(&store, "site:s1|op:listPosts|p:categories=3"));
        assert!(!present(
            &store,
            "site:s1|op:listPosts|p:categories=2,3&page=1"
        ));
        assert!(present(&store, "site:s1|op:listPosts|p:categories=30"));
        assert!(present(&store, "site:s1|op:listPosts|p:-"));
    }

    #[test]
    fn post_update_cascades_into_its_terms() {
        let store = store_with(&[
            "site:s1|op:getPost|p:id=42",
            "site:s1|op:getCategory|p:id=3",
            "site:s1|op:listCategories|p:-",
            "site:s1|op:getTag|p:id=8",
            "site:s1|op:listTags|p:-",
        ]);
        let engine = InvalidationEngine::new("s1", store.clone());
        let event = InvalidationEvent::from_mutation(
            Mutation {
                resource: Resource::Posts,
                event: Event::Update,
            },
            json!({ "id": 42, "categories": [3], "tags": [8] })
                .as_object()
                .expect("object"),
            &json!({ "id": 42 }),
        );

        engine.invalidate(&event).expect("invalidate");

        assert!(!present(&store, "site:s1|op:getCategory|p:id=3"));
        assert!(!present(&store, "site:s1|op:listCategories|p:-"));
        assert!(!present(&store, "site:s1|op:getTag|p:id=8"));
        assert!(!present(&store, "site:s1|op:listTags|p:-"));
    }

    #[test]
    fn events_are_isolated_per_site() {
        let store = store_with(&["site:s2|op:getPost|p:id=42"]);
        let engine = InvalidationEngine::new("s1", store.clone());
        let event = InvalidationEvent {
            resource: Resource::Posts,
            event: Event::Update,
            id: Some(42),
            related: Vec::new(),
        };
        let deleted = engine.invalidate(&event).expect("invalidate");

        assert_eq!(deleted, 0);
        assert!(present(&store, "site:s2|op:getPost|p:id=42"));
    }

    #[test]
    fn event_builder_reads_ids_from_params_and_response() {
        let event = InvalidationEvent::from_mutation(
            Mutation {
                resource: Resource::Posts,
                event: Event::Create,
            },
            json!({ "title": "New" }).as_object().expect("object"),
            &json!({ "id": 77 }),
        );

        assert_eq!(event.id, Some(77));

        let event = InvalidationEvent::from_mutation(
            Mutation {
                resource: Resource::ApplicationPasswords,
                event: Event::Create,
            },
            json!({ "user_id": 12, "name": "ci" })
                .as_object()
                .expect("object"),
            &json!({ "uuid": "a-b-c" }),
        );

        assert_eq!(event.id, Some(12));
    }
}
