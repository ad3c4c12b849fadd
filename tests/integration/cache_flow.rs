//! Integration coverage for caching, single-flight, revalidation, and
//! mutation-driven invalidation.

// std
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
// crates.io
use serde_json::{Map as JsonMap, Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};
use wp_relay::{CredentialBundle, Ctx, Error, Result, Router, SiteConfig, security::Secret};

fn params(value: Value) -> JsonMap<String, Value> {
    value.as_object().expect("object literal").clone()
}

fn site(id: &str, base: &str) -> SiteConfig {
    SiteConfig::new(
        id,
        base,
        CredentialBundle::AppPassword {
            username: "admin".into(),
            app_password: Secret::new("abcd efgh"),
        },
    )
    .expect("site config")
}

#[tokio::test]
async fn second_read_is_served_from_cache() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42, "title": "Hi" })))
        .expect(1)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::background();

    let first = router
        .execute("s1", "getPost", params(json!({ "id": 42 })), &ctx)
        .await?;
    let second = router
        .execute("s1", "getPost", params(json!({ "id": 42 })), &ctx)
        .await?;

    assert!(!first.meta.from_cache);
    assert!(second.meta.from_cache);
    assert_eq!(*first.body, json!({ "id": 42, "title": "Hi" }));
    assert_eq!(*second.body, *first.body);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn mutation_invalidates_listing_caches() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "id": 42, "title": "Hi" }]))
                .insert_header("x-wp-total", "1")
                .insert_header("x-wp-totalpages", "1"),
        )
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wp/v2/posts/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42, "title": "Hi2" })))
        .expect(1)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::background();

    let listed = router
        .execute("s1", "listPosts", JsonMap::new(), &ctx)
        .await?;

    assert_eq!(listed.meta.total, Some(1));

    // Warm hit before the mutation.
    let warm = router
        .execute("s1", "listPosts", JsonMap::new(), &ctx)
        .await?;

    assert!(warm.meta.from_cache);

    router
        .execute(
            "s1",
            "updatePost",
            params(json!({ "id": 42, "title": "Hi2" })),
            &ctx,
        )
        .await?;

    // The mutation evicted the listing; this read goes upstream again.
    let relisted = router
        .execute("s1", "listPosts", JsonMap::new(), &ctx)
        .await?;

    assert!(!relisted.meta.from_cache);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_identical_reads_share_one_upstream_call() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": 1 }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let started = Instant::now();
    let mut handles = Vec::with_capacity(50);

    for _ in 0..50 {
        let router = router.clone();

        handles.push(tokio::spawn(async move {
            router
                .execute(
                    "s1",
                    "getPost",
                    params(json!({ "id": 1 })),
                    &Ctx::background(),
                )
                .await
        }));
    }

    for handle in handles {
        let execution = handle.await.expect("join")?;

        assert_eq!(*execution.body, json!({ "id": 1 }));
    }

    assert!(
        started.elapsed() < Duration::from_secs(2),
        "joiners should share one fetch"
    );

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn stale_entries_revalidate_with_conditional_headers() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/7"))
        .respond_with(move |request: &wiremock::Request| {
            let index = counter.fetch_add(1, Ordering::SeqCst);

            match index {
                0 => ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": 7, "title": "Cached" }))
                    .insert_header("cache-control", "public, max-age=1")
                    .insert_header("etag", "\"v1\""),
                _ => {
                    assert!(
                        request.headers.contains_key("if-none-match"),
                        "conditional header missing"
                    );

                    ResponseTemplate::new(304)
                        .insert_header("cache-control", "public, max-age=60")
                        .insert_header("etag", "\"v1\"")
                }
            }
        })
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::background();

    let first = router
        .execute("s1", "getPost", params(json!({ "id": 7 })), &ctx)
        .await?;

    assert!(!first.meta.from_cache);

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Expired but within the revalidation grace window; the 304 refreshes
    // the entry in place.
    let second = router
        .execute("s1", "getPost", params(json!({ "id": 7 })), &ctx)
        .await?;

    assert!(second.meta.from_cache);
    assert_eq!(*second.body, json!({ "id": 7, "title": "Cached" }));

    // The refreshed TTL serves the next read without touching upstream.
    let third = router
        .execute("s1", "getPost", params(json!({ "id": 7 })), &ctx)
        .await?;

    assert!(third.meta.from_cache);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn not_found_is_negatively_cached() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/404"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "code": "rest_post_invalid_id" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::background();

    let first = router
        .execute("s1", "getPost", params(json!({ "id": 404 })), &ctx)
        .await;
    let second = router
        .execute("s1", "getPost", params(json!({ "id": 404 })), &ctx)
        .await;

    assert!(matches!(
        first,
        Err(Error::UpstreamClient { status: 404, .. })
    ));
    assert!(matches!(
        second,
        Err(Error::UpstreamClient { status: 404, .. })
    ));

    server.verify().await;
    Ok(())
}
