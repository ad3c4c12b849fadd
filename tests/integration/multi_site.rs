//! Integration coverage for multi-site routing, isolation, cancellation,
//! uploads, and diagnostics.

// std
use std::time::Duration;
// crates.io
use serde_json::{Map as JsonMap, Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header_exists, method, path},
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
async fn caches_are_isolated_per_site() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "site": "a" })))
        .expect(1)
        .mount(&server_a)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "site": "b" })))
        .expect(1)
        .mount(&server_b)
        .await;

    let router = Router::builder()
        .add_site(site("site-a", &server_a.uri()))
        .add_site(site("site-b", &server_b.uri()))
        .build()?;
    let ctx = Ctx::background();

    // Warm site-a's cache, then read the same key from site-b; the second
    // site must issue its own upstream call and see its own payload.
    let from_a = router
        .execute("site-a", "getPost", params(json!({ "id": 1 })), &ctx)
        .await?;
    let from_b = router
        .execute("site-b", "getPost", params(json!({ "id": 1 })), &ctx)
        .await?;

    assert_eq!(from_a.body["site"], json!("a"));
    assert_eq!(from_b.body["site"], json!("b"));
    assert!(!from_b.meta.from_cache);

    server_a.verify().await;
    server_b.verify().await;
    Ok(())
}

#[tokio::test]
async fn unknown_sites_are_rejected_before_any_network_io() -> Result<()> {
    let router = Router::builder().build()?;
    let err = router
        .execute(
            "ghost",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownSite { .. }));

    Ok(())
}

#[tokio::test]
async fn cancelled_context_prevents_the_send() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wp-json/wp/v2/posts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 9 })))
        .expect(0)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::background();

    ctx.cancel();

    let err = router
        .execute(
            "s1",
            "createPost",
            params(json!({ "title": "Draft" })),
            &ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn slow_upstreams_hit_the_caller_deadline() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wp-json/wp/v2/posts"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "id": 9 }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::with_timeout(Duration::from_millis(200));
    let err = router
        .execute(
            "s1",
            "createPost",
            params(json!({ "title": "Draft" })),
            &ctx,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout));

    Ok(())
}

#[tokio::test]
async fn uploads_stream_multipart_from_disk() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wp-json/wp/v2/media"))
        .and(header_exists("content-type"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 31 })))
        .expect(1)
        .mount(&server)
        .await;

    let payload_path = std::env::temp_dir().join("wp-relay-upload-test.bin");

    tokio::fs::write(&payload_path, vec![0x42u8; 256 * 1024]).await?;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let execution = router
        .execute(
            "s1",
            "uploadMedia",
            params(json!({
                "file": payload_path.to_string_lossy(),
                "title": "Screenshot",
            })),
            &Ctx::background(),
        )
        .await?;

    assert_eq!(execution.meta.status, 201);
    assert_eq!(execution.body["id"], json!(31));

    tokio::fs::remove_file(&payload_path).await?;
    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn diagnostics_track_traffic_per_site() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 3 })))
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(site("s1", &server.uri()))
        .build()?;
    let ctx = Ctx::background();

    router
        .execute("s1", "getPost", params(json!({ "id": 3 })), &ctx)
        .await?;
    router
        .execute("s1", "getPost", params(json!({ "id": 3 })), &ctx)
        .await?;

    let diagnostics = router.diagnostics("s1").await?;

    assert_eq!(diagnostics.requests.requests, 2);
    assert_eq!(diagnostics.requests.cache_hits, 1);
    assert_eq!(diagnostics.requests.upstream_calls, 1);
    assert_eq!(diagnostics.cache.entries, 1);
    assert_eq!(diagnostics.auth_method, "app-password");

    router.clear_cache("s1").await?;

    assert_eq!(router.diagnostics("s1").await?.cache.entries, 0);

    Ok(())
}
