//! Integration coverage for retry scheduling, `Retry-After` pacing, and the
//! 401-triggered credential refresh.

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

fn app_password_site(id: &str, base: &str) -> SiteConfig {
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

fn jwt_site(id: &str, base: &str) -> SiteConfig {
    SiteConfig::new(
        id,
        base,
        CredentialBundle::Jwt {
            username: "admin".into(),
            password: Secret::new("pw"),
            token: None,
        },
    )
    .expect("site config")
}

#[tokio::test]
async fn transient_errors_retry_with_growing_backoff() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(
            move |_: &wiremock::Request| match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => ResponseTemplate::new(500),
                _ => ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })),
            },
        )
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(app_password_site("s1", &server.uri()))
        .build()?;
    let started = Instant::now();
    let execution = router
        .execute(
            "s1",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await?;
    let elapsed = started.elapsed();

    assert_eq!(*execution.body, json!({ "id": 1 }));
    assert_eq!(execution.meta.retries, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Base 500 ms plus doubled 1000 ms, each minus at most 20 % jitter.
    assert!(
        elapsed >= Duration::from_millis(1200),
        "elapsed {elapsed:?} too short"
    );

    Ok(())
}

#[tokio::test]
async fn retry_after_is_honored_exactly() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(
            move |_: &wiremock::Request| match counter.fetch_add(1, Ordering::SeqCst) {
                0 => ResponseTemplate::new(429).insert_header("retry-after", "2"),
                _ => ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })),
            },
        )
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(app_password_site("s1", &server.uri()))
        .build()?;
    let started = Instant::now();
    let execution = router
        .execute(
            "s1",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await?;

    assert_eq!(execution.meta.retries, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(
        started.elapsed() >= Duration::from_secs(2),
        "Retry-After not honored"
    );

    Ok(())
}

#[tokio::test]
async fn attempts_stay_within_the_retry_budget() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let mut site = app_password_site("s1", &server.uri());

    site.settings.retry_attempts = 3;

    let router = Router::builder().add_site(site).build()?;
    let err = router
        .execute(
            "s1",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::UpstreamUnavailable {
            status: 503,
            attempts: 4,
            ..
        }
    ));

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn client_errors_never_retry() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "code": "rest_forbidden" })))
        .expect(1)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(app_password_site("s1", &server.uri()))
        .build()?;
    let err = router
        .execute(
            "s1",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpstreamClient { status: 403, .. }));

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn unauthorized_triggers_exactly_one_refresh() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let logins = Arc::new(AtomicUsize::new(0));
    let login_counter = logins.clone();

    Mock::given(method("POST"))
        .and(path("/wp-json/jwt-auth/v1/token"))
        .respond_with(move |_: &wiremock::Request| {
            let index = login_counter.fetch_add(1, Ordering::SeqCst);

            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": format!("t{index}"), "expires_in": 3600 }))
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(move |request: &wiremock::Request| {
            let authorization = request
                .headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();

            // The token from the first login is stale server-side; only the
            // refreshed credential passes.
            if authorization == "Bearer t0" {
                ResponseTemplate::new(401)
            } else {
                ResponseTemplate::new(200).set_body_json(json!({ "id": 1 }))
            }
        })
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(jwt_site("s1", &server.uri()))
        .build()?;
    let execution = router
        .execute(
            "s1",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await?;

    assert_eq!(*execution.body, json!({ "id": 1 }));
    assert_eq!(
        logins.load(Ordering::SeqCst),
        2,
        "initial login plus one forced refresh"
    );

    Ok(())
}

#[tokio::test]
async fn repeated_unauthorized_surfaces_auth_expired() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/wp-json/jwt-auth/v1/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "stale", "expires_in": 3600 })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/posts/1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(jwt_site("s1", &server.uri()))
        .build()?;
    let err = router
        .execute(
            "s1",
            "getPost",
            params(json!({ "id": 1 })),
            &Ctx::background(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AuthExpired));

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_login() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let server = MockServer::start().await;
    let logins = Arc::new(AtomicUsize::new(0));
    let login_counter = logins.clone();

    Mock::given(method("POST"))
        .and(path("/wp-json/jwt-auth/v1/token"))
        .respond_with(move |_: &wiremock::Request| {
            login_counter.fetch_add(1, Ordering::SeqCst);

            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "fresh", "expires_in": 3600 }))
                .set_delay(Duration::from_millis(100))
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wp-json/wp/v2/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "admin" })))
        .mount(&server)
        .await;

    let router = Router::builder()
        .add_site(jwt_site("s1", &server.uri()))
        .build()?;
    let mut handles = Vec::with_capacity(8);

    // validate_auth is uncached, so every task produces its own upstream
    // probe; the login behind it must still happen once.
    for _ in 0..8 {
        let router = router.clone();

        handles.push(tokio::spawn(async move {
            router.validate_auth("s1", &Ctx::background()).await
        }));
    }

    for handle in handles {
        assert!(handle.await.expect("join")?, "credential should validate");
    }

    assert_eq!(
        logins.load(Ordering::SeqCst),
        1,
        "login must be single-flight"
    );

    Ok(())
}
