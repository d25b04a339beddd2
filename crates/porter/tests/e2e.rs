//! End-to-end tests for the authorize-then-forward pipeline.
//!
//! A mock introspection authority and a mock backend run in-process on
//! ephemeral ports; the proxy is served in front of them exactly as the
//! binary would serve it.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Form, Json, Router,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use porter::{app::router, forward::Forwarder};
use porter_auth::auth::IntrospectionClient;
use reqwest::Url;
use tokio::net::TcpListener;

// ── Shared helpers ────────────────────────────────────────────────────────────

const ACTIVE_TOKEN: &str = "tok123";
const SERVICE_TOKEN: &str = "svc-key";

#[derive(Clone, Copy)]
enum AuthorityMode {
    Healthy,
    Slow,
    Failing,
}

#[derive(Clone, Default)]
struct Introspections(Arc<Mutex<Vec<(String, String)>>>);

impl Introspections {
    /// Tokens submitted for introspection, in order.
    fn tokens(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    /// Authorization headers the authority saw.
    fn service_credentials(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }
}

struct Received {
    method: String,
    uri: String,
    headers: HeaderMap,
    body: String,
}

#[derive(Clone, Default)]
struct BackendLog(Arc<Mutex<Vec<Received>>>);

impl BackendLog {
    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap()
    });
    addr
}

async fn start_authority(mode: AuthorityMode) -> (String, Introspections) {
    let calls = Introspections::default();
    let seen = calls.clone();
    let app = Router::new().route(
        "/admin/oauth2/introspect",
        post(
            move |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let token = form.get("token").cloned().unwrap_or_default();
                    seen.0.lock().unwrap().push((auth, token.clone()));

                    match mode {
                        AuthorityMode::Failing => {
                            let status = StatusCode::SERVICE_UNAVAILABLE;
                            return (status, "maintenance").into_response();
                        }
                        AuthorityMode::Slow => tokio::time::sleep(Duration::from_secs(5)).await,
                        AuthorityMode::Healthy => {}
                    }

                    Json(serde_json::json!({
                        "active": token == ACTIVE_TOKEN,
                        "sub": "user-1",
                        "client_id": "mobile-app",
                    }))
                    .into_response()
                }
            },
        ),
    );
    let addr = serve(app).await;
    (format!("http://{addr}"), calls)
}

async fn start_backend() -> (String, BackendLog) {
    let log = BackendLog::default();
    let sink = log.clone();
    let app = Router::new().fallback(move |req: Request| {
        let sink = sink.clone();
        async move {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let headers = req.headers().clone();
            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .unwrap();
            sink.0.lock().unwrap().push(Received {
                method,
                uri,
                headers,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
            (
                StatusCode::ACCEPTED,
                [("x-backend", "orders"), ("content-type", "text/plain")],
                "backend says hi",
            )
        }
    });
    let addr = serve(app).await;
    (format!("http://{addr}"), log)
}

async fn start_proxy(authority: &str, backend: &str) -> String {
    let introspection = IntrospectionClient::builder(authority, SERVICE_TOKEN)
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let forwarder = Forwarder::new(Url::parse(backend).unwrap(), Some(Duration::from_secs(5)))
        .unwrap();
    let addr = serve(router(introspection, forwarder)).await;
    format!("http://{addr}")
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_active_credential_is_forwarded_verbatim() {
    let (authority, introspections) = start_authority(AuthorityMode::Healthy).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;

    let response = reqwest::Client::new()
        .post(format!("{proxy}/orders?page=2"))
        .header("authorization", "Bearer tok123")
        .header("x-request-id", "req-1")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-backend"], "orders");
    assert_eq!(response.text().await.unwrap(), "backend says hi");

    assert_eq!(introspections.tokens(), [ACTIVE_TOKEN]);
    assert_eq!(introspections.service_credentials(), ["Bearer svc-key"]);

    let received = log.0.lock().unwrap();
    assert_eq!(received.len(), 1);
    let req = &received[0];
    assert_eq!(req.method, "POST");
    assert_eq!(req.uri, "/orders?page=2");
    assert_eq!(req.body, "payload");
    assert_eq!(req.headers["authorization"], "Bearer tok123");
    assert_eq!(req.headers["x-request-id"], "req-1");
    assert_eq!(req.headers["x-forwarded-for"], "127.0.0.1");
}

#[tokio::test]
async fn scenario_b_original_authorization_replaces_credential() {
    let (authority, introspections) = start_authority(AuthorityMode::Healthy).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;

    let response = reqwest::Client::new()
        .get(format!("{proxy}/profile"))
        .header("authorization", "Bearer tok123")
        .header("x-original-authorization", "Bearer realuser")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(introspections.tokens(), [ACTIVE_TOKEN]);

    let received = log.0.lock().unwrap();
    assert_eq!(received[0].headers["authorization"], "Bearer realuser");
}

#[tokio::test]
async fn scenario_c_missing_credential_makes_no_outbound_calls() {
    let (authority, introspections) = start_authority(AuthorityMode::Healthy).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;

    let response = reqwest::Client::new()
        .get(format!("{proxy}/orders"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.text().await.unwrap().is_empty());
    assert!(introspections.tokens().is_empty());
    assert_eq!(log.len(), 0);
}

#[tokio::test]
async fn scenario_d_authority_timeout_is_internal_error() {
    let (authority, _) = start_authority(AuthorityMode::Slow).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;

    let response = reqwest::Client::new()
        .get(format!("{proxy}/orders"))
        .header("authorization", "Bearer tok123")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(log.len(), 0);
}

// ── Rejections and failures ───────────────────────────────────────────────────

#[tokio::test]
async fn inactive_credential_is_unauthorized() {
    let (authority, introspections) = start_authority(AuthorityMode::Healthy).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;

    let response = reqwest::Client::new()
        .delete(format!("{proxy}/orders/7"))
        .header("authorization", "Bearer revoked")
        .header("x-original-authorization", "Bearer realuser")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(introspections.tokens(), ["revoked"]);
    assert_eq!(log.len(), 0);
}

#[tokio::test]
async fn malformed_credential_is_unauthorized() {
    let (authority, introspections) = start_authority(AuthorityMode::Healthy).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;
    let client = reqwest::Client::new();

    for value in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer tok123 extra"] {
        let response = client
            .get(format!("{proxy}/orders"))
            .header("authorization", value)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{value}");
    }

    assert!(introspections.tokens().is_empty());
    assert_eq!(log.len(), 0);
}

#[tokio::test]
async fn authority_error_status_is_internal_error() {
    let (authority, introspections) = start_authority(AuthorityMode::Failing).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;

    let response = reqwest::Client::new()
        .get(format!("{proxy}/orders"))
        .header("authorization", "Bearer tok123")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(introspections.tokens(), [ACTIVE_TOKEN]);
    assert_eq!(log.len(), 0);
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    let (authority, _) = start_authority(AuthorityMode::Healthy).await;
    let proxy = start_proxy(&authority, "http://127.0.0.1:1").await;

    let response = reqwest::Client::new()
        .get(format!("{proxy}/orders"))
        .header("authorization", "Bearer tok123")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn concurrent_requests_are_authorized_independently() {
    let (authority, introspections) = start_authority(AuthorityMode::Healthy).await;
    let (backend, log) = start_backend().await;
    let proxy = start_proxy(&authority, &backend).await;
    let client = reqwest::Client::new();

    let requests = (0..8).map(|i| {
        let client = client.clone();
        let url = format!("{proxy}/orders/{i}");
        async move {
            let token = if i % 2 == 0 { "Bearer tok123" } else { "Bearer nope" };
            client
                .get(url)
                .header("authorization", token)
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures::future::join_all(requests).await;

    for (i, status) in statuses.into_iter().enumerate() {
        let expected = if i % 2 == 0 {
            StatusCode::ACCEPTED
        } else {
            StatusCode::UNAUTHORIZED
        };
        assert_eq!(status, expected, "request {i}");
    }
    assert_eq!(introspections.tokens().len(), 8);
    assert_eq!(log.len(), 4);
}
