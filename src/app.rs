use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::users::repo::UserStore;
use crate::{auth, qr, users};

const SERVICE_NAME: &str = "User/Auth/QR Microservice";

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(qr::router())
        .route("/", get(root))
        .route("/health/db", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": format!("{SERVICE_NAME} API"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "service": SERVICE_NAME,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            Json(json!({
                "status": "unhealthy",
                "database": "disconnected",
                "error": e.to_string(),
            }))
        }
    }
}

pub async fn serve(app: Router, addr: SocketAddr, store: Arc<dyn UserStore>) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    store.close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::{auth::jwt::ACCESS_TOKEN_TTL, users::repo_types::Role};

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(app: &Router, name: &str, role: &str) -> Value {
        let (status, body) = call(
            app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({
                "username": name,
                "email": format!("{name}@example.com"),
                "password": "pa55word",
                "full_name": format!("{name} tester"),
                "role": role,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn login(app: &Router, name: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": format!("{name}@example.com"), "password": "pa55word" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["token_type"], "bearer");
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn register_login_and_read_own_profile() {
        let app = build_app(AppState::fake());
        let created = register(&app, "alice", "student").await;
        assert!(created.get("password_hash").is_none());
        assert!(created["qr_code"].is_null());

        let token = login(&app, "alice").await;
        let (status, me) = call(&app, Method::GET, "/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], created["id"]);
        assert_eq!(me["username"], "alice");
        assert_eq!(me["email"], "alice@example.com");
        assert_eq!(me["role"], "student");
        assert_eq!(me["full_name"], "alice tester");
        assert!(me.get("password_hash").is_none());
        assert!(me.get("password").is_none());

        let id = created["id"].as_str().unwrap();
        let (status, by_id) = call(&app, Method::GET, &format!("/users/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_id["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn wrong_password_gets_no_token() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "student").await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "alice@example.com", "password": "nope-nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("access_token").is_none());
        assert_eq!(body["detail"], "Incorrect email or password");
    }

    #[tokio::test]
    async fn duplicate_registration_is_client_error() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "student").await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "email": "new@example.com", "password": "pa55word" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bearer_failures_are_unauthenticated() {
        let state = AppState::fake();
        let keys = state.keys.clone();
        let app = build_app(state);

        let (status, _) = call(&app, Method::GET, "/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, Method::GET, "/users/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid authentication token");

        let created = register(&app, "alice", "student").await;
        let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
        let stale = keys
            .issue_at(id, Role::Student, OffsetDateTime::now_utc() - ACCESS_TOKEN_TTL - Duration::seconds(5))
            .unwrap();
        let (status, body) = call(&app, Method::GET, "/users/me", Some(&stale), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Token has expired");

        let ghost = keys.issue(Uuid::new_v4(), Role::Admin).unwrap();
        let (status, body) = call(&app, Method::GET, "/users", Some(&ghost), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "User not found");
    }

    #[tokio::test]
    async fn by_id_lookup_checks_existence_before_policy() {
        let app = build_app(AppState::fake());
        register(&app, "alice", "student").await;
        let bob = register(&app, "bob", "teacher").await;
        let token = login(&app, "alice").await;

        let bob_id = bob["id"].as_str().unwrap();
        let (status, _) = call(&app, Method::GET, &format!("/users/{bob_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = Uuid::new_v4();
        let (status, _) = call(&app, Method::GET, &format!("/users/{missing}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::GET, "/users/not-an-id", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid user ID format");
    }

    #[tokio::test]
    async fn listing_is_admin_only() {
        let app = build_app(AppState::fake());
        register(&app, "root", "admin").await;
        register(&app, "alice", "student").await;

        let admin = login(&app, "root").await;
        let (status, list) = call(&app, Method::GET, "/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 2);

        let student = login(&app, "alice").await;
        let (status, _) = call(&app, Method::GET, "/users", Some(&student), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn token_role_is_trusted_over_stored_role() {
        let state = AppState::fake();
        let keys = state.keys.clone();
        let app = build_app(state);
        let alice = register(&app, "alice", "student").await;
        let root = register(&app, "root", "admin").await;

        let alice_id: Uuid = alice["id"].as_str().unwrap().parse().unwrap();
        let as_admin = keys.issue(alice_id, Role::Admin).unwrap();
        let (status, list) = call(&app, Method::GET, "/users", Some(&as_admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 2);

        let root_id: Uuid = root["id"].as_str().unwrap().parse().unwrap();
        let as_student = keys.issue(root_id, Role::Student).unwrap();
        let (status, body) = call(&app, Method::GET, "/users", Some(&as_student), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn unreadable_auth_bodies_are_detail_errors() {
        let app = build_app(AppState::fake());

        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "email": "alice@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string(), "{body}");

        // no content type, no body
        let (status, body) = call(&app, Method::POST, "/auth/login", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string(), "{body}");

        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!(["not", "an", "object"])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string(), "{body}");
    }

    #[tokio::test]
    async fn delete_self_or_as_admin() {
        let app = build_app(AppState::fake());
        register(&app, "root", "admin").await;
        let alice = register(&app, "alice", "student").await;
        let bob = register(&app, "bob", "teacher").await;
        let alice_id = alice["id"].as_str().unwrap();
        let bob_id = bob["id"].as_str().unwrap();

        let alice_token = login(&app, "alice").await;
        let (status, _) = call(&app, Method::DELETE, &format!("/users/{bob_id}"), Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, Method::DELETE, &format!("/users/{alice_id}"), Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], alice["id"]);

        // token still verifies but its subject is gone
        let (status, _) = call(&app, Method::GET, "/users/me", Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let admin = login(&app, "root").await;
        let (status, _) = call(&app, Method::DELETE, &format!("/users/{bob_id}"), Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::DELETE, &format!("/users/{bob_id}"), Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn qr_generate_then_fetch() {
        let app = build_app(AppState::fake());
        let alice = register(&app, "alice", "student").await;
        register(&app, "bob", "student").await;
        let alice_id = alice["id"].as_str().unwrap();
        let token = login(&app, "alice").await;

        let (status, _) = call(&app, Method::GET, &format!("/qr/{alice_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, generated) = call(&app, Method::POST, "/qr/generate", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            generated["data"],
            format!("USER:{alice_id}|EMAIL:alice@example.com|ROLE:student")
        );

        let (status, fetched) = call(&app, Method::GET, &format!("/qr/{alice_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["qr_code_base64"], generated["qr_code_base64"]);

        let (_, me) = call(&app, Method::GET, "/users/me", Some(&token), None).await;
        assert_eq!(me["qr_code"], generated["qr_code_base64"]);

        let bob = login(&app, "bob").await;
        let (status, _) = call(&app, Method::GET, &format!("/qr/{alice_id}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn root_and_health() {
        let app = build_app(AppState::fake());
        let (status, body) = call(&app, Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("QR"));

        let (status, body) = call(&app, Method::GET, "/health/db", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
