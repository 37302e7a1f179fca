use anyhow::Result;
use axum::{
    extract::Extension,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use disparador_dispatch::DispatchService;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing;

use crate::auth;
use crate::handlers;
use crate::websocket;

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some(origins) if origins.trim() != "*" => {
            let mut allowed = Vec::new();
            for origin in origins.split(',').map(|s| s.trim()).filter(|s| !s.is_empty() && *s != "*") {
                match origin.parse::<HeaderValue>() {
                    Ok(parsed) => allowed.push(parsed),
                    Err(_) => tracing::warn!("Ignoring invalid CORS origin: {}", origin),
                }
            }
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

pub fn build_router(service: DispatchService) -> Router {
    let cors = cors_layer(service.context().config.server.cors_origins.as_deref());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws/dispatches/:id", get(websocket::websocket_handler))
        .route("/api/v1/dispatches", post(handlers::create_dispatch))
        .route(
            "/api/v1/dispatches/:id",
            get(handlers::get_dispatch).delete(handlers::delete_dispatch),
        )
        .route(auth::STATUS_WEBHOOK_PATH, post(handlers::update_contact_status))
        .route("/api/v1/dashboard", get(handlers::dashboard))
        .layer(
            // CORS sits outside auth so preflights are answered and rejections carry CORS headers
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(Extension(service))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}

pub async fn run(service: DispatchService) -> Result<()> {
    let server = &service.context().config.server;
    let addr: SocketAddr = format!("{}:{}", server.host, server.api_port).parse()?;
    let app = build_router(service);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_token, UNIQUE_ID_HEADER};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use disparador_core::types::{InstanceStatus, Profile, WhatsAppInstance};
    use disparador_core::{Config, DispatchContext, MemoryFeed, MemoryStore};
    use disparador_dispatch::{RelayClient, RelayJob};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const APP_ORIGIN: &str = "https://app.disparador.ai";

    struct AcceptingRelay;

    #[async_trait]
    impl RelayClient for AcceptingRelay {
        async fn forward(&self, _job: &RelayJob) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct TestApp {
        router: Router,
        secret: String,
        owner: Profile,
        stranger: Profile,
        admin: Profile,
        instance_id: Uuid,
    }

    fn profile(is_admin: bool) -> Profile {
        let id = Uuid::new_v4();
        Profile {
            id,
            email: format!("{}@example.com", id),
            is_admin,
            unique_id: format!("uid-{}", id),
            webhook_url: Some("https://agent.example.com/hook".to_string()),
            created_at: Utc::now(),
        }
    }

    fn app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let mut config = Config::from_env();
        config.server.cors_origins = Some(APP_ORIGIN.to_string());
        let secret = config.server.jwt_secret.clone();

        let owner = profile(false);
        let stranger = profile(false);
        let admin = profile(true);
        let instance = WhatsAppInstance {
            id: Uuid::new_v4(),
            user_id: owner.id,
            name: "Principal".to_string(),
            status: InstanceStatus::Connected,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let instance_id = instance.id;

        for p in [owner.clone(), stranger.clone(), admin.clone()] {
            store.insert_profile(p).unwrap();
        }
        store.insert_instance(instance).unwrap();

        let ctx = DispatchContext::from_parts(config, store, Arc::new(MemoryFeed::default()));
        let service = DispatchService::new(ctx, Arc::new(AcceptingRelay));

        TestApp {
            router: build_router(service),
            secret,
            owner,
            stranger,
            admin,
            instance_id,
        }
    }

    impl TestApp {
        fn bearer(&self, profile: &Profile) -> String {
            format!("Bearer {}", generate_token(profile.id, &self.secret, 1).unwrap())
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(req).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        async fn create(&self, phones: &[&str]) -> Uuid {
            let contacts: Vec<Value> = phones
                .iter()
                .map(|p| json!({ "name": format!("Contato {}", p), "phone": p }))
                .collect();
            let req = Request::post("/api/v1/dispatches")
                .header("authorization", self.bearer(&self.owner))
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "message": "Olá!",
                        "instanceId": self.instance_id,
                        "isAiDispatch": false,
                        "contacts": contacts,
                    })
                    .to_string(),
                ))
                .unwrap();

            let (status, body) = self.send(req).await;
            assert_eq!(status, StatusCode::CREATED);
            Uuid::parse_str(body["dispatchId"].as_str().unwrap()).unwrap()
        }

        fn status_update(&self, unique_id: &str, dispatch_id: Uuid, phone: &str, status: &str) -> Request<Body> {
            Request::post("/api/v1/webhook/status")
                .header(UNIQUE_ID_HEADER, unique_id)
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "dispatchId": dispatch_id, "phone": phone, "status": status }).to_string(),
                ))
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let app = app();
        let (status, body) = app
            .send(Request::get("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_cors_preflight_is_answered_without_auth() {
        let app = app();
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/v1/dispatches")
            .header("origin", APP_ORIGIN)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "authorization,content-type")
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(req).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            APP_ORIGIN
        );
    }

    #[tokio::test]
    async fn test_rejected_request_still_carries_cors_headers() {
        let app = app();
        let req = Request::get("/api/v1/dashboard")
            .header("origin", APP_ORIGIN)
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            APP_ORIGIN
        );
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_rejected() {
        let app = app();
        let (status, _) = app
            .send(Request::get("/api/v1/dashboard").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send(
                Request::get("/api/v1/dashboard")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_dispatch_lists_violations() {
        let app = app();
        let req = Request::post("/api/v1/dispatches")
            .header("authorization", app.bearer(&app.owner))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "message": " ", "instanceId": "", "contacts": [] }).to_string(),
            ))
            .unwrap();

        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let rules: Vec<&str> = body["violations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["rule"].as_str().unwrap())
            .collect();
        assert!(rules.contains(&"missing_instance"));
        assert!(rules.contains(&"empty_message"));
        assert!(rules.contains(&"no_contacts"));
    }

    #[tokio::test]
    async fn test_status_webhook_updates_counters() {
        let app = app();
        let id = app.create(&["5511900000001", "5511900000002"]).await;

        let (status, body) = app
            .send(app.status_update(&app.owner.unique_id, id, "5511900000001", "success"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["errorCount"], 0);

        let (_, body) = app
            .send(app.status_update(&app.owner.unique_id, id, "5511900000002", "error"))
            .await;
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["errorCount"], 1);

        let req = Request::get(format!("/api/v1/dispatches/{}", id))
            .header("authorization", app.bearer(&app.owner))
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contacts"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_webhook_rejects_unknown_or_foreign_caller() {
        let app = app();
        let id = app.create(&["1"]).await;

        let (status, _) = app.send(app.status_update("nobody", id, "1", "success")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send(app.status_update(&app.stranger.unique_id, id, "1", "success"))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send(app.status_update(&app.owner.unique_id, Uuid::new_v4(), "1", "success"))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .send(app.status_update(&app.owner.unique_id, id, "1", "pending"))
            .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_dashboard_impersonation() {
        let app = app();
        let id = app.create(&["1"]).await;

        let req = Request::get(format!("/api/v1/dashboard?selectedUserId={}", app.owner.id))
            .header("authorization", app.bearer(&app.admin))
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["effectiveUserId"], app.owner.id.to_string());
        assert_eq!(body["latest"]["id"], id.to_string());
        assert_eq!(body["pollIntervalSecs"], 3);

        let req = Request::get(format!("/api/v1/dashboard?selectedUserId={}", app.owner.id))
            .header("authorization", app.bearer(&app.stranger))
            .body(Body::empty())
            .unwrap();
        let (status, _) = app.send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_delete_dispatch() {
        let app = app();
        let id = app.create(&["1", "2"]).await;

        let delete = |profile: &Profile| {
            Request::delete(format!("/api/v1/dispatches/{}", id))
                .header("authorization", app.bearer(profile))
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = app.send(delete(&app.stranger)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.send(delete(&app.owner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deletedContacts"], 2);

        let (status, _) = app.send(delete(&app.owner)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
