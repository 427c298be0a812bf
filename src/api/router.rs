use axum::{middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::admin;
use super::health;
use super::middleware::metrics_middleware;
use super::state::AppState;
use super::v1;

/// Create the full router with application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        // Key holder API
        .nest("/v1", v1::create_v1_router())
        // Admin API
        .nest("/admin", admin::create_admin_router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(metrics_middleware)),
        )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::api::middleware::identity::{ORGANIZATION_ID_HEADER, USER_ID_HEADER};
    use crate::infrastructure::api_key::testing::{harness, Harness};

    async fn app() -> Router {
        let Harness { manager, .. } = harness().await;
        create_router(AppState::new(Arc::new(manager)))
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|value| value.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, body, retry_after)
    }

    fn admin_request(method: Method, uri: &str, user: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, user)
            .header(ORGANIZATION_ID_HEADER, "org-1");

        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn key_request(secret: &str) -> Request<Body> {
        Request::builder()
            .uri("/v1/key")
            .header(header::AUTHORIZATION, format!("Bearer {}", secret))
            .body(Body::empty())
            .unwrap()
    }

    async fn create(router: &Router, user: &str, body: Value) -> Value {
        let (status, body, _) = send(
            router,
            admin_request(Method::POST, "/admin/api-keys", user, Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let router = app().await;

        let (status, body, _) = send(
            &router,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body, _) = send(
            &router,
            Request::builder().uri("/ready").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"][0]["name"], "key_store");
        assert_eq!(body["checks"][0]["message"], "0 keys loaded");

        let (status, _, _) = send(
            &router,
            Request::builder().uri("/live").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_created_key_authenticates() {
        let router = app().await;

        let created = create(&router, "alice", json!({ "name": "ci" })).await;
        let secret = created["secret"].as_str().unwrap();
        assert!(secret.starts_with("pk_test_"));
        assert_eq!(created["owner_id"], "alice");
        assert!(created.get("encrypted_secret").is_none());

        let (status, body, _) = send(&router, key_request(secret)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api_key"]["id"], created["id"]);
        assert_eq!(body["rate_limit"]["remaining"]["minute"], 59);
        assert!(body["api_key"].get("secret").is_none());
    }

    #[tokio::test]
    async fn test_missing_and_unknown_keys_are_unauthorized() {
        let router = app().await;

        let (status, body, _) = send(
            &router,
            Request::builder().uri("/v1/key").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["type"], "authentication_error");

        let (status, _, _) = send(&router, key_request("pk_test_doesnotexist0000000000")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rate_limited_request_carries_retry_after() {
        let router = app().await;
        let created = create(
            &router,
            "alice",
            json!({
                "name": "tight",
                "rate_limits": { "per_minute": 1, "per_hour": 100, "per_day": 1000 }
            }),
        )
        .await;
        let secret = created["secret"].as_str().unwrap();

        let (status, _, _) = send(&router, key_request(secret)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body, retry_after) = send(&router, key_request(secret)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["type"], "rate_limit_error");
        let retry_after: i64 = retry_after.unwrap().parse().unwrap();
        assert!((1..=61).contains(&retry_after));
    }

    #[tokio::test]
    async fn test_ip_allowlist_is_forbidden() {
        let router = app().await;
        let created = create(
            &router,
            "alice",
            json!({ "name": "office", "allowed_ips": ["10.*"] }),
        )
        .await;
        let secret = created["secret"].as_str().unwrap();

        let mut request = key_request(secret);
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        let (status, _, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut request = key_request(secret);
        request
            .headers_mut()
            .insert("x-forwarded-for", "10.1.2.3".parse().unwrap());
        let (status, _, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_revoked_key_stops_authenticating() {
        let router = app().await;
        let created = create(&router, "alice", json!({ "name": "ci" })).await;
        let id = created["id"].as_str().unwrap();
        let secret = created["secret"].as_str().unwrap();

        let (status, body, _) = send(
            &router,
            admin_request(
                Method::POST,
                &format!("/admin/api-keys/{}/revoke", id),
                "alice",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "revoked");
        assert_eq!(body["revocation_reason"], "Revoked by user");

        let (status, _, _) = send(&router, key_request(secret)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rotation_over_http() {
        let router = app().await;
        let created = create(&router, "alice", json!({ "name": "ci" })).await;
        let id = created["id"].as_str().unwrap();
        let old_secret = created["secret"].as_str().unwrap().to_string();

        let (status, body, _) = send(
            &router,
            admin_request(
                Method::POST,
                &format!("/admin/api-keys/{}/rotate", id),
                "alice",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predecessor"]["status"], "deprecated");
        assert_eq!(body["successor"]["rotated_from"], id);
        let new_secret = body["secret"].as_str().unwrap();

        // Both secrets work during the grace period
        let (status, _, _) = send(&router, key_request(&old_secret)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(&router, key_request(new_secret)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body, _) = send(
            &router,
            admin_request(
                Method::POST,
                &format!("/admin/api-keys/{}/rotate", id),
                "alice",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["type"], "conflict_error");
    }

    #[tokio::test]
    async fn test_admin_requires_identity_and_ownership() {
        let router = app().await;

        let (status, _, _) = send(
            &router,
            Request::builder()
                .uri("/admin/api-keys")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let created = create(&router, "alice", json!({ "name": "ci" })).await;
        let uri = format!("/admin/api-keys/{}", created["id"].as_str().unwrap());

        let (status, body, _) = send(&router, admin_request(Method::GET, &uri, "mallory", None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["type"], "permission_error");

        let (status, body, _) = send(&router, admin_request(Method::GET, &uri, "alice", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "ci");
    }

    #[tokio::test]
    async fn test_list_and_metadata() {
        let router = app().await;
        let created = create(&router, "alice", json!({ "name": "ci" })).await;
        create(&router, "alice", json!({ "name": "deploy" })).await;
        create(&router, "bob", json!({ "name": "other" })).await;

        let (status, body, _) = send(
            &router,
            admin_request(Method::GET, "/admin/api-keys", "alice", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);

        let (status, body, _) = send(
            &router,
            admin_request(
                Method::PATCH,
                &format!("/admin/api-keys/{}/metadata", created["id"].as_str().unwrap()),
                "alice",
                Some(json!({ "metadata": { "team": "platform" } })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["team"], "platform");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let router = app().await;

        let (status, _, _) = send(
            &router,
            admin_request(Method::GET, "/admin/api-keys/-bad", "alice", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &router,
            admin_request(Method::GET, "/admin/api-keys/key-missing", "alice", None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body, _) = send(
            &router,
            admin_request(
                Method::POST,
                "/admin/api-keys",
                "alice",
                Some(json!({ "name": "" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}
