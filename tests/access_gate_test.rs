mod common;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use common::{response_json, TestApp, TEST_JWT_SECRET};
use dispatch_api::{
    auth::{AuthConfig, AuthService, Claims},
    entities::user::Role,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use uuid::Uuid;

fn claims(sub: String, role: &str) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub,
        role: role.to_string(),
        name: None,
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + 3600,
        nbf: now,
        iss: "dispatch-auth".to_string(),
        aud: "dispatch-api".to_string(),
    }
}

fn sign(claims: &Claims, secret: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn missing_or_malformed_header_is_unauthenticated() {
    let app = TestApp::new().await;

    let (status, body) = app.send(Method::GET, "/api/v1/orders/my", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
    assert!(body["timestamp"].is_string());

    let request = Request::builder()
        .uri("/api/v1/orders/my")
        .header("authorization", "Token abc")
        .body(Body::empty())
        .unwrap();
    let response = app.dispatch(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::GET, "/api/v1/orders/my", None, Some("not.a.jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn foreign_expired_and_misaddressed_tokens_are_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;

    let foreign = AuthService::new(AuthConfig::new(
        "some-other-service-secret-that-is-also-long-enough-0123456789abcd".to_string(),
        "dispatch-api".to_string(),
        "dispatch-auth".to_string(),
        Duration::from_secs(3600),
    ))
    .issue_token(customer.id, Role::Customer, None)
    .unwrap();

    let mut expired = claims(customer.id.to_string(), "customer");
    expired.iat -= 7200;
    expired.nbf -= 7200;
    expired.exp = Utc::now().timestamp() - 3600;

    let mut wrong_audience = claims(customer.id.to_string(), "customer");
    wrong_audience.aud = "someone-else".to_string();

    for token in [
        foreign,
        sign(&expired, TEST_JWT_SECRET),
        sign(&wrong_audience, TEST_JWT_SECRET),
        sign(&claims("not-a-uuid".to_string(), "customer"), TEST_JWT_SECRET),
        sign(&claims(customer.id.to_string(), "superuser"), TEST_JWT_SECRET),
    ] {
        let (status, body) = app
            .send(Method::GET, "/api/v1/orders/my", None, Some(&token))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {body}");
        assert_eq!(body["code"], "unauthenticated");
    }
}

#[tokio::test]
async fn legacy_role_labels_are_canonicalized() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let agent = app.seed_agent(true).await;

    let user_token = sign(&claims(customer.id.to_string(), "user"), TEST_JWT_SECRET);
    let (status, _) = app
        .send(Method::GET, "/api/v1/orders/my", None, Some(&user_token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let agent_token = sign(&claims(agent.id.to_string(), "agent"), TEST_JWT_SECRET);
    let (status, body) = app
        .send(Method::GET, "/api/v1/agents/me", None, Some(&agent_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], agent.id.to_string());
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let app = TestApp::new().await;
    let agent = app.seed_agent(true).await;
    let token = app.token_for(&agent);

    let (status, body) = app
        .send(Method::GET, "/api/v1/orders/my", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = app
        .send(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn agent_without_directory_record_gets_not_found() {
    let app = TestApp::new().await;
    let token = app
        .auth_service
        .issue_token(Uuid::new_v4(), Role::Delivery, None)
        .unwrap();

    let (status, body) = app
        .send(Method::GET, "/api/v1/agents/me", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn request_id_is_echoed_on_errors() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/api/v1/orders/my")
        .header("x-request-id", "trace-me-123")
        .body(Body::empty())
        .unwrap();

    let response = app.dispatch(request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-me-123"
    );
    let body = response_json(response).await;
    assert_eq!(body["request_id"], "trace-me-123");
}

#[tokio::test]
async fn probes_and_docs_are_public() {
    let app = TestApp::new().await;

    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checks"]["database"], "healthy");

    let (status, body) = app.send(Method::GET, "/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["service"], "dispatch-api");
    assert!(body["meta"]["request_id"].is_string());

    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
