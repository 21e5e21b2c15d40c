//! Dispatch API Library
//!
//! Order placement, delivery-agent assignment and order lifecycle for
//! multi-shop delivery commerce.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::HeaderValue,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService};
use crate::entities::user::Role;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires services and the token verifier over one connection pool.
    pub fn new(
        db: Arc<db::DbPool>,
        config: Arc<config::AppConfig>,
        event_sender: Option<Arc<events::EventSender>>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(auth::AuthConfig::from(config.as_ref())));
        let services = handlers::AppServices::new(db.clone(), config.clone(), event_sender);
        Self {
            db,
            config,
            services,
            auth,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        assert!(response.success);
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn success_response_outside_request_has_no_id() {
        let response = ApiResponse::success(1);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["data"], 1);
        assert!(json["meta"].get("request_id").is_none());
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Workflow routes, each gated on the roles that may call it
pub fn api_v1_routes() -> Router<AppState> {
    let customer = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/my", get(handlers::orders::my_orders))
        .with_roles(&[Role::Customer]);

    let admin = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/agents", get(handlers::agents::list_agents))
        .with_roles(&[Role::Admin]);

    let delivery = Router::new()
        .route("/orders/assigned", get(handlers::orders::assigned_orders))
        .route("/agents/me", get(handlers::agents::get_profile))
        .route(
            "/agents/me/availability",
            patch(handlers::agents::toggle_availability),
        )
        .with_roles(&[Role::Delivery]);

    let status_update = Router::new()
        .route(
            "/orders/:id/status",
            patch(handlers::orders::update_order_status)
                .put(handlers::orders::update_order_status),
        )
        .with_roles(&[Role::Delivery, Role::Admin]);

    let tracking = Router::new()
        .route("/orders/:id/track", get(handlers::orders::track_order))
        .with_roles(&[Role::Customer, Role::Delivery, Role::Admin]);

    Router::new()
        .merge(customer)
        .merge(admin)
        .merge(delivery)
        .merge(status_update)
        .merge(tracking)
}

/// Full application: public probes, the v1 API, Swagger UI and the HTTP layer stack.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let auth_service = state.auth.clone();

    Router::<AppState>::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            |State(auth): State<Arc<AuthService>>,
             mut req: axum::extract::Request,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

/// CORS from config: explicit origins win, otherwise permissive only where allowed.
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        CorsLayer::permissive()
    } else {
        ::tracing::warn!("No CORS origins configured; cross-origin requests will be refused");
        CorsLayer::new()
    }
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "dispatch-api",
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "Database health check failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
