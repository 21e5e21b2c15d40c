#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use dispatch_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{
        order, product, shop,
        user::{self, Role},
    },
    events::{self, EventSender},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use std::str::FromStr;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "integration-tests-signing-key-0123456789abcdefghijklmnopqrstuvwxyz";

/// Helper harness for spinning up the full router over a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Same as [`TestApp::new`] with a hook to adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(
            Arc::new(pool),
            Arc::new(cfg),
            Some(Arc::new(event_sender)),
        );
        let auth_service = state.auth.clone();
        let router = dispatch_api::build_router(state.clone());

        Self {
            router,
            state,
            auth_service,
            _event_task: event_task,
        }
    }

    pub async fn seed_user(&self, name: &str, role: Role, is_available: bool) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(format!(
                "{}-{}@example.com",
                name.to_lowercase().replace(' ', "."),
                Uuid::new_v4().simple()
            )),
            phone: Set(Some("555-0100".to_string())),
            role: Set(role),
            is_available: Set(is_available),
            vehicle_details: Set(None),
            current_lat: Set(None),
            current_lng: Set(None),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_customer(&self) -> user::Model {
        self.seed_user("Test Customer", Role::Customer, false).await
    }

    pub async fn seed_admin(&self) -> user::Model {
        self.seed_user("Test Admin", Role::Admin, false).await
    }

    pub async fn seed_agent(&self, available: bool) -> user::Model {
        self.seed_user("Test Agent", Role::Delivery, available)
            .await
    }

    pub async fn seed_shop(&self) -> shop::Model {
        let owner = self.seed_user("Shop Owner", Role::Shop, false).await;
        shop::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner.id),
            name: Set("Test Shop".to_string()),
            street: Set(Some("1 Main St".to_string())),
            city: Set(Some("Springfield".to_string())),
            lat: Set(None),
            lng: Set(None),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed shop")
    }

    pub async fn seed_product(&self, shop_id: Uuid, name: &str, price: Decimal) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            shop_id: Set(shop_id),
            name: Set(name.to_string()),
            price: Set(price),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Bearer token for a seeded user, carrying the user's stored role.
    pub fn token_for(&self, user: &user::Model) -> String {
        self.auth_service
            .issue_token(user.id, user.role, Some(user.name.clone()))
            .expect("issue test token")
    }

    pub async fn reload_user(&self, id: Uuid) -> user::Model {
        user::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load user")
            .expect("user exists")
    }

    pub async fn reload_order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Dispatches a pre-built request, for cases needing custom headers.
    pub async fn dispatch(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and returns the status with the parsed JSON body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        (status, response_json(response).await)
    }

    /// Places an order through the API and returns the raw result.
    pub async fn place_order(
        &self,
        customer_token: &str,
        shop_id: Uuid,
        items: &[(Uuid, i32, &str)],
    ) -> (StatusCode, Value) {
        let items: Vec<Value> = items
            .iter()
            .map(|(product_id, quantity, price)| {
                json!({ "productId": product_id, "quantity": quantity, "price": price })
            })
            .collect();
        self.send(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "shopId": shop_id,
                "items": items,
                "deliveryAddress": {
                    "street": "42 Elm Street",
                    "city": "Springfield",
                    "postalCode": "12345"
                },
                "paymentMethod": "cod"
            })),
            Some(customer_token),
        )
        .await
    }

    pub async fn set_status(&self, token: &str, order_id: Uuid, status: &str) -> (StatusCode, Value) {
        self.send(
            Method::PATCH,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({ "status": status })),
            Some(token),
        )
        .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}

/// Parses a decimal that may have been serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

pub fn order_id(body: &Value) -> Uuid {
    Uuid::parse_str(body["data"]["id"].as_str().expect("order id")).expect("uuid")
}
