use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dispatch API",
        version = "1.0.0",
        description = r#"
# Dispatch API

Order placement and delivery dispatch for multi-shop delivery commerce.

## Features

- **Ordering**: Customers place an order with one shop; the total is computed server-side
- **Dispatch**: Every order is assigned the first available delivery agent at creation
- **Lifecycle**: Agents and admins move orders through statuses; delivery frees the agent
- **Tracking**: Customers, their agent and admins can follow an order

## Authentication

All `/api/v1` endpoints require a JWT bearer token whose `role` claim is one of
`customer`, `shop`, `delivery` or `admin`:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Failures share one body shape:

```json
{
  "error": "Bad Request",
  "code": "no_agent_available",
  "message": "No delivery agents available at the moment",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order placement, lifecycle and tracking"),
        (name = "Agents", description = "Delivery agent directory and availability")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::assigned_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::track_order,
        // Agents
        crate::handlers::agents::get_profile,
        crate::handlers::agents::toggle_availability,
        crate::handlers::agents::list_agents,
    ),
    components(
        schemas(
            // Common types
            crate::ResponseMeta,
            crate::errors::ErrorResponse,
            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemInput,
            crate::services::orders::DeliveryAddress,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderPage,
            crate::services::orders::TrackingResponse,
            crate::services::orders::TrackingAgent,
            crate::services::orders::PartySummary,
            crate::services::orders::ShopSummary,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            // Agent types
            crate::services::agents::AgentResponse,
            crate::services::agents::GeoPoint,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

/// Registers the bearer scheme referenced by every secured path
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
