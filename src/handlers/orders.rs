use axum::{extract::State, http::StatusCode, response::Json};
use uuid::Uuid;

use super::common::{ApiPath, ApiQuery, ValidatedJson};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{
        CreateOrderRequest, OrderListFilter, OrderPage, OrderResponse, TrackingResponse,
        UpdateOrderStatusRequest,
    },
    ApiResponse, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Place order",
    description = "Place an order with one shop. The total is computed server-side and the first available delivery agent is assigned in the same transaction.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created and agent assigned", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid order or no delivery agent available", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders",
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    ValidatedJson(request): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state
        .services
        .orders
        .create_order(&auth_user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List all orders",
    description = "Every order, newest first, with optional status, shop and date filters",
    params(OrderListFilter),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<OrderPage>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders",
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    ApiQuery(filter): ApiQuery<OrderListFilter>,
) -> Result<Json<ApiResponse<OrderPage>>, ServiceError> {
    let page = state
        .services
        .orders
        .list_all_orders(&auth_user, filter)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/my",
    summary = "List my orders",
    description = "Orders placed by the calling customer, with shop and agent details",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a customer", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders",
    security(("Bearer" = []))
)]
pub async fn my_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let orders = state.services.orders.list_my_orders(&auth_user).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/assigned",
    summary = "List assigned orders",
    description = "Orders assigned to the calling delivery agent, with customer and shop details",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a delivery agent", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders",
    security(("Bearer" = []))
)]
pub async fn assigned_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_assigned_orders(&auth_user)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Set a new status. Allowed for admins and the assigned agent. Delivering an order makes its agent available again.",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller may not update this order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Reopen refused; agent serves another order", body = crate::errors::ErrorResponse),
        (status = 500, description = "Status saved but agent release failed", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders",
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    ApiPath(order_id): ApiPath<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_status(&auth_user, order_id, &request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/track",
    summary = "Track order",
    description = "Status, shop and assigned agent of one order. Visible to its customer, its agent and admins.",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Tracking view", body = ApiResponse<TrackingResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller may not track this order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders",
    security(("Bearer" = []))
)]
pub async fn track_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    ApiPath(order_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<TrackingResponse>>, ServiceError> {
    let tracking = state
        .services
        .orders
        .track_order(&auth_user, order_id)
        .await?;
    Ok(Json(ApiResponse::success(tracking)))
}
