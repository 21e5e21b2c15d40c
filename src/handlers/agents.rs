use axum::{extract::State, response::Json};

use crate::{
    auth::AuthUser, errors::ServiceError, services::agents::AgentResponse, ApiResponse, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/agents/me",
    summary = "Agent profile",
    responses(
        (status = 200, description = "Calling agent's record", body = ApiResponse<AgentResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a delivery agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Agent record not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Agents",
    security(("Bearer" = []))
)]
pub async fn get_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<AgentResponse>>, ServiceError> {
    let agent = state.services.agents.agent_profile(&auth_user).await?;
    Ok(Json(ApiResponse::success(agent)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/agents/me/availability",
    summary = "Toggle availability",
    description = "Flip the calling agent's availability. Refused while the agent still holds an undelivered order.",
    responses(
        (status = 200, description = "Availability flipped", body = ApiResponse<AgentResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a delivery agent", body = crate::errors::ErrorResponse),
        (status = 409, description = "Agent has active orders", body = crate::errors::ErrorResponse),
    ),
    tag = "Agents",
    security(("Bearer" = []))
)]
pub async fn toggle_availability(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<AgentResponse>>, ServiceError> {
    let agent = state
        .services
        .agents
        .toggle_availability(&auth_user)
        .await?;
    Ok(Json(ApiResponse::success(agent)))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents",
    summary = "List delivery agents",
    responses(
        (status = 200, description = "All delivery agents", body = ApiResponse<Vec<AgentResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = crate::errors::ErrorResponse),
    ),
    tag = "Agents",
    security(("Bearer" = []))
)]
pub async fn list_agents(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<AgentResponse>>>, ServiceError> {
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "Only admins can list delivery agents".to_string(),
        ));
    }
    let agents = state.services.agents.list_agents().await?;
    Ok(Json(ApiResponse::success(agents)))
}
