use asset_hub_core::identity::{LoginResponse, NewUser};
use asset_hub_core::model::UserProfile;
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use super::{ApiResult, AppState, AuthContext, Body};

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Body(req): Body<NewUser>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    let profile = state.identity.register(req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn login(
    State(state): State<AppState>,
    Body(req): Body<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    Ok(Json(state.identity.login(&req.email, &req.password).await?))
}

pub async fn profile(
    State(state): State<AppState>,
    AuthContext(actor): AuthContext,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(state.identity.profile(&actor).await?))
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthContext(_): AuthContext,
) -> ApiResult<Json<Vec<UserProfile>>> {
    Ok(Json(state.identity.list_users().await?))
}
