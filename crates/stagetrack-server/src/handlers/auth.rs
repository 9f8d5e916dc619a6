//! POST /auth/register and POST /auth/login.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use stagetrack_core::domain::user::{Role, UserRequest, UserResponse};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Self-service registration. The role is always `manager`, regardless
/// of input.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    let user = state
        .users
        .create(UserRequest {
            name: req.name,
            email: req.email,
            password: Some(req.password),
            role: Role::Manager,
        })
        .await?;

    let entity = state.users.get_entity(&user.id).await?;
    let token = state.jwt.issue(&entity)?;
    Ok((StatusCode::CREATED, Json(TokenResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = match state.users.login(&req.email, &req.password).await {
        Ok(user) => {
            state.sink.login_attempts_total.with_label_values(&["success"]).inc();
            user
        }
        Err(e) => {
            state.sink.login_attempts_total.with_label_values(&["failed"]).inc();
            return Err(e.into());
        }
    };

    let token = state.jwt.issue(&user)?;
    Ok(Json(TokenResponse {
        token,
        user: user.into(),
    }))
}
