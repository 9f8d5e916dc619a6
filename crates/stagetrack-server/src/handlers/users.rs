//! User management endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use stagetrack_core::domain::user::{Role, UserRequest, UserResponse};
use stagetrack_core::error::TrackError;

use crate::authz::{self, Operation};
use crate::error::AppError;
use crate::middleware::jwt::Claims;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Wire shape of user create/update bodies. The role arrives as a
/// string so an unknown value fails with `InvalidRole` (400) instead of
/// a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    pub role: String,
}

impl UserPayload {
    fn into_request(self) -> Result<UserRequest, TrackError> {
        let role: Role = self.role.parse().map_err(TrackError::InvalidRole)?;
        Ok(UserRequest {
            name: self.name,
            email: self.email,
            password: self.password,
            role,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, AppError> {
    authz::require(&claims, Operation::ListUsers)?;

    let limit = page.limit.unwrap_or(50);
    let offset = page.offset.unwrap_or(0);
    let (users, total) = state.users.list(limit, offset).await?;
    Ok(Json(json!({
        "data": users,
        "meta": { "total": total, "limit": limit, "offset": offset.max(0) },
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    authz::require(&claims, Operation::GetUser)?;
    Ok(Json(state.users.get(&id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UserPayload>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    authz::require(&claims, Operation::CreateUser)?;
    let user = state.users.create(payload.into_request()?).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// PUT /users/{id}. Admins may update anything except the role; role
/// changes are reserved to super users. Nothing is persisted when the
/// check fails.
pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<UserPayload>,
) -> Result<Json<UserResponse>, AppError> {
    authz::require(&claims, Operation::UpdateUser)?;

    let req = payload.into_request()?;
    let target = state.users.get_entity(&id).await?;
    if req.role != target.role && claims.role != Role::SuperUser {
        return Err(TrackError::Forbidden("only super_user can change user roles".into()).into());
    }

    Ok(Json(state.users.update(&id, req).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    authz::require(&claims, Operation::DeleteUser)?;
    state.users.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
