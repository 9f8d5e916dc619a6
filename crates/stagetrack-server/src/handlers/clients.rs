//! Client listing and stage transitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use stagetrack_core::domain::client::{AppStatus, Client, ClientFilters, ClientRequest};
use stagetrack_core::error::TrackError;
use stagetrack_core::transition::DEFAULT_LIMIT;

use crate::authz::{self, Operation};
use crate::error::AppError;
use crate::middleware::jwt::Claims;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ClientListQuery {
    pub id: Option<String>,
    pub stage: Option<String>,
    pub source: Option<String>,
    pub channel: Option<String>,
    pub app: Option<String>,
    pub is_active: Option<bool>,
    pub updated_after: Option<DateTime<Utc>>,
    pub last_login_after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ClientListQuery {
    fn into_filters(self) -> Result<(ClientFilters, i64, i64), TrackError> {
        let app = self
            .app
            .as_deref()
            .map(str::parse::<AppStatus>)
            .transpose()
            .map_err(TrackError::InvalidInput)?;
        let filters = ClientFilters {
            id: self.id,
            stage: self.stage,
            source: self.source,
            channel: self.channel,
            app,
            is_active: self.is_active,
            updated_after: self.updated_after,
            updated_before: None,
            last_login_after: self.last_login_after,
        };
        Ok((filters, self.limit.unwrap_or(0), self.offset.unwrap_or(0)))
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ClientListQuery>,
) -> Result<Json<Value>, AppError> {
    authz::require(&claims, Operation::ListClients)?;

    let (filters, limit, offset) = query.into_filters()?;
    let (page, total) = state.transitions.list(filters, limit, offset).await?;
    let limit = if limit <= 0 { DEFAULT_LIMIT } else { limit };
    Ok(Json(json!({
        "data": page,
        "meta": { "total": total, "limit": limit, "offset": offset.max(0) },
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Client>, AppError> {
    authz::require(&claims, Operation::GetClient)?;
    Ok(Json(state.transitions.get(&id).await?))
}

/// PUT /clients/{id}/stage — apply a stage transition. The body may also
/// carry attribute updates; missing fields keep their stored values.
pub async fn update_stage(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<ClientRequest>,
) -> Result<Json<Client>, AppError> {
    authz::require(&claims, Operation::TransitionClient)?;
    if req.stage.is_empty() {
        return Err(TrackError::InvalidInput("stage: cannot be blank".into()).into());
    }
    Ok(Json(state.transitions.update(&id, req).await?))
}

/// POST /clients — create a client on its initial stage.
pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ClientRequest>,
) -> Result<(StatusCode, Json<Client>), AppError> {
    authz::require(&claims, Operation::TransitionClient)?;
    if req.stage.is_empty() {
        return Err(TrackError::InvalidInput("stage: cannot be blank".into()).into());
    }
    let client = state.transitions.create(req).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// DELETE /clients/{id} — soft deactivation.
pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    authz::require(&claims, Operation::DeleteClient)?;
    state.transitions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
