use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{Pagination, SetPermissionsRequest, SetRoleRequest, UpdateMeRequest, UpdateStatusRequest},
    model::{PublicUser, Redact, UserRecord, UserStatus},
    repo::ProfileChanges,
};
use crate::{access::Actor, error::AppError, state::AppState};

fn found(user: Option<UserRecord>) -> Result<Json<PublicUser>, AppError> {
    user.map(|u| Json(u.redact())).ok_or(AppError::UserNotFound)
}

#[instrument(skip(state), fields(user_id = %actor.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<PublicUser>, AppError> {
    found(state.users.find_by_id(actor.user_id).await?)
}

#[instrument(skip(state, payload), fields(user_id = %actor.user_id))]
pub async fn update_me(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let changes = ProfileChanges::try_from(payload)?;
    let user = state.users.update_profile(actor.user_id, changes).await?;
    info!("profile updated");
    found(user)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    let (limit, offset) = page.resolve();
    let users = state.users.list(limit, offset).await?;
    Ok(Json(users.into_iter().map(Redact::redact).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    found(state.users.find_by_id(id).await?)
}

#[instrument(skip(state, actor), fields(by = %actor.user_id))]
pub async fn update_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.set_status(id, payload.active).await?;
    info!(status = ?payload.active, "status changed");
    found(user)
}

#[instrument(skip(state, actor), fields(by = %actor.user_id))]
pub async fn set_role(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.set_role(id, payload.role).await?;
    info!(role = %payload.role, "role changed");
    found(user)
}

#[instrument(skip(state, actor), fields(by = %actor.user_id))]
pub async fn set_permissions(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetPermissionsRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.set_permissions(id, &payload.permissions).await?;
    info!(permissions = ?payload.permissions, "permissions changed");
    found(user)
}

/// Soft delete: the account is disabled, not removed.
#[instrument(skip(state, actor), fields(by = %actor.user_id))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.set_status(id, UserStatus::Disabled).await?;
    info!("user deactivated");
    found(user)
}
