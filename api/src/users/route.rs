use crate::State;
use crate::error::ApiError;
use crate::middlewares::authorization;
use crate::store::StoreError;
use crate::users::{self, CurrentUser};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use models::user::{Role, SecurityMember, UpdateProfile, UpdateRole, User};
use tracing::{debug, info};

const ME_TAG: &str = "me";
const USERS_TAG: &str = "users";

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = StatusCode::OK, description = "The caller's profile", body = User),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = ME_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn get_profile(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .users
        .get_user(current_user.user_id)
        .await?
        .ok_or(StoreError::UserNotFound)?;
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/me",
    request_body = UpdateProfile,
    responses(
        (status = StatusCode::OK, description = "Profile updated", body = User),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = ME_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn update_profile(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(profile): Json<UpdateProfile>,
) -> Result<Json<User>, ApiError> {
    let profile = UpdateProfile {
        registration_number: profile
            .registration_number
            .map(|reg| reg.trim().to_owned())
            .filter(|reg| !reg.is_empty()),
        location_id: profile
            .location_id
            .map(|location| location.trim().to_owned())
            .filter(|location| !location.is_empty()),
    };

    let user = state
        .users
        .update_profile(current_user.user_id, &profile)
        .await?;
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/me/role",
    request_body = UpdateRole,
    responses(
        (status = StatusCode::OK, description = "Role chosen", body = User),
        (status = StatusCode::FORBIDDEN, description = "An admin already exists"),
        (status = StatusCode::CONFLICT, description = "Caller already has a role"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = ME_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn choose_role(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(choice): Json<UpdateRole>,
) -> Result<Json<User>, ApiError> {
    if let Some(role) = current_user.role {
        return Err(ApiError::Conflict(format!("role already set to {role}").into()));
    }

    // the first admin bootstraps everyone else through PUT /users/{id}/role
    if choice.role == Role::Admin && !state.users.list_by_role(Role::Admin).await?.is_empty() {
        debug!("Refused admin onboarding, an admin already exists");
        return Err(ApiError::Forbidden);
    }

    let user = state
        .users
        .set_role(current_user.user_id, choice.role)
        .await?;
    info!("User {} onboarded as {}", user.id, choice.role);
    Ok(Json(user))
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/role",
    params(
        ("user_id" = i32, Path),
    ),
    request_body = UpdateRole,
    responses(
        (status = StatusCode::OK, description = "Role assigned", body = User),
        (status = StatusCode::NOT_FOUND, description = "Unknown user"),
        (status = StatusCode::FORBIDDEN, description = "Caller may not manage users"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = USERS_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id, target = user_id))]
pub async fn update_role(
    Path(user_id): Path<i32>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(update): Json<UpdateRole>,
) -> Result<Json<User>, ApiError> {
    authorization::require(&current_user, "users", "update")?;

    let user = state
        .users
        .set_role(user_id, update.role)
        .await?;
    info!("User {user_id} is now {}", update.role);
    Ok(Json(user))
}

#[utoipa::path(
    get,
    path = "/users/security",
    responses(
        (status = StatusCode::OK, description = "Security personnel and whether they were recently active", body = Vec<SecurityMember>),
        (status = StatusCode::FORBIDDEN, description = "Caller may not list users"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = USERS_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn list_security(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<SecurityMember>>, ApiError> {
    authorization::require(&current_user, "users", "read")?;

    let now = Utc::now();
    let members = state
        .users
        .list_by_role(Role::Security)
        .await?
        .into_iter()
        .map(|user| users::security_member(user, now, state.config.active_window))
        .collect();
    Ok(Json(members))
}
