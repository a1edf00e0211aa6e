use crate::State;
use crate::dashboard;
use crate::error::ApiError;
use crate::middlewares::authorization;
use crate::users::CurrentUser;
use axum::http::StatusCode;
use axum::{Extension, Json};
use models::dashboard::Dashboard;

#[utoipa::path(
  get,
  path = "/dashboard",
  responses(
        (status = StatusCode::OK, description = "Dashboard metrics", body = Dashboard),
        (status = StatusCode::FORBIDDEN, description = "Caller may not read the dashboard"),
        (status = StatusCode::INTERNAL_SERVER_ERROR, description = "Failed to retrieve dashboard content"),
  ),
  security(
      ("auth_token" = [])
  ),
  tag = "dashboard"
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn get_dashboard(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Dashboard>, ApiError> {
    authorization::require(&current_user, "dashboard", "read")?;

    let dashboard = dashboard::build(
        state.devices.as_ref(),
        state.users.as_ref(),
        state.config.active_window,
    )
    .await?;
    Ok(Json(dashboard))
}
