use crate::State;
use crate::error::ApiError;
use crate::middlewares::authorization;
use crate::scan;
use crate::users::CurrentUser;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use models::device::{DeviceRecord, StatusUpdate, ToggleOutcome, VerificationOutcome, VerifyRequest};
use models::scan::{ScanRequest, ScanResolution};

const TAG: &str = "scan";

#[utoipa::path(
    post,
    path = "/scan/resolve",
    request_body = ScanRequest,
    responses(
        (status = StatusCode::OK, description = "Devices the payload refers to, empty when nothing matched", body = ScanResolution),
        (status = StatusCode::FORBIDDEN, description = "Caller may not resolve scans"),
        (status = StatusCode::INTERNAL_SERVER_ERROR, description = "Store failure"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn resolve_scan(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResolution>, ApiError> {
    authorization::require(&current_user, "scan", "resolve")?;

    let resolution = scan::resolve_payload(state.devices.as_ref(), &request.payload).await?;
    Ok(Json(resolution))
}

#[utoipa::path(
    post,
    path = "/scan/toggle",
    request_body = ScanRequest,
    responses(
        (status = StatusCode::OK, description = "Status flipped", body = ToggleOutcome),
        (status = StatusCode::NOT_FOUND, description = "No device matches the sticker"),
        (status = StatusCode::CONFLICT, description = "Device changed while toggling"),
        (status = StatusCode::FORBIDDEN, description = "Caller may not update statuses"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn toggle_scan(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ToggleOutcome>, ApiError> {
    authorization::require(&current_user, "devices", "update_status")?;

    let outcome = scan::toggle(
        state.devices.as_ref(),
        &request.payload,
        current_user.user_id,
    )
    .await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    put,
    path = "/devices/{device_id}/status",
    params(
        ("device_id" = i32, Path),
    ),
    request_body = StatusUpdate,
    responses(
        (status = StatusCode::OK, description = "Status written", body = DeviceRecord),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
        (status = StatusCode::FORBIDDEN, description = "Caller may not update statuses"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id, device_id = device_id))]
pub async fn update_status(
    Path(device_id): Path<i32>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<DeviceRecord>, ApiError> {
    authorization::require(&current_user, "devices", "update_status")?;

    let device = scan::apply_status(
        state.devices.as_ref(),
        device_id,
        update.status,
        current_user.user_id,
    )
    .await?;
    Ok(Json(device))
}

#[utoipa::path(
    post,
    path = "/devices/{device_id}/verify",
    params(
        ("device_id" = i32, Path),
    ),
    request_body = VerifyRequest,
    responses(
        (status = StatusCode::OK, description = "Verification recorded", body = VerificationOutcome),
        (status = StatusCode::BAD_REQUEST, description = "No serial number given"),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
        (status = StatusCode::FORBIDDEN, description = "Caller may not update statuses"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id, device_id = device_id))]
pub async fn verify_device(
    Path(device_id): Path<i32>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    authorization::require(&current_user, "devices", "update_status")?;

    if request.observed_serial.trim().is_empty() {
        return Err(ApiError::bad_request("observed_serial must not be empty"));
    }

    let outcome = scan::verify(
        state.devices.as_ref(),
        device_id,
        &request.observed_serial,
        current_user.user_id,
    )
    .await?;
    Ok(Json(outcome))
}
