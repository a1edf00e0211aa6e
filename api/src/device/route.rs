use crate::State;
use crate::device;
use crate::error::ApiError;
use crate::middlewares::authorization;
use crate::users::CurrentUser;
use anyhow::Context;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use axum_extra::extract::Query;
use models::device::{DeviceFilter, DeviceRecord, NewDevice, Sticker};
use models::scan::GateCode;
use tracing::debug;

const DEVICES_TAG: &str = "devices";
const ME_TAG: &str = "me";

async fn readable_device(
    state: &State,
    current_user: &CurrentUser,
    device_id: i32,
) -> Result<DeviceRecord, ApiError> {
    let device = state
        .devices
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found("device not found"))?;

    if device.owner_id != current_user.user_id {
        authorization::require(current_user, "devices", "read")?;
    }

    Ok(device)
}

#[utoipa::path(
    get,
    path = "/devices",
    params(DeviceFilter),
    responses(
        (status = StatusCode::OK, description = "Devices matching the filter, newest first", body = Vec<DeviceRecord>),
        (status = StatusCode::FORBIDDEN, description = "Caller may not list devices"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = DEVICES_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn list_devices(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<DeviceFilter>,
) -> Result<Json<Vec<DeviceRecord>>, ApiError> {
    authorization::require(&current_user, "devices", "read")?;

    debug!("Listing devices with {filter:?}");
    let devices = state.devices.list_devices(&filter).await?;
    Ok(Json(devices))
}

#[utoipa::path(
    get,
    path = "/devices/{device_id}",
    params(
        ("device_id" = i32, Path),
    ),
    responses(
        (status = StatusCode::OK, description = "Return the device", body = DeviceRecord),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = DEVICES_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id, device_id = device_id))]
pub async fn get_device(
    Path(device_id): Path<i32>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<DeviceRecord>, ApiError> {
    let device = readable_device(&state, &current_user, device_id).await?;
    Ok(Json(device))
}

#[utoipa::path(
    get,
    path = "/devices/{device_id}/sticker",
    params(
        ("device_id" = i32, Path),
    ),
    responses(
        (status = StatusCode::OK, description = "Text to print on the device label", body = Sticker),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = DEVICES_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id, device_id = device_id))]
pub async fn get_sticker(
    Path(device_id): Path<i32>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Sticker>, ApiError> {
    let device = readable_device(&state, &current_user, device_id).await?;
    Ok(Json(device::sticker(&device)))
}

#[utoipa::path(
    post,
    path = "/me/devices",
    request_body = NewDevice,
    responses(
        (status = StatusCode::CREATED, description = "Device registered", body = DeviceRecord),
        (status = StatusCode::BAD_REQUEST, description = "Missing serial or registration number"),
        (status = StatusCode::FORBIDDEN, description = "Caller may not register devices"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = ME_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn register_device(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(new_device): Json<NewDevice>,
) -> Result<(StatusCode, Json<DeviceRecord>), ApiError> {
    authorization::require(&current_user, "devices", "register")?;

    let owner = state
        .users
        .get_user(current_user.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let device = device::register_device(state.devices.as_ref(), &owner, new_device).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

#[utoipa::path(
    get,
    path = "/me/devices",
    responses(
        (status = StatusCode::OK, description = "Devices owned by the caller", body = Vec<DeviceRecord>),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = ME_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn my_devices(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<DeviceRecord>>, ApiError> {
    let devices = device::owned_devices(state.devices.as_ref(), current_user.user_id).await?;
    Ok(Json(devices))
}

#[utoipa::path(
    get,
    path = "/me/qr",
    responses(
        (status = StatusCode::OK, description = "Payload to encode in the caller's gate QR code", body = GateCode),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = ME_TAG
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.user_id))]
pub async fn my_gate_code(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<GateCode>, ApiError> {
    let owner = state
        .users
        .get_user(current_user.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    let devices = device::owned_devices(state.devices.as_ref(), owner.id).await?;

    let code = device::gate_code(&owner, &devices)
        .context("failed to encode gate code")
        .map_err(ApiError::InternalServerError)?;
    Ok(Json(code))
}

#[cfg(test)]
mod tests {
    use crate::testing::{TestApp, read_json};
    use axum::http::StatusCode;
    use models::device::{DeviceRecord, DeviceStatus, Sticker};
    use models::scan::{GateCode, ScanCandidates};
    use models::user::Role;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_without_profile_is_rejected() {
        let app = TestApp::new();
        let student = app.user("student-1", Role::Student).await;

        let response = app
            .post(&student, "/me/devices", json!({ "serial_number": "X1" }))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_devices_with_filter() {
        let app = TestApp::new();
        app.device("student-1", "CS/042/2023", "A").await;
        let other = app.device("student-2", "EE/001/2024", "B").await;
        let admin = app.user("admin-1", Role::Admin).await;

        let response = app.get(&admin, "/devices?registration_number=ee/00").await;
        assert_eq!(response.status(), StatusCode::OK);
        let devices: Vec<DeviceRecord> = read_json(response).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, other.id);

        let response = app.get(&admin, "/devices?status=in_school").await;
        let devices: Vec<DeviceRecord> = read_json(response).await;
        assert!(devices.is_empty());

        let response = app.get(&admin, "/devices").await;
        let devices: Vec<DeviceRecord> = read_json(response).await;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, other.id, "newest first");
        assert_eq!(devices[0].status, DeviceStatus::OutSchool);
    }

    #[tokio::test]
    async fn test_students_only_see_their_own_devices() {
        let app = TestApp::new();
        let mine = app.device("student-1", "R1", "A").await;
        let theirs = app.device("student-2", "R2", "B").await;
        let student = app.user("student-1", Role::Student).await;

        let response = app.get(&student, &format!("/devices/{}/sticker", mine.id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let sticker: Sticker = read_json(response).await;
        assert_eq!(sticker.payload, "A");

        let response = app.get(&student, &format!("/devices/{}", theirs.id)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.get(&student, "/devices").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.get(&student, "/me/devices").await;
        let devices: Vec<DeviceRecord> = read_json(response).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, mine.id);
    }

    #[tokio::test]
    async fn test_gate_code_resolves_back_to_devices() {
        let app = TestApp::new();
        app.device("student-1", "R1", "A").await;
        app.device("student-1", "R1", "B").await;
        let student = app.user("student-1", Role::Student).await;

        let response = app.get(&student, "/me/qr").await;
        assert_eq!(response.status(), StatusCode::OK);
        let code: GateCode = read_json(response).await;
        assert_eq!(code.device_count, 2);

        let candidates = ScanCandidates::interpret(&code.payload);
        assert_eq!(candidates.serial_numbers.len(), 2);
        assert_eq!(candidates.registration_number.as_deref(), Some("R1"));

        let guard = app.user("guard-1", Role::Security).await;
        let response = app
            .post(&guard, "/scan/resolve", json!({ "payload": code.payload }))
            .await;
        let resolution: models::scan::ScanResolution = read_json(response).await;
        assert_eq!(resolution.devices.len(), 2);
    }
}
