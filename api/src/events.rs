use crate::State;
use crate::error::ApiError;
use crate::middlewares::authorization;
use crate::store;
use crate::users::CurrentUser;
use axum::Extension;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum_extra::extract::Query;
use futures::{Stream, StreamExt};
use models::device::{DeviceFilter, DeviceRecord};
use std::convert::Infallible;
use tracing::{info, warn};

/// Streams the devices matching the filter: one `snapshot` event right away
/// and a fresh one after every change.
#[utoipa::path(
    get,
    path = "/events/devices",
    params(DeviceFilter),
    responses(
        (status = StatusCode::OK, description = "Server-sent `snapshot` events carrying the full matching set", body = Vec<DeviceRecord>, content_type = "text/event-stream"),
        (status = StatusCode::FORBIDDEN, description = "Caller may not read devices"),
    ),
    security(
        ("auth_token" = [])
    ),
    tag = "events"
)]
pub async fn device_snapshots(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<DeviceFilter>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    authorization::require(&current_user, "devices", "read")?;
    info!(user_id = current_user.user_id, "Opening device snapshot stream");

    let stream = store::subscribe(state.devices.clone(), filter).map(|snapshot| {
        let event = match snapshot {
            Ok(devices) => Event::default().event("snapshot").json_data(devices),
            Err(err) => {
                warn!("Snapshot failed: {err}");
                Ok(Event::default().event("error").data(err.to_string()))
            }
        };
        Ok(event.unwrap_or_else(|err| Event::default().event("error").data(err.to_string())))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn health() -> &'static str {
    "I'm good"
}
