use crate::device::RegistrationError;
use crate::scan::ScanError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::borrow::Cow;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(Cow<'static, str>),
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound(Cow<'static, str>),
    /// 409 Conflict
    Conflict(Cow<'static, str>),
    /// 500 Internal Server Error
    InternalServerError(anyhow::Error),
}

impl ApiError {
    pub fn bad_request<Msg: Into<Cow<'static, str>>>(msg: Msg) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found<Msg: Into<Cow<'static, str>>>(msg: Msg) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound | StoreError::UserNotFound => Self::not_found(e.to_string()),
            StoreError::Conflict => Self::Conflict(e.to_string().into()),
            _ => Self::InternalServerError(e.into()),
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::NoDevice(_) => Self::not_found(e.to_string()),
            ScanError::Store(e) => e.into(),
        }
    }
}

impl From<RegistrationError> for ApiError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::Store(e) => e.into(),
            _ => Self::bad_request(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::BadRequest(cow) => (StatusCode::BAD_REQUEST, cow).into_response(),
            ApiError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            ApiError::NotFound(cow) => (StatusCode::NOT_FOUND, cow).into_response(),
            ApiError::Conflict(cow) => (StatusCode::CONFLICT, cow).into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal server error: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}
