mod audience;
pub mod jwks;

use crate::{State, users::CurrentUser};
use axum::{
    Extension,
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jwks::TokenVerifier;
use tracing::{error, info, warn};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Verifies the bearer token and attaches the [`CurrentUser`] to the request.
/// Users are created on first sight, without a role, and pick one through
/// `POST /me/role`.
pub async fn check(
    Extension(state): Extension<State>,
    Extension(verifier): Extension<TokenVerifier>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&headers).ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verifier.verify(token).await.map_err(|err| {
        warn!("Rejected token: {err}");
        StatusCode::UNAUTHORIZED
    })?;

    let user = match state.users.find_by_subject(&claims.sub).await {
        Ok(Some(user)) if user.email.is_some() || claims.email.is_none() => user,
        Ok(_) => {
            info!("Creating user for sub={}", claims.sub);
            state
                .users
                .create_user(&claims.sub, claims.email.as_deref())
                .await
                .map_err(|err| {
                    error!("Failed to create user: {err}");
                    StatusCode::INTERNAL_SERVER_ERROR
                })?
        }
        Err(err) => {
            error!("Failed to look up user: {err}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if let Err(err) = state.users.touch(user.id).await {
        warn!("Failed to record activity for user {}: {err}", user.id);
    }

    let current_user = CurrentUser::new(user.id, user.role, &state.authorization);
    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
