use crate::config::Config;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use sentry::ClientInitGuard;
use std::borrow::Cow;
use std::env;
use tracing::warn;

pub struct Sentry;

impl Sentry {
    /// Must run before the tokio runtime starts.
    pub fn init(config: &Config) -> Option<ClientInitGuard> {
        let Some(sentry_url) = &config.sentry_url else {
            warn!("Sentry integration disabled: no SENTRY_URL configured");
            return None;
        };

        Some(sentry::init((
            sentry_url.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: 0.75,
                environment: Some(
                    env::var("ENVIRONMENT")
                        .map(Cow::Owned)
                        .unwrap_or(Cow::Borrowed("development")),
                ),
                ..Default::default()
            },
        )))
    }

    pub async fn capture_errors_middleware(request: Request, next: Next) -> Response {
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = next.run(request).await;

        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            sentry::capture_message(
                &format!("Internal Server Error: {} {}", method, uri),
                sentry::Level::Error,
            );
        }

        response
    }
}
