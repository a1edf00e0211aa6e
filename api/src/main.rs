use anyhow::Context;
use axum::extract::MatchedPath;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::{Extension, extract::Request, middleware, routing::get};
use config::Config;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use middlewares::authentication::jwks::TokenVerifier;
use middlewares::authorization::AuthorizationConfig;
use sentry::integrations::tracing as sentry_tracing;
use sqlx::postgres::PgPoolOptions;
use std::future::ready;
use std::sync::Arc;
use std::time::Instant;
use store::{DeviceStore, MemoryStore, PgStore, UserStore};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod dashboard;
mod device;
mod error;
mod events;
mod middlewares;
mod reporting;
mod scan;
mod store;
mod users;

#[cfg(test)]
mod testing;

#[derive(Clone, Debug)]
pub struct State {
    devices: Arc<dyn DeviceStore>,
    users: Arc<dyn UserStore>,
    config: &'static Config,
    authorization: Arc<AuthorizationConfig>,
}

fn main() -> anyhow::Result<()> {
    let config: &'static Config = Box::leak(Box::new(
        Config::new().context("failed to construct config")?,
    ));

    let roles_toml = std::fs::read_to_string(&config.roles_path)
        .with_context(|| format!("failed to read roles file at {}", config.roles_path))?;
    let authorization =
        AuthorizationConfig::new(&roles_toml).context("failed to load authorization config")?;

    // Sentry needs to be initialized outside of an async block.
    // See https://docs.sentry.io/platforms/rust.
    let _guard = reporting::Sentry::init(config);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to initialize tokio runtime")?
        .block_on(start_main_server(config, authorization))
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "auth_token",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(modifiers(&SecurityAddon))]
struct ApiDoc;

/// Every route that needs an authenticated caller.
fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(scan::route::resolve_scan))
        .routes(routes!(scan::route::toggle_scan))
        .routes(routes!(scan::route::update_status))
        .routes(routes!(scan::route::verify_device))
        .routes(routes!(device::route::list_devices))
        .routes(routes!(device::route::get_device))
        .routes(routes!(device::route::get_sticker))
        .routes(routes!(
            device::route::my_devices,
            device::route::register_device
        ))
        .routes(routes!(device::route::my_gate_code))
        .routes(routes!(
            users::route::get_profile,
            users::route::update_profile
        ))
        .routes(routes!(users::route::choose_role))
        .routes(routes!(users::route::update_role))
        .routes(routes!(users::route::list_security))
        .routes(routes!(dashboard::route::get_dashboard))
        .routes(routes!(events::device_snapshots))
}

async fn open_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn DeviceStore>, Arc<dyn UserStore>)> {
    if config.uses_memory_store() {
        warn!("Using the in-memory store, nothing will be persisted");
        let store = Arc::new(MemoryStore::new());
        return Ok((store.clone(), store));
    }

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&config.database_url)
        .await
        .context("can't connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("sqlx migration failed")?;

    let store = Arc::new(PgStore::new(pool).await?);
    Ok((store.clone(), store))
}

async fn start_main_server(
    config: &'static Config,
    authorization: AuthorizationConfig,
) -> anyhow::Result<()> {
    info!("Starting custody API v{}", env!("CARGO_PKG_VERSION"));

    let (devices, users) = open_stores(config).await?;
    let verifier = TokenVerifier::new(&config.auth_issuer, &config.auth_audience)
        .context("failed to build token verifier")?;

    let state = State {
        devices,
        users,
        config,
        authorization: Arc::new(authorization),
    };

    let recorder_handle = setup_metrics_recorder()?;

    let (router, api) = api_router()
        // Auth middleware. Every route prior to this is protected.
        .route_layer(middleware::from_fn(middlewares::authentication::check))
        .split_for_parts();

    let app = router
        .route("/metrics", get(move || ready(recorder_handle.render())))
        .route("/health", get(events::health))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(reporting::Sentry::capture_errors_middleware))
        .layer(Extension(state))
        .layer(Extension(verifier))
        .merge(SwaggerUi::new("/docs").url("/docs/openapi.json", api))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.listen_addr))?;
    info!(
        "Custody API running on http://{} (Press Ctrl+C to quit)",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .await
        .context("failed to run axum server")
}

fn setup_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .context("failed to build prometheus recorder")?
        .install_recorder()
        .context("failed to install prometheus recorder")?;
    Ok(handle)
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::increment_counter!("http_requests_total", &labels);
    metrics::histogram!("http_requests_duration_seconds", latency, &labels);

    response
}
