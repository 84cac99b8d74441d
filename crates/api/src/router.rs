//! The spool HTTP surface: routes plus the middleware every request passes.
//!
//! [`build_app_router`] is shared by `main.rs` and the integration tests.

use std::any::Any;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::extract::PROJECT_ID_HEADER;
use crate::routes;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Worker protocol routes. Workers ping and poll continuously.
const WORKER_ROUTES: &str = "/api/v1/cluster/";

/// Build the full application [`Router`].
///
/// Layers, outermost first:
///
/// 1. CORS (`X-Project-Id` allowed in, `X-Request-Id` exposed out)
/// 2. Request ID assignment
/// 3. Request spans carrying the request and project ids
/// 4. Request ID echoed on the response
/// 5. Request timeout
/// 6. Panics answered with the JSON error envelope
/// 7. Body size limit for job specs and worker event batches
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// Worker traffic is recorded at DEBUG so heartbeats and polls do not
/// drown operator requests at INFO.
fn request_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let uri = request.uri();
    let request_id = header(request, REQUEST_ID_HEADER);
    let project_id = header(request, PROJECT_ID_HEADER);

    if uri.path().starts_with(WORKER_ROUTES) {
        tracing::debug_span!("request", %method, %uri, request_id, project_id)
    } else {
        tracing::info_span!("request", %method, %uri, request_id, project_id)
    }
}

fn header<'a>(request: &'a Request<Body>, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("handler panicked");
    AppError::InternalError(format!("panic: {detail}")).into_response()
}

/// Build the CORS layer from server configuration.
///
/// Origins that do not parse as header values are skipped with a warning.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(PROJECT_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(Duration::from_secs(3600))
}
