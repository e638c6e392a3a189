use axum::{
    http::{header, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::path::Path;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::handler::{self, SharedState};

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

// Answer every OPTIONS request directly, whether or not it is a CORS preflight
async fn preflight<B>(request: Request<B>, next: Next<B>) -> Response {
    if request.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            ],
        )
            .into_response();
    }
    next.run(request).await
}

pub fn app(state: SharedState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route(
            "/api",
            get(handler::whoami).fallback(handler::not_found),
        )
        .route(
            "/api/groups",
            get(handler::list_groups)
                .put(handler::replace_groups)
                .fallback(handler::not_found),
        )
        .route(
            "/api/prices",
            get(handler::get_prices).fallback(handler::not_found),
        )
        .route(
            "/api/v3/",
            get(handler::proxy_coingecko).fallback(handler::not_found),
        )
        .route(
            "/api/v3/*path",
            get(handler::proxy_coingecko).fallback(handler::not_found),
        );

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(handler::not_found),
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(preflight))
        .with_state(state)
}
