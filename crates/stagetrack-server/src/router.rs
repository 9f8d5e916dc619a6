//! Router construction.

use axum::middleware as axum_mw;
use axum::routing::{get, post, put};
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::jwt::jwt_auth;
use crate::state::AppState;

/// Build the full axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Routes that require a bearer token.
    let protected = Router::new()
        .route("/clients", get(handlers::clients::list).post(handlers::clients::create))
        .route("/clients/:id", get(handlers::clients::get).delete(handlers::clients::delete))
        .route("/clients/:id/stage", put(handlers::clients::update_stage))
        .route("/users", get(handlers::users::list).post(handlers::users::create))
        .route(
            "/users/:id",
            get(handlers::users::get)
                .put(handlers::users::update)
                .delete(handlers::users::delete),
        )
        .route("/metrics", get(handlers::metrics::list))
        .route("/metrics/calculate", get(handlers::metrics::calculate))
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(state.jwt.clone()));

    // Public routes: auth, docs, liveness and the scrape endpoint.
    let public = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/metrics/prometheus", get(handlers::metrics::prometheus))
        .route("/swagger/openapi.json", get(handlers::swagger::openapi))
        .route("/health", get(handlers::health::health));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
