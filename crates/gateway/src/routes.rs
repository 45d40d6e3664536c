use crate::handlers;
use crate::state::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

pub fn create_router(state: AppState) -> Router {
    let models = Router::new()
        .route("/models", get(handlers::list_models))
        .route("/models/current", get(handlers::current_model))
        .route("/models/:id/load", post(handlers::load_model));

    let sources = Router::new()
        .route(
            "/sources",
            get(handlers::list_sources).post(handlers::register_source),
        )
        .route("/sources/active", get(handlers::active_source))
        .route("/sources/discover", post(handlers::discover_sources))
        .route("/sources/next", post(handlers::next_source))
        .route("/sources/:id/activate", post(handlers::activate_source));

    let detection_loop = Router::new()
        .route("/loop", get(handlers::loop_status))
        .route("/loop/start", post(handlers::start_loop))
        .route("/loop/pause", post(handlers::pause_loop))
        .route("/loop/resume", post(handlers::resume_loop))
        .route("/loop/stop", post(handlers::stop_loop));

    let api = models
        .merge(sources)
        .merge(detection_loop)
        .route("/metrics", get(handlers::metrics));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
