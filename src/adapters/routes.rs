use {
    crate::{
        AppState,
        adapters::{manual, ops, redirect, webhook},
    },
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhook", post(webhook::webhook_handler))
        .route("/webhook/simulate", post(manual::simulate_handler))
        .route("/return", get(redirect::return_handler))
        .route("/poll/trigger", post(ops::poll_trigger))
        .route("/sweep/trigger", post(ops::sweep_trigger))
        .route("/manual-review", get(ops::manual_review))
        .layer(DefaultBodyLimit::max(64 * 1024)) // 64 KB, provider events are a few KB
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
