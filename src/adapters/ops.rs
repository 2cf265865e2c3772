//! Operator endpoints.

use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::store::ManualReviewItem,
        services::{scheduler::TickReport, suppressor::SweepReport},
    },
    axum::{Json, extract::State},
    chrono::Utc,
};

#[tracing::instrument(name = "poll_trigger", skip_all)]
pub async fn poll_trigger(State(state): State<AppState>) -> Result<Json<TickReport>, ApiError> {
    let report = state.scheduler.tick(Utc::now()).await?;
    tracing::info!(?report, "operator poll tick");
    Ok(Json(report))
}

#[tracing::instrument(name = "sweep_trigger", skip_all)]
pub async fn sweep_trigger(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let report = state.suppressor.sweep(Utc::now()).await?;
    Ok(Json(report))
}

#[tracing::instrument(name = "manual_review", skip_all)]
pub async fn manual_review(
    State(state): State<AppState>,
) -> Result<Json<Vec<ManualReviewItem>>, ApiError> {
    let items = state.store.manual_review().await?;
    tracing::debug!(count = items.len(), "manual review listing");
    Ok(Json(items))
}
