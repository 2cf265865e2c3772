use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::event::{Channel, InboundEvent},
    },
    axum::{Json, body::Bytes, extract::State, http::HeaderMap},
};

/// Client-side "simulate webhook" call. Accepted unsigned, and every match
/// it makes is low confidence.
#[tracing::instrument(
    name = "manual",
    skip_all,
    fields(event_id = tracing::field::Empty, outcome = tracing::field::Empty)
)]
pub async fn simulate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verification = state
        .verifier
        .verify(Channel::Manual, &body, &headers, state.environment);

    let event = match InboundEvent::manual(&body) {
        Ok(event) => event,
        Err(e) => {
            state
                .engine
                .reject_malformed(Channel::Manual, &body, verification.ok, &e)
                .await?;
            return Err(e.into());
        }
    };
    tracing::Span::current().record("event_id", tracing::field::display(&event.event_id));

    let report = state.engine.ingest(event, verification).await?;
    tracing::Span::current().record("outcome", tracing::field::display(report.outcome));

    Ok(Json(serde_json::json!({
        "status": report.outcome.as_str(),
        "payment_id": report.payment.as_ref().map(|p| p.id),
        "state": report.state().map(|s| s.as_str()),
    })))
}
