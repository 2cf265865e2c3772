use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            error::{PipelineError, SignatureFailure},
            event::{Channel, InboundEvent},
        },
    },
    axum::{Json, body::Bytes, extract::State, http::HeaderMap},
};

/// Provider webhook. Answers `200` once the event is durably logged, even
/// when it matched nothing, so the provider stops retrying; the poll and
/// re-match paths finish the job later.
#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(event_id = tracing::field::Empty, outcome = tracing::field::Empty)
)]
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verification = state
        .verifier
        .verify(Channel::Webhook, &body, &headers, state.environment);
    if !verification.ok {
        let reason = verification.reason.unwrap_or(SignatureFailure::BadDigest);
        state.engine.reject(Channel::Webhook, &body, reason).await?;
        return Err(PipelineError::Authenticity(reason).into());
    }

    let event = match InboundEvent::webhook(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload");
            state
                .engine
                .reject_malformed(Channel::Webhook, &body, true, &e)
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
    })))
}
