use {
    crate::{
        AppState,
        domain::{
            event::{Channel, CheckoutSnapshot, InboundEvent, RedirectParams},
            id::CheckoutId,
            payment::PaymentState,
        },
    },
    axum::{
        extract::{Query, State},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
};

/// Browser return URL. The query `status` is never trusted: with a
/// `checkout_id` the status comes from the provider, otherwise the event
/// only helps matching. Always answers with a `302`.
#[tracing::instrument(
    name = "return",
    skip_all,
    fields(checkout_id = tracing::field::Empty, state = tracing::field::Empty)
)]
pub async fn return_handler(
    State(state): State<AppState>,
    Query(params): Query<RedirectParams>,
) -> Response {
    let snapshot = match params.checkout_id.as_deref().map(CheckoutId::new) {
        Some(Ok(id)) => {
            tracing::Span::current().record("checkout_id", tracing::field::display(&id));
            fetch_snapshot(&state, &id).await
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "invalid checkout_id on return URL");
            None
        }
        None => None,
    };

    let verification = state.verifier.verify(
        Channel::Redirect,
        &[],
        &Default::default(),
        state.environment,
    );
    let resolved = match InboundEvent::redirect(params, snapshot) {
        Ok(event) => match state.engine.ingest(event, verification).await {
            // Provisional outcomes land on the processing page.
            Ok(report) => report.payment.map(|p| {
                if p.is_settled() {
                    p.state
                } else {
                    PaymentState::Processing
                }
            }),
            Err(e) => {
                tracing::error!(error = %e, "return event not reconciled");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "unusable return parameters");
            None
        }
    };

    let urls = &state.return_urls;
    let location = match resolved {
        Some(PaymentState::Paid) => &urls.success,
        Some(PaymentState::Failed | PaymentState::Cancelled) => &urls.failure,
        Some(PaymentState::Processing) | None => &urls.processing,
    };
    if let Some(s) = resolved {
        tracing::Span::current().record("state", tracing::field::display(s));
    }
    (StatusCode::FOUND, [(header::LOCATION, location.clone())]).into_response()
}

async fn fetch_snapshot(state: &AppState, id: &CheckoutId) -> Option<CheckoutSnapshot> {
    match tokio::time::timeout(state.provider_timeout, state.provider.fetch_checkout(id)).await {
        Ok(Ok(snapshot)) => Some(snapshot),
        Ok(Err(e)) => {
            tracing::warn!(checkout_id = %id, error = %e, "provider status fetch failed");
            None
        }
        Err(_) => {
            tracing::warn!(checkout_id = %id, "provider status fetch timed out");
            None
        }
    }
}
