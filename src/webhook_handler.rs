use crate::errors::AppError;
use crate::handlers::AppState;
use crate::reconcile::ReconcileOutcome;
use crate::webhook_models::PaymentWebhook;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

/// Payment processor webhook.
///
/// Authenticates the call, drops redeliveries, and hands the event to the
/// customer's serial queue. Every event that gets past authentication is
/// acknowledged with 200 so the processor does not retry it; problems are
/// only logged.
///
/// Authentication: `X-Webhook-Token` header or top-level `secret` field must
/// match WEBHOOK_SECRET when it is configured.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let event = match PaymentWebhook::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            // Still authenticate so unauthenticated junk is not acknowledged.
            validate_webhook_secret(&state, &headers, None)?;
            tracing::warn!("Ignoring unparsable payment webhook ({} bytes): {}", body.len(), e);
            return Ok(StatusCode::OK);
        }
    };

    validate_webhook_secret(&state, &headers, event.embedded_secret())?;

    tracing::info!("Received payment webhook: event={:?}", event.event_name());

    let Some(email) = event.customer_email() else {
        tracing::warn!(
            "Payment webhook without customer email (event={:?}), ignoring",
            event.event_name()
        );
        return Ok(StatusCode::OK);
    };

    let first_delivery = state
        .recent_webhooks
        .entry(event.fingerprint())
        .or_insert(())
        .await
        .is_fresh();
    if !first_delivery {
        tracing::info!("Duplicate payment webhook for {}, skipping", email);
        return Ok(StatusCode::OK);
    }

    let reconciler = Arc::clone(&state.reconciler);
    let key = email.clone();
    state.webhook_queue.enqueue(key, async move {
        match reconciler.apply(&event).await {
            Ok(ReconcileOutcome::Skipped(reason)) => {
                tracing::info!("Webhook for {} skipped: {}", email, reason);
            }
            Ok(ReconcileOutcome::Applied {
                lead_id,
                added,
                newly_paid,
                ..
            }) => {
                tracing::info!(
                    "Webhook for {} applied to lead {} (newly paid: {}, added: {:?})",
                    email,
                    lead_id,
                    newly_paid,
                    added
                );
            }
            Ok(ReconcileOutcome::Created { lead_id, bumps }) => {
                tracing::info!(
                    "Webhook for {} created paid lead {} (bumps: {:?})",
                    email,
                    lead_id,
                    bumps
                );
            }
            Err(e) => {
                tracing::error!("Failed to reconcile payment for {}: {}", email, e);
            }
        }
    });

    Ok(StatusCode::OK)
}

/// Validate webhook secret from the X-Webhook-Token header or the body.
fn validate_webhook_secret(
    state: &AppState,
    headers: &HeaderMap,
    body_secret: Option<&str>,
) -> Result<(), AppError> {
    // If no secret is configured, skip validation (warn was already logged at startup)
    let Some(ref expected_secret) = state.config.webhook_secret else {
        return Ok(());
    };

    let token = headers
        .get("X-Webhook-Token")
        .and_then(|v| v.to_str().ok())
        .or(body_secret)
        .ok_or_else(|| AppError::Unauthorized("Missing webhook token".to_string()))?;

    if !constant_time_compare(token, expected_secret) {
        tracing::warn!("Invalid webhook token received");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
