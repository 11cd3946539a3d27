use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::horoscope::{HoroscopeQuery, HoroscopeResponse, HoroscopeService};
use crate::keyed_queue::KeyedQueue;
use crate::lead_store::LeadStore;
use crate::models::*;
use crate::reading::ReadingService;
use crate::reconcile::Reconciler;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Authoritative lead storage (Postgres or in-memory).
    pub store: Arc<dyn LeadStore>,
    /// Applies confirmed payments to leads.
    pub reconciler: Arc<Reconciler>,
    /// Paid reading generation, shared by live and recovered sessions.
    pub readings: Arc<ReadingService>,
    /// Natal chart for leads that bought the horoscope add-on.
    pub horoscopes: Arc<HoroscopeService>,
    /// Serialises webhook processing per customer email.
    pub webhook_queue: Arc<KeyedQueue>,
    /// Fingerprints of webhooks seen recently (10 minute TTL) to drop redeliveries.
    pub recent_webhooks: Cache<String, ()>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "mystic-reading-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Simplified RFC 5322 check: local@domain.tld
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    });
    re.is_match(email)
}

/// POST /api/leads
///
/// Records purchase intent before the client opens the external checkout.
/// A customer whose latest lead is already paid gets `status: "paid"` and no
/// new lead, so the client can send them to recovery instead of a second charge.
pub async fn register_lead(
    State(state): State<Arc<AppState>>,
    Json(mut payload): Json<LeadRegistration>,
) -> Result<Json<RegistrationResponse>, AppError> {
    payload.email = normalize_email(&payload.email);
    tracing::info!("POST /api/leads - {}", payload.email);

    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".to_string()));
    }
    if !is_valid_email(&payload.email) {
        tracing::warn!("❌ Invalid email format: {}", payload.email);
        return Err(AppError::BadRequest("Invalid email".to_string()));
    }

    let existing = state
        .store
        .latest_for_email(&payload.email)
        .await
        .context("Failed to check existing lead")?;
    if let Some(lead) = existing.filter(|lead| lead.status.is_paid()) {
        tracing::info!(
            "{} already paid (lead {}), routing to recovery",
            payload.email,
            lead.id
        );
        return Ok(Json(RegistrationResponse {
            success: true,
            status: PaymentState::Paid,
            lead_id: None,
        }));
    }

    let lead = state
        .store
        .insert_pending(&payload)
        .await
        .context("Failed to save lead")?;
    tracing::info!("✓ Lead {} saved as pending_payment", lead.id);

    Ok(Json(RegistrationResponse {
        success: true,
        status: PaymentState::Pending,
        lead_id: Some(lead.id),
    }))
}

/// GET /api/payment/status/:email
///
/// Never fails: a missing lead or a store error both read as pending.
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Json<StatusResponse> {
    let email = normalize_email(&email);
    match state.store.latest_for_email(&email).await {
        Ok(Some(lead)) => Json(StatusResponse::from(&lead)),
        Ok(None) => Json(StatusResponse::pending()),
        Err(e) => {
            tracing::error!("Status lookup failed for {}: {}", email, e);
            Json(StatusResponse::pending())
        }
    }
}

/// POST /api/readings
///
/// Returns the reading for a paid lead: 404 without a lead, 402 before payment.
pub async fn retrieve_reading(
    State(state): State<Arc<AppState>>,
    Json(query): Json<ReadingQuery>,
) -> Result<Json<ReadingResponse>, AppError> {
    let email = query
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest("Email is required".to_string()))?;
    tracing::info!("POST /api/readings - {}", email);

    let reading = state.readings.reading_for(&email).await?;
    Ok(Json(reading))
}

/// POST /api/horoscope
pub async fn retrieve_horoscope(
    State(state): State<Arc<AppState>>,
    Json(query): Json<HoroscopeQuery>,
) -> Result<Json<HoroscopeResponse>, AppError> {
    let email = query
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest("Email is required".to_string()))?;
    tracing::info!("POST /api/horoscope - {}", email);

    let horoscope = state.horoscopes.horoscope_for(&email, &query).await?;
    Ok(Json(horoscope))
}
