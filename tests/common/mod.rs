//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use moka::future::Cache;
use mystic_reading_api::addons::AddOn;
use mystic_reading_api::config::Config;
use mystic_reading_api::errors::AppError;
use mystic_reading_api::handlers::AppState;
use mystic_reading_api::horoscope::{
    BirthData, ChartPositions, ChartSource, HoroscopeService, PlanetPosition,
};
use mystic_reading_api::keyed_queue::KeyedQueue;
use mystic_reading_api::lead_store::{LeadStore, MemoryLeadStore};
use mystic_reading_api::models::{Card, Lead, LeadRegistration};
use mystic_reading_api::reading::{CardSource, ReadingChain, ReadingService};
use mystic_reading_api::reconcile::Reconciler;
use mystic_reading_api::services::fallback_deck;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

/// Card source that always deals the fixed deck.
pub struct FixedDeck;

#[async_trait]
impl CardSource for FixedDeck {
    async fn draw(&self, count: usize) -> Result<Vec<Card>, AppError> {
        Ok(fallback_deck(count))
    }
}

/// Chart source with fixed positions: Sun in Aries, Moon trine the Sun.
pub struct FixedChart;

#[async_trait]
impl ChartSource for FixedChart {
    async fn positions(&self, birth: &BirthData) -> Result<ChartPositions, AppError> {
        let planet = |lon: f64| PlanetPosition {
            lon,
            lat: 0.0,
            speed: 1.0,
            is_retrograde: false,
        };
        Ok(ChartPositions {
            planets: [("Sun", 22.0), ("Moon", 142.0), ("Saturn", 300.0)]
                .into_iter()
                .map(|(name, lon)| (name.to_string(), planet(lon)))
                .collect(),
            ascendant: 95.0,
            location: birth.city.clone().unwrap_or_else(|| "São Paulo, BR".to_string()),
        })
    }
}

/// Memory store that sleeps before every read and write, widening the window
/// in which unserialised read-modify-write cycles would overwrite each other.
pub struct SlowStore {
    pub inner: MemoryLeadStore,
    pub delay: Duration,
}

#[async_trait]
impl LeadStore for SlowStore {
    async fn insert_pending(&self, registration: &LeadRegistration) -> Result<Lead, AppError> {
        self.inner.insert_pending(registration).await
    }

    async fn latest_for_email(&self, email: &str) -> Result<Option<Lead>, AppError> {
        tokio::time::sleep(self.delay).await;
        self.inner.latest_for_email(email).await
    }

    async fn record_payment(
        &self,
        lead_id: Uuid,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError> {
        tokio::time::sleep(self.delay).await;
        self.inner.record_payment(lead_id, bumps).await
    }

    async fn insert_paid(
        &self,
        email: &str,
        name: &str,
        bumps: &BTreeSet<AddOn>,
    ) -> Result<Lead, AppError> {
        self.inner.insert_paid(email, name, bumps).await
    }
}

pub fn test_config() -> Config {
    Config {
        public_app_url: "https://leitura.example".to_string(),
        ..Config::default()
    }
}

/// Application state over `store`, with the fixed deck, fixed chart and
/// template texts.
pub fn test_state(store: Arc<dyn LeadStore>, config: Config) -> Arc<AppState> {
    let config = Arc::new(config);
    let chain = Arc::new(ReadingChain::new());
    let readings = Arc::new(ReadingService::new(
        store.clone(),
        Arc::new(FixedDeck),
        chain.clone(),
    ));
    let horoscopes = Arc::new(HoroscopeService::new(
        store.clone(),
        Some(Arc::new(FixedChart)),
        chain,
    ));
    let reconciler = Arc::new(Reconciler::new(store.clone(), config.clone(), None));

    Arc::new(AppState {
        config,
        store,
        reconciler,
        readings,
        horoscopes,
        webhook_queue: KeyedQueue::new(),
        recent_webhooks: Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(10_000)
            .build(),
    })
}

pub fn registration(email: &str, name: &str) -> LeadRegistration {
    LeadRegistration {
        name: name.to_string(),
        email: email.to_string(),
        birth_date: "1990-04-12".to_string(),
        question: "O que o futuro reserva?".to_string(),
        selected_bumps: vec![],
    }
}

pub fn paid_webhook(email: &str, product: &str) -> Value {
    serde_json::json!({
        "event": "purchase_approved",
        "data": {
            "customer": {"email": email, "name": "Ana"},
            "product": {"name": product}
        }
    })
}

/// Waits until every queued webhook job has finished.
pub async fn drain_webhooks(state: &AppState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.webhook_queue.in_flight_keys() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("webhook queue did not drain");
}

pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<&Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
