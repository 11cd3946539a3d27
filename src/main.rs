use axum::{routing::get, Router};
use moka::future::Cache;
use mystic_reading_api::{
    app,
    config::Config,
    db::Database,
    db_storage::PgLeadStore,
    email_client::{AccessMailer, HttpMailer},
    handlers::{self, AppState},
    horoscope::{ChartSource, HoroscopeService},
    keyed_queue::KeyedQueue,
    lead_store::{LeadStore, MemoryLeadStore},
    reading::{ReadingChain, ReadingService},
    reconcile::Reconciler,
    services::{GeminiProvider, GroqProvider, HttpChartSource, TarotApiClient},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pings `url` forever so free-tier hosts do not put the service to sleep.
fn spawn_keep_alive(url: String, interval: Duration) {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match client.get(&url).send().await {
                Ok(response) => tracing::debug!("Keep-alive ping: {}", response.status()),
                Err(e) => tracing::warn!("Keep-alive ping failed: {}", e),
            }
        }
    });
}

/// Main entry point for the application.
///
/// Initializes logging, configuration, the lead store (Postgres when
/// configured, in-memory otherwise), reading providers, email delivery,
/// caches and the webhook queue, then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mystic_reading_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    let store: Arc<dyn LeadStore> = match config.database_url {
        Some(ref url) => {
            let db = Database::new(url).await?;
            tracing::info!("Database connection pool established");
            Arc::new(PgLeadStore::new(db.pool))
        }
        None => Arc::new(MemoryLeadStore::new()),
    };

    // Reading providers, tried in this order before the built-in template
    let mut chain = ReadingChain::new();
    if let Some(groq) = GroqProvider::from_config(&config) {
        tracing::info!("✓ Groq reading provider enabled ({})", config.groq_model);
        chain = chain.with_provider(Arc::new(groq));
    }
    if let Some(gemini) = GeminiProvider::from_config(&config) {
        tracing::info!("✓ Gemini reading provider enabled ({})", config.gemini_model);
        chain = chain.with_provider(Arc::new(gemini));
    }

    let chain = Arc::new(chain);
    let readings = Arc::new(ReadingService::new(
        store.clone(),
        Arc::new(TarotApiClient::new(&config)),
        chain.clone(),
    ));

    let charts = HttpChartSource::from_config(&config).map(|source| {
        tracing::info!("✓ Chart service enabled ({})", source.base_url());
        Arc::new(source) as Arc<dyn ChartSource>
    });
    let horoscopes = Arc::new(HoroscopeService::new(store.clone(), charts, chain));

    let mailer: Option<Arc<dyn AccessMailer>> =
        match (config.email_api_key.clone(), config.email_from.clone()) {
            (Some(key), Some(from)) => match HttpMailer::new(config.email_api_url.clone(), key, from) {
                Ok(mailer) => {
                    tracing::info!("✓ Access email enabled via {}", config.email_api_url);
                    Some(Arc::new(mailer) as Arc<dyn AccessMailer>)
                }
                Err(e) => {
                    tracing::error!("Failed to initialize email client: {}", e);
                    None
                }
            },
            _ => {
                tracing::warn!("EMAIL_API_KEY/EMAIL_FROM not set. Access emails are disabled.");
                None
            }
        };

    let reconciler = Arc::new(Reconciler::new(store.clone(), config.clone(), mailer));

    // Webhook redelivery cache (10 minute TTL)
    let recent_webhooks = Cache::builder()
        .time_to_live(Duration::from_secs(600))
        .max_capacity(10_000)
        .build();

    // Build application state
    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        reconciler,
        readings,
        horoscopes,
        webhook_queue: KeyedQueue::new(),
        recent_webhooks,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(app::api_routes().layer(GovernorLayer {
            config: governor_conf,
        }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    if let Some(url) = config.keep_alive_url.clone() {
        tracing::info!("Keep-alive enabled: {}", url);
        spawn_keep_alive(url, config.keep_alive_interval());
    }

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
