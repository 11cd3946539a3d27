use crate::handlers::{self, AppState};
use crate::webhook_handler;
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Request bodies above this are rejected before reaching a handler.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const OPENAPI_SPEC: &str = include_str!("../openapi.yml");

/// Serves the OpenAPI specification YAML bundled with the binary.
async fn serve_openapi_spec() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/yaml")],
        OPENAPI_SPEC,
    )
}

/// Serves the Swagger UI HTML page pointing at `/api-docs/openapi.yml`.
async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Mystic Reading API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.yml",
                dom_id: '#swagger-ui',
                deepLinking: true
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Routes subject to rate limiting and the body size limit.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // API Documentation
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(serve_openapi_spec))
        // Funnel
        .route("/api/leads", post(handlers::register_lead))
        .route("/api/payment/status/:email", get(handlers::payment_status))
        .route("/api/readings", post(handlers::retrieve_reading))
        .route("/api/horoscope", post(handlers::retrieve_horoscope))
        // Payment processor
        .route("/api/webhooks/cakto", post(webhook_handler::payment_webhook))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

/// Full application without the per-IP rate limiter, which needs the peer
/// address of a real connection. `main` adds it around `api_routes`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
