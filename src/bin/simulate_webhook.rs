//! Posts a simulated `purchase_approved` payment webhook to a running server.
//!
//! Usage: simulate_webhook [email] [product]
//! Example: simulate_webhook teste@email.com "Mapa Astral"

use serde_json::json;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = env::args().skip(1);
    let email = args.next().unwrap_or_else(|| "test@example.com".to_string());
    let product = args.next().unwrap_or_else(|| "Leitura de Tarot".to_string());
    let base_url = env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let url = format!("{}/api/webhooks/cakto", base_url.trim_end_matches('/'));

    let mut payload = json!({
        "event": "purchase_approved",
        "data": {
            "customer": {"email": email},
            "product": {"name": product},
            "status": "paid"
        }
    });
    if let Ok(secret) = env::var("WEBHOOK_SECRET") {
        payload["secret"] = json!(secret);
    }

    println!("🚀 Simulating webhook for: {}", email);
    println!("📦 Product: {}", product);
    println!("🌐 Target: {}", url);

    let response = reqwest::Client::new().post(&url).json(&payload).send().await?;
    if response.status().is_success() {
        println!("✅ Webhook delivered (status {})", response.status());
    } else {
        anyhow::bail!("Server answered {}", response.status());
    }

    Ok(())
}
