//! Terminal driver for the payment-wait and recovery flow.
//!
//! Usage:
//!   reading_client checkout <email> <name> <birth_date> <question> [add-on]
//!   reading_client recover <email>
//!
//! API_URL (default http://localhost:3000) and CHECKOUT_URL select the targets.

use mystic_reading_api::addons::AddOn;
use mystic_reading_api::client::{
    CheckoutStart, FlowState, HttpFunnelApi, PaymentFlow, UnlockedReading,
};
use mystic_reading_api::models::LeadRegistration;
use reqwest::Url;
use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: reading_client checkout <email> <name> <birth_date> <question> [add-on]\n       reading_client recover <email>";

fn print_reading(reading: &UnlockedReading) {
    println!("🔓 Reading unlocked for {}", reading.email);
    for card in &reading.cards {
        println!("  🃏 {} ({})", card.name, card.meaning);
    }
    println!("\n{}", reading.reading);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mystic_reading_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_url = env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let checkout_url = env::var("CHECKOUT_URL")
        .unwrap_or_else(|_| "https://pay.cakto.com.br/checkout".to_string());
    let api = Arc::new(HttpFunnelApi::new(&api_url)?);
    let flow = PaymentFlow::new(api, Url::parse(&checkout_url)?);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["recover", email] => {
            let reading = flow.recover(email).await?;
            print_reading(&reading);
        }
        ["checkout", email, name, birth_date, question, rest @ ..] => {
            let required = match rest.first() {
                Some(raw) => Some(raw.parse::<AddOn>().map_err(anyhow::Error::msg)?),
                None => None,
            };
            let registration = LeadRegistration {
                name: name.to_string(),
                email: email.to_string(),
                birth_date: birth_date.to_string(),
                question: question.to_string(),
                selected_bumps: required.into_iter().collect(),
            };

            match flow.begin_checkout(&registration).await? {
                CheckoutStart::AlreadyUnlocked(reading) => print_reading(&reading),
                CheckoutStart::Redirect { checkout_url } => {
                    println!("💳 Complete the payment at: {}", checkout_url);
                    println!("⏳ Waiting for confirmation (Ctrl-C to stop)...");

                    let handle = flow.start_polling(email, required);
                    tokio::select! {
                        _ = handle.wait() => {}
                        _ = tokio::signal::ctrl_c() => {
                            flow.cancel();
                            println!("Stopped waiting.");
                            return Ok(());
                        }
                    }

                    if let FlowState::Unlocked(reading) = flow.state() {
                        print_reading(&reading);
                    }
                }
            }
        }
        _ => anyhow::bail!(USAGE),
    }

    Ok(())
}
