/// Integration tests with mocked external APIs
/// Exercises card draws, reading providers and email delivery without hitting real services
use mystic_reading_api::addons::AddOn;
use mystic_reading_api::email_client::{AccessMailer, HttpMailer};
use mystic_reading_api::horoscope::{
    AstralAnalysis, BirthData, ChartSource, NatalChart, ASTRAL_SYSTEM_PROMPT,
};
use mystic_reading_api::models::{Card, LeadProfile};
use mystic_reading_api::reading::{CardSource, ReadingChain, ReadingProvider, ReadingRequest};
use mystic_reading_api::services::{GeminiProvider, GroqProvider, HttpChartSource, TarotApiClient};
use std::collections::BTreeSet;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(bumps: &[AddOn]) -> ReadingRequest {
    ReadingRequest {
        profile: LeadProfile {
            name: "Ana".to_string(),
            birth_date: "1990-04-12".to_string(),
            question: "Vou mudar de emprego?".to_string(),
        },
        bumps: bumps.iter().copied().collect::<BTreeSet<_>>(),
        cards: vec![
            Card {
                name: "The Star".to_string(),
                meaning: "Hope".to_string(),
                kind: "major".to_string(),
                image: None,
            },
            Card {
                name: "Queen of Cups".to_string(),
                meaning: "Compassion".to_string(),
                kind: "minor".to_string(),
                image: None,
            },
            Card {
                name: "The Sun".to_string(),
                meaning: "Success".to_string(),
                kind: "major".to_string(),
                image: None,
            },
        ],
    }
}

fn groq(server: &MockServer) -> GroqProvider {
    GroqProvider::new(
        server.uri(),
        "gsk_test_key_123".to_string(),
        "llama-3.1-8b-instant".to_string(),
    )
}

fn gemini(server: &MockServer) -> GeminiProvider {
    GeminiProvider::new(
        server.uri(),
        "gemini_test_key_123".to_string(),
        "gemini-2.0-flash".to_string(),
    )
}

#[tokio::test]
async fn test_tarot_api_successful_draw() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!({
        "nhits": 3,
        "cards": [
            {"name": "The Star", "type": "major", "meaning_up": "Hope, faith", "meaning_rev": "Despair"},
            {"name": "Queen of Cups", "type": "minor", "meaning_up": "Compassion"},
            {"name": "The Sun", "type": "major", "meaning_up": "Success"}
        ]
    });

    Mock::given(method("GET"))
        .and(path("/api/v1/cards/random"))
        .and(query_param("n", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = TarotApiClient::with_base_url(mock_server.uri());
    let cards = client.draw(3).await.unwrap();

    assert_eq!(cards.len(), 3);
    assert_eq!(cards[0].name, "The Star");
    assert_eq!(cards[0].meaning, "Hope, faith");
    assert_eq!(cards[1].kind, "minor");
    assert_eq!(
        cards[1].image.as_deref(),
        Some("https://www.sacred-texts.com/tarot/pkt/img/cuqu.jpg")
    );
}

#[tokio::test]
async fn test_tarot_api_failure_uses_fallback_deck() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/cards/random"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = TarotApiClient::with_base_url(mock_server.uri());
    let cards = client.draw(5).await.unwrap();

    let names: Vec<&str> = cards.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "The Magician",
            "The High Priestess",
            "The Empress",
            "The Emperor",
            "The Hierophant"
        ]
    );
}

#[tokio::test]
async fn test_tarot_api_short_answer_uses_fallback_deck() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/cards/random"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cards": [{"name": "The Star", "type": "major", "meaning_up": "Hope"}]
        })))
        .mount(&mock_server)
        .await;

    let cards = TarotApiClient::with_base_url(mock_server.uri())
        .draw(3)
        .await
        .unwrap();
    assert_eq!(cards.len(), 3);
    assert_eq!(cards[0].name, "The Magician");
}

#[tokio::test]
async fn test_groq_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer gsk_test_key_123"))
        .and(body_partial_json(serde_json::json!({"model": "llama-3.1-8b-instant"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "## 🌌 Sinfonia das Esferas\nThe Star brilha."}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = groq(&mock_server).generate(&request(&[])).await.unwrap();
    assert!(text.contains("The Star brilha"));
}

#[tokio::test]
async fn test_gemini_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(query_param("key", "gemini_test_key_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "## Leitura "}, {"text": "do Gemini"}]}}]
        })))
        .mount(&mock_server)
        .await;

    let text = gemini(&mock_server).generate(&request(&[])).await.unwrap();
    assert_eq!(text, "## Leitura do Gemini");
}

#[tokio::test]
async fn test_chain_falls_back_from_groq_to_gemini() {
    let groq_server = MockServer::start().await;
    let gemini_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .expect(1)
        .mount(&groq_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "## Alma Gêmea & Sinastria\nAmor à vista."}]}}]
        })))
        .expect(1)
        .mount(&gemini_server)
        .await;

    let chain = ReadingChain::new()
        .with_provider(Arc::new(groq(&groq_server)))
        .with_provider(Arc::new(gemini(&gemini_server)));
    let text = chain.generate(&request(&[AddOn::Love])).await;

    assert_eq!(text, "## Alma Gêmea & Sinastria\nAmor à vista.");
}

#[tokio::test]
async fn test_chain_uses_template_when_all_providers_fail() {
    let groq_server = MockServer::start().await;
    let gemini_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&groq_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
        .mount(&gemini_server)
        .await;

    let chain = ReadingChain::new()
        .with_provider(Arc::new(groq(&groq_server)))
        .with_provider(Arc::new(gemini(&gemini_server)));
    let text = chain.generate(&request(&[AddOn::Protection])).await;

    // Template built from the cards actually drawn
    assert!(text.contains("The Star"));
    assert!(text.contains("Queen of Cups"));
    assert!(text.contains("The Sun"));
    assert!(text.contains("Blindagem"));
    assert!(!text.contains("Alma Gêmea"));
}

#[tokio::test]
async fn test_open_circuit_skips_dead_provider() {
    let groq_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&groq_server)
        .await;

    let chain = ReadingChain::new().with_provider(Arc::new(groq(&groq_server)));
    for _ in 0..8 {
        let text = chain.generate(&request(&[])).await;
        assert!(text.contains("Sinfonia das Esferas"));
    }
    // MockServer verifies on drop that only 5 calls got through.
}

#[tokio::test]
async fn test_access_email_delivery() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer re_test_key"))
        .and(body_partial_json(serde_json::json!({
            "from": "Oráculo <oraculo@example.com>",
            "to": ["ana@example.com"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "msg_1"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mailer = HttpMailer::new(
        format!("{}/emails", mock_server.uri()),
        "re_test_key".to_string(),
        "Oráculo <oraculo@example.com>".to_string(),
    )
    .unwrap();

    assert!(
        mailer
            .send_access_email("ana@example.com", "Ana", "https://leitura.example/?recover=ana@example.com")
            .await
    );
}

#[tokio::test]
async fn test_access_email_failure_is_reported_not_raised() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
        .mount(&mock_server)
        .await;

    let mailer = HttpMailer::new(
        mock_server.uri(),
        "re_test_key".to_string(),
        "bad".to_string(),
    )
    .unwrap();

    assert!(!mailer.send_access_email("ana@example.com", "", "https://x").await);
}

fn birth() -> BirthData {
    BirthData {
        birth_date: "1990-04-12".to_string(),
        birth_time: "08:30".to_string(),
        city: Some("Recife".to_string()),
    }
}

fn chart_body() -> serde_json::Value {
    serde_json::json!({
        "planets": {
            "Sun": {"lon": 22.4, "lat": 0.0, "speed": 0.98, "isRetrograde": false},
            "Moon": {"lon": 142.1, "lat": 1.2, "speed": 13.1, "isRetrograde": false},
            "Mercury": {"lon": 10.0, "lat": -2.0, "speed": -0.3, "isRetrograde": true}
        },
        "ascendant": 95.0,
        "location": "Recife, Pernambuco"
    })
}

#[tokio::test]
async fn test_chart_source_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chart"))
        .and(body_partial_json(serde_json::json!({
            "birthDate": "1990-04-12",
            "birthTime": "08:30",
            "city": "Recife"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let positions = HttpChartSource::new(mock_server.uri())
        .positions(&birth())
        .await
        .unwrap();
    assert_eq!(positions.location, "Recife, Pernambuco");
    assert!(positions.planets["Mercury"].is_retrograde);

    let chart = NatalChart::from_positions(&positions).unwrap();
    assert_eq!(chart.sun_sign(), "Áries");
    assert_eq!(chart.cusps.len(), 12);
}

#[tokio::test]
async fn test_chart_source_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chart"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let err = HttpChartSource::new(mock_server.uri())
        .positions(&birth())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_astral_analysis_parses_fenced_groq_answer() {
    let mock_server = MockServer::start().await;
    let analysis = serde_json::json!({
        "trinity": "Luz e sombra dançam no seu Sol.",
        "personal": "Você ama com intensidade.",
        "social": "Júpiter abre portas.",
        "houses": "Sua vocação é ensinar.",
        "aspects": "Batalhas internas vencidas.",
        "evolutionary": "Curar a pressa.",
        "synthesis": "O universo sussurra seu nome."
    });

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "system", "content": ASTRAL_SYSTEM_PROMPT}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": format!("```json\n{}\n```", analysis)}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let positions = serde_json::from_value(chart_body()).unwrap();
    let chart = NatalChart::from_positions(&positions).unwrap();
    let chain = ReadingChain::new().with_provider(Arc::new(groq(&mock_server)));
    let result = chain.astral_analysis("Ana", &chart).await;

    assert_eq!(result.synthesis, "O universo sussurra seu nome.");
    assert_ne!(result, AstralAnalysis::fallback());
}

#[tokio::test]
async fn test_astral_analysis_falls_back_on_prose_answer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "As estrelas sorriem para você."}}]
        })))
        .mount(&mock_server)
        .await;

    let positions = serde_json::from_value(chart_body()).unwrap();
    let chart = NatalChart::from_positions(&positions).unwrap();
    let chain = ReadingChain::new().with_provider(Arc::new(groq(&mock_server)));

    assert_eq!(
        chain.astral_analysis("Ana", &chart).await,
        AstralAnalysis::fallback()
    );
}
