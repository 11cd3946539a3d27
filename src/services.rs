use crate::config::Config;
use crate::errors::AppError;
use crate::horoscope::{BirthData, ChartPositions, ChartSource};
use crate::models::Card;
use crate::reading::{CardSource, ReadingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const IMAGE_BASE_URL: &str = "https://www.sacred-texts.com/tarot/pkt/img";

// ============ Card draw ============

/// Card as returned by tarotapi.dev.
#[derive(Debug, Deserialize)]
struct TarotApiCard {
    name: String,
    #[serde(default)]
    meaning_up: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TarotApiResponse {
    cards: Vec<TarotApiCard>,
}

/// Random card draws from tarotapi.dev, with a fixed deck when it is unreachable.
pub struct TarotApiClient {
    client: Client,
    base_url: String,
}

impl TarotApiClient {
    pub fn new(config: &Config) -> Self {
        Self::with_base_url(config.tarot_api_url.clone())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    async fn fetch(&self, count: usize) -> Result<Vec<Card>, AppError> {
        let url = format!("{}/api/v1/cards/random", self.base_url);
        tracing::debug!("Drawing {} cards from {}", count, url);

        let response = self
            .client
            .get(&url)
            .query(&[("n", count)])
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Tarot API request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Tarot API returned status {}",
                response.status()
            )));
        }

        let body: TarotApiResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Tarot API response: {}", e))
        })?;

        if body.cards.len() < count {
            return Err(AppError::ExternalApiError(format!(
                "Tarot API returned {} cards, expected {}",
                body.cards.len(),
                count
            )));
        }

        Ok(body
            .cards
            .into_iter()
            .take(count)
            .map(|card| Card {
                image: Some(
                    card_image_url(&card.name).unwrap_or_else(|| {
                        format!("{}/ar01.jpg", IMAGE_BASE_URL)
                    }),
                ),
                name: card.name,
                meaning: card.meaning_up,
                kind: card.kind,
            })
            .collect())
    }
}

#[async_trait]
impl CardSource for TarotApiClient {
    async fn draw(&self, count: usize) -> Result<Vec<Card>, AppError> {
        match self.fetch(count).await {
            Ok(cards) => Ok(cards),
            Err(e) => {
                tracing::error!("Error fetching cards, using fallback deck: {}", e);
                Ok(fallback_deck(count))
            }
        }
    }
}

/// Fixed Rider-Waite cards used when the draw API is down.
pub fn fallback_deck(count: usize) -> Vec<Card> {
    const DECK: [(&str, &str, &str); 5] = [
        ("The Magician", "Manifestation, resourcefulness, power", "ar01"),
        ("The High Priestess", "Intuition, sacred knowledge, divine feminine", "ar02"),
        ("The Empress", "Femininity, beauty, nature, nurturing", "ar03"),
        ("The Emperor", "Authority, structure, control, fatherhood", "ar04"),
        ("The Hierophant", "Spiritual wisdom, religious beliefs, conformity", "ar05"),
    ];

    DECK.iter()
        .take(count)
        .map(|(name, meaning, code)| Card {
            name: name.to_string(),
            meaning: meaning.to_string(),
            kind: "major".to_string(),
            image: Some(format!("{}/{}.jpg", IMAGE_BASE_URL, code)),
        })
        .collect()
}

/// Rider-Waite image for a card name, e.g. "Queen of Cups" -> `cuqu.jpg`.
pub fn card_image_url(card_name: &str) -> Option<String> {
    const MAJOR: [&str; 22] = [
        "the fool",
        "the magician",
        "the high priestess",
        "the empress",
        "the emperor",
        "the hierophant",
        "the lovers",
        "the chariot",
        "strength",
        "the hermit",
        "wheel of fortune",
        "justice",
        "the hanged man",
        "death",
        "temperance",
        "the devil",
        "the tower",
        "the star",
        "the moon",
        "the sun",
        "judgement",
        "the world",
    ];
    const SUITS: [(&str, &str); 4] = [
        ("wands", "wa"),
        ("cups", "cu"),
        ("swords", "sw"),
        ("pentacles", "pe"),
    ];
    const VALUES: [(&str, &str); 14] = [
        ("ace", "ac"),
        ("two", "02"),
        ("three", "03"),
        ("four", "04"),
        ("five", "05"),
        ("six", "06"),
        ("seven", "07"),
        ("eight", "08"),
        ("nine", "09"),
        ("ten", "10"),
        ("page", "pa"),
        ("knight", "kn"),
        ("queen", "qu"),
        ("king", "ki"),
    ];

    let name = card_name.trim().to_lowercase();
    if let Some(idx) = MAJOR.iter().position(|m| *m == name) {
        return Some(format!("{}/ar{:02}.jpg", IMAGE_BASE_URL, idx));
    }

    let suit = SUITS.iter().find(|(s, _)| name.contains(s))?.1;
    let value = VALUES
        .iter()
        .find(|(v, _)| name.split_whitespace().next() == Some(*v))?
        .1;
    Some(format!("{}/{}{}.jpg", IMAGE_BASE_URL, suit, value))
}

// ============ Natal chart ============

/// Ephemeris service that geocodes the birthplace and returns planet positions.
pub struct HttpChartSource {
    client: Client,
    base_url: String,
}

impl HttpChartSource {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        config.chart_api_url.clone().map(Self::new)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChartSource for HttpChartSource {
    async fn positions(&self, birth: &BirthData) -> Result<ChartPositions, AppError> {
        let url = format!("{}/api/v1/chart", self.base_url);
        tracing::debug!("Requesting chart for {} from {}", birth.birth_date, url);

        let response = self
            .client
            .post(&url)
            .json(birth)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Chart API request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Chart API returned status {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Chart API response: {}", e))
        })
    }
}

// ============ Reading providers ============

/// Primary provider: Groq's OpenAI-compatible chat completions API.
pub struct GroqProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GroqProvider {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    /// Builds the provider when an API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.groq_api_key.clone().map(|key| {
            Self::new(config.groq_base_url.clone(), key, config.groq_model.clone())
        })
    }
}

#[async_trait]
impl ReadingProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AppError> {
        let body = json!({
            "model": self.model,
            "temperature": 1,
            "max_tokens": 4096,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Groq request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Groq returned {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Groq response: {}", e))
        })?;

        data.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::ExternalApiError("Groq response had no content".into()))
    }
}

/// Secondary provider: Google Gemini `generateContent`.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        config.google_api_key.clone().map(|key| {
            Self::new(config.gemini_base_url.clone(), key, config.gemini_model.clone())
        })
    }
}

#[async_trait]
impl ReadingProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AppError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            // Body may echo the key in the URL; keep only the status.
            return Err(AppError::ExternalApiError(format!(
                "Gemini returned status {}",
                response.status()
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Gemini response: {}", e))
        })?;

        let text: String = data
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AppError::ExternalApiError(
                "Gemini response had no content".into(),
            ));
        }
        Ok(text)
    }
}
