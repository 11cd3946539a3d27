//! Natal chart upsell: chart assembly, aspects, and the astral analysis text.
//!
//! Planet positions and geocoding come from a [`ChartSource`]. Everything
//! derived from them (signs, equal-house cusps, aspects) is computed here,
//! and the narrative goes through the same provider chain as readings.

use crate::addons::AddOn;
use crate::errors::{AppError, ResultExt};
use crate::lead_store::LeadStore;
use crate::models::normalize_email;
use crate::reading::ReadingChain;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const HOROSCOPE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_BIRTH_TIME: &str = "12:00";

pub const ZODIAC_SIGNS: [&str; 12] = [
    "Áries",
    "Touro",
    "Gêmeos",
    "Câncer",
    "Leão",
    "Virgem",
    "Libra",
    "Escorpião",
    "Sagitário",
    "Capricórnio",
    "Aquário",
    "Peixes",
];

/// Sign for an ecliptic longitude in degrees. Any real value is accepted.
pub fn zodiac_sign(longitude: f64) -> &'static str {
    let index = (longitude.rem_euclid(360.0) / 30.0).floor() as usize;
    ZODIAC_SIGNS[index.min(11)]
}

/// Equal house system: twelve 30° houses starting at the ascendant.
pub fn equal_house_cusps(ascendant: f64) -> Vec<f64> {
    (0..12)
        .map(|i| (ascendant + 30.0 * i as f64).rem_euclid(360.0))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectKind {
    Conjunction,
    Opposition,
    Trine,
    Square,
    Sextile,
}

impl AspectKind {
    pub const ALL: [AspectKind; 5] = [
        AspectKind::Conjunction,
        AspectKind::Opposition,
        AspectKind::Trine,
        AspectKind::Square,
        AspectKind::Sextile,
    ];

    pub fn angle(&self) -> f64 {
        match self {
            AspectKind::Conjunction => 0.0,
            AspectKind::Opposition => 180.0,
            AspectKind::Trine => 120.0,
            AspectKind::Square => 90.0,
            AspectKind::Sextile => 60.0,
        }
    }

    /// Maximum allowed deviation from the exact angle.
    pub fn orb(&self) -> f64 {
        match self {
            AspectKind::Sextile => 6.0,
            _ => 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanetPosition {
    /// Ecliptic longitude in degrees.
    pub lon: f64,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub is_retrograde: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    pub p1: String,
    pub p2: String,
    #[serde(rename = "type")]
    pub kind: AspectKind,
    /// Actual separation in degrees, folded into 0..=180.
    pub angle: f64,
    pub orb: f64,
}

/// Every planet pair within orb of a major aspect.
pub fn find_aspects(planets: &BTreeMap<String, PlanetPosition>) -> Vec<Aspect> {
    let bodies: Vec<(&String, &PlanetPosition)> = planets.iter().collect();
    let mut aspects = Vec::new();

    for (i, (p1, pos1)) in bodies.iter().enumerate() {
        for (p2, pos2) in &bodies[i + 1..] {
            let mut diff = (pos1.lon - pos2.lon).abs().rem_euclid(360.0);
            if diff > 180.0 {
                diff = 360.0 - diff;
            }
            for kind in AspectKind::ALL {
                let orb = (diff - kind.angle()).abs();
                if orb <= kind.orb() {
                    aspects.push(Aspect {
                        p1: p1.to_string(),
                        p2: p2.to_string(),
                        kind,
                        angle: diff,
                        orb,
                    });
                }
            }
        }
    }
    aspects
}

// ============ Chart source ============

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirthData {
    /// `YYYY-MM-DD`.
    pub birth_date: String,
    /// `HH:MM`, local time at the birthplace.
    pub birth_time: String,
    #[serde(default)]
    pub city: Option<String>,
}

/// Raw astronomical data for a birth moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPositions {
    pub planets: BTreeMap<String, PlanetPosition>,
    pub ascendant: f64,
    /// Resolved birthplace label.
    pub location: String,
}

/// Ephemeris plus geocoding.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn positions(&self, birth: &BirthData) -> Result<ChartPositions, AppError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatalChart {
    pub planets: BTreeMap<String, PlanetPosition>,
    pub ascendant: f64,
    pub cusps: Vec<f64>,
    pub aspects: Vec<Aspect>,
}

impl NatalChart {
    pub fn from_positions(positions: &ChartPositions) -> Result<Self, AppError> {
        if !positions.planets.contains_key("Sun") {
            return Err(AppError::ExternalApiError(
                "Chart source returned no Sun position".to_string(),
            ));
        }
        Ok(Self {
            planets: positions.planets.clone(),
            ascendant: positions.ascendant.rem_euclid(360.0),
            cusps: equal_house_cusps(positions.ascendant),
            aspects: find_aspects(&positions.planets),
        })
    }

    pub fn sun_sign(&self) -> &'static str {
        self.planets
            .get("Sun")
            .map(|sun| zodiac_sign(sun.lon))
            .unwrap_or(ZODIAC_SIGNS[0])
    }
}

// ============ Astral analysis ============

/// Narrative sections shown on the chart page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstralAnalysis {
    pub trinity: String,
    pub personal: String,
    pub social: String,
    pub houses: String,
    pub aspects: String,
    pub evolutionary: String,
    pub synthesis: String,
}

impl AstralAnalysis {
    pub fn fallback() -> Self {
        Self {
            trinity: "As estrelas revelam uma base sólida.".into(),
            personal: "Sua mente busca clareza.".into(),
            social: "Foco em crescimento pessoal.".into(),
            houses: "Áreas de vida em expansão.".into(),
            aspects: "Desafios trazem evolução.".into(),
            evolutionary: "Caminho de transformação.".into(),
            synthesis: "Seu destino está em suas mãos.".into(),
        }
    }
}

pub const ASTRAL_SYSTEM_PROMPT: &str = "Você é um Oráculo Ancestral. Você fala APENAS em prosa poética. \
Você odeia listas. Você escreve parágrafos completos, gramaticalmente perfeitos e emocionantes. \
Responda somente com um objeto JSON.";

pub fn build_astral_prompt(name: &str, chart: &NatalChart) -> String {
    let planets: Vec<String> = chart
        .planets
        .iter()
        .map(|(body, pos)| {
            format!(
                "{} em {} (Grau {:.1})",
                body,
                zodiac_sign(pos.lon),
                pos.lon.rem_euclid(30.0)
            )
        })
        .collect();
    let aspects: Vec<String> = chart
        .aspects
        .iter()
        .map(|a| format!("{} {:?} {}", a.p1, a.kind, a.p2))
        .collect();

    format!(
        r#"Mapa astral de {name}.

DADOS DO MAPA:
- Ascendente: {asc:.2}° ({asc_sign})
- Planetas: {planets}
- Aspectos principais: {aspects}

Escreva uma narrativa fluida, poética e psicológica. Sem listas, sem tópicos, sem títulos e sem graus.

Formato de saída (obrigatoriamente JSON):
{{
  "trinity": "2 parágrafos sobre a essência (Sol), o coração (Lua) e a máscara (Ascendente).",
  "personal": "Texto corrido sobre como a pessoa pensa e ama.",
  "social": "Reflexão sobre a sorte (Júpiter) e os desafios (Saturno).",
  "houses": "Um parágrafo sobre destino profissional e vocação.",
  "aspects": "As tensões do mapa como batalhas internas que a pessoa vence.",
  "evolutionary": "A missão da alma e o que precisa ser curado nesta vida.",
  "synthesis": "Uma mensagem final acolhedora, como um sussurro do universo."
}}"#,
        name = name,
        asc = chart.ascendant,
        asc_sign = zodiac_sign(chart.ascendant),
        planets = planets.join(", "),
        aspects = aspects.join(", "),
    )
}

/// Parses provider output, tolerating markdown fences or prose around the object.
pub fn parse_astral_json(raw: &str) -> Result<AstralAnalysis, AppError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => raw,
    };
    serde_json::from_str(body)
        .map_err(|e| AppError::ExternalApiError(format!("Astral analysis was not valid JSON: {}", e)))
}

impl ReadingChain {
    /// First provider answer that parses wins. Never fails.
    pub async fn astral_analysis(&self, name: &str, chart: &NatalChart) -> AstralAnalysis {
        let prompt = build_astral_prompt(name, chart);
        let answer = self
            .first_success("astral analysis", |provider| {
                let prompt = &prompt;
                async move {
                    let raw = provider.complete(ASTRAL_SYSTEM_PROMPT, prompt).await?;
                    parse_astral_json(&raw)
                }
            })
            .await;

        answer.unwrap_or_else(|| {
            tracing::warn!("All providers failed for astral analysis, using fallback text");
            AstralAnalysis::fallback()
        })
    }
}

// ============ Horoscope service ============

/// Body of `POST /api/horoscope`. Birth data falls back to the lead's.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoroscopeQuery {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "birth_date")]
    pub birth_date: Option<String>,
    #[serde(default, alias = "birth_time")]
    pub birth_time: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoroscopeResponse {
    pub sun_sign: String,
    pub location: String,
    pub prediction: AstralAnalysis,
    pub chart: NatalChart,
}

/// Produces the natal chart for leads that paid for the horoscope add-on.
pub struct HoroscopeService {
    store: Arc<dyn LeadStore>,
    charts: Option<Arc<dyn ChartSource>>,
    chain: Arc<ReadingChain>,
    cache: Cache<String, HoroscopeResponse>,
}

impl HoroscopeService {
    pub fn new(
        store: Arc<dyn LeadStore>,
        charts: Option<Arc<dyn ChartSource>>,
        chain: Arc<ReadingChain>,
    ) -> Self {
        let cache = Cache::builder()
            .time_to_live(HOROSCOPE_CACHE_TTL)
            .max_capacity(10_000)
            .build();
        Self {
            store,
            charts,
            chain,
            cache,
        }
    }

    pub async fn horoscope_for(
        &self,
        email: &str,
        query: &HoroscopeQuery,
    ) -> Result<HoroscopeResponse, AppError> {
        let email = normalize_email(email);
        let lead = self
            .store
            .latest_for_email(&email)
            .await
            .with_context(|| format!("Failed to look up lead for {}", email))?
            .ok_or_else(|| AppError::NotFound(format!("No lead found for {}", email)))?;

        if !lead.status.is_paid() {
            return Err(AppError::PaymentRequired(
                "Payment not confirmed yet".to_string(),
            ));
        }
        if !lead.selected_bumps.contains(&AddOn::Horoscope) {
            return Err(AppError::PaymentRequired(
                "Horoscope add-on not purchased".to_string(),
            ));
        }

        let birth = birth_data(query, &lead.birth_date)?;
        let charts = self.charts.clone().ok_or_else(|| {
            AppError::ExternalApiError("Chart service is not configured".to_string())
        })?;

        let key = format!(
            "{}:{}:{}:{}",
            lead.id,
            birth.birth_date,
            birth.birth_time,
            birth.city.as_deref().unwrap_or_default().to_lowercase()
        );
        let name = lead.name.clone();
        self.cache
            .try_get_with(key, self.generate(charts, name, birth))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn generate(
        &self,
        charts: Arc<dyn ChartSource>,
        name: String,
        birth: BirthData,
    ) -> Result<HoroscopeResponse, AppError> {
        tracing::info!("✨ Building natal chart for {} ({})", name, birth.birth_date);
        let positions = charts
            .positions(&birth)
            .await
            .context("Failed to compute chart positions")?;
        let chart = NatalChart::from_positions(&positions)?;
        let prediction = self.chain.astral_analysis(&name, &chart).await;

        Ok(HoroscopeResponse {
            sun_sign: chart.sun_sign().to_string(),
            location: positions.location,
            prediction,
            chart,
        })
    }
}

fn birth_data(query: &HoroscopeQuery, lead_birth_date: &str) -> Result<BirthData, AppError> {
    let birth_date = query
        .birth_date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(lead_birth_date.trim())
        .to_string();
    if birth_date.is_empty() {
        return Err(AppError::BadRequest("Birth date is required".to_string()));
    }
    NaiveDate::parse_from_str(&birth_date, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!("Invalid birth date {}, expected YYYY-MM-DD", birth_date))
    })?;

    let birth_time = query
        .birth_time
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_BIRTH_TIME)
        .to_string();
    NaiveTime::parse_from_str(&birth_time, "%H:%M").map_err(|_| {
        AppError::BadRequest(format!("Invalid birth time {}, expected HH:MM", birth_time))
    })?;

    let city = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(BirthData {
        birth_date,
        birth_time,
        city,
    })
}
