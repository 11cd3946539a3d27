//! Reading generation: card draw, provider fallback chain and the paid-reading
//! service shared by the live and recovery paths.

use crate::addons::AddOn;
use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderBreaker};
use crate::errors::{AppError, ResultExt};
use crate::lead_store::LeadStore;
use crate::models::{normalize_email, Card, Lead, LeadProfile, ReadingResponse};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const BASE_CARD_COUNT: usize = 3;
pub const EXTRA_CARDS_INCREMENT: usize = 2;

const READING_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Number of cards to draw for a lead's confirmed add-ons.
pub fn card_count(bumps: &BTreeSet<AddOn>) -> usize {
    if bumps.contains(&AddOn::ExtraCards) {
        BASE_CARD_COUNT + EXTRA_CARDS_INCREMENT
    } else {
        BASE_CARD_COUNT
    }
}

// ============ Collaborator traits ============

#[async_trait]
pub trait CardSource: Send + Sync {
    async fn draw(&self, count: usize) -> Result<Vec<Card>, AppError>;
}

/// A text-generation backend able to write a reading.
#[async_trait]
pub trait ReadingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One system prompt plus user prompt round trip.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AppError>;

    async fn generate(&self, request: &ReadingRequest) -> Result<String, AppError> {
        self.complete(SYSTEM_PROMPT, &build_prompt(request)).await
    }
}

/// Everything a provider needs to write one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRequest {
    pub profile: LeadProfile,
    pub bumps: BTreeSet<AddOn>,
    pub cards: Vec<Card>,
}

impl ReadingRequest {
    pub fn has(&self, addon: AddOn) -> bool {
        self.bumps.contains(&addon)
    }

    fn card_name(&self, idx: usize) -> &str {
        self.cards.get(idx).map(|c| c.name.as_str()).unwrap_or("a carta oculta")
    }

    fn has_extra_spread(&self) -> bool {
        self.cards.len() >= BASE_CARD_COUNT + EXTRA_CARDS_INCREMENT
    }
}

// ============ Prompt ============

pub const SYSTEM_PROMPT: &str = "Você é uma Alta Sacerdotisa Ancestral. Responda estritamente em Markdown. \
Use '## ' (h2) para títulos. NUNCA DEIXE A RESPOSTA INCOMPLETA. Escreva até o fim.";

const LOVE_HEADING: &str = "## ❤️ Alma Gêmea & Sinastria";

/// User prompt listing the profile, the drawn cards and the sections to write.
pub fn build_prompt(request: &ReadingRequest) -> String {
    let profile = &request.profile;
    let cards: Vec<String> = request
        .cards
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}ª Carta: {} ({})", i + 1, c.name, c.meaning))
        .collect();

    let mut sections = vec![
        "## 🌌 Sinfonia das Esferas\n(Introdução longa e poética sobre a vibração do nome e do momento.)".to_string(),
        format!(
            "## 🌱 A Raiz (Passado) - {}\n(Como o passado moldou o presente. Mínimo 2 parágrafos.)",
            request.card_name(0)
        ),
        format!(
            "## 🌫️ O Véu (Presente) - {}\n(O desafio atual e as energias invisíveis. Mínimo 2 parágrafos.)",
            request.card_name(1)
        ),
        format!(
            "## 🌅 O Horizonte (Futuro) - {}\n(O destino se o caminho for seguido. Mínimo 2 parágrafos.)",
            request.card_name(2)
        ),
    ];
    if request.has_extra_spread() {
        sections.push(format!(
            "## 🌑 O Inconsciente - {}\n(O que está escondido na sombra da psique.)",
            request.card_name(3)
        ));
        sections.push(format!(
            "## 🕊️ A Benção Final - {}\n(A mensagem final dos guias.)",
            request.card_name(4)
        ));
    }
    sections.push("## 👁️ Insight Oculto\n(Uma verdade que ninguém nunca disse ao consulente.)".into());
    sections.push("## 🕯️ Ritual Sugerido\n(Passo a passo de um ritual prático.)".into());
    if request.has(AddOn::Protection) {
        sections.push(
            "## 🛡️ Ritual de Proteção e Blindagem\n(Um ritual detalhado para selar a aura contra inveja e drenos energéticos.)"
                .into(),
        );
    }
    if request.has(AddOn::Love) {
        sections.push(format!(
            "{}\n(Análise profunda da vida amorosa, conexões de vidas passadas e futuro romântico.)",
            LOVE_HEADING
        ));
    }

    format!(
        "Você incorpora a consciência de uma Alta Sacerdotisa Ancestral.\n\n\
         DADOS DO CONSULENTE:\n- Nome: {}\n- Nascimento: {}\n- A Questão Sagrada: \"{}\"\n\n\
         AS LÂMINAS REVELADAS:\n{}\n\n\
         ESTRUTURA DA REVELAÇÃO (use exatamente estes cabeçalhos):\n{}\n\n\
         Termine com um parágrafo separado começando com \"⚠️\".\n\
         Tom solene e místico, em prosa fluida. NÃO use listas. NÃO retorne JSON.",
        profile.name,
        profile.birth_date,
        profile.question,
        cards.join("\n"),
        sections.join("\n\n"),
    )
}

fn has_love_section(text: &str) -> bool {
    ["Alma Gêmea", "Sinastria", "Love"]
        .iter()
        .any(|marker| text.contains(marker))
}

fn love_section(request: &ReadingRequest) -> String {
    format!(
        "{}\nAs cartas revelam uma vibração intensa na sua casa dos relacionamentos. \
         A energia de {} sugere que conexões cármicas estão ativas. \
         Se você está em um relacionamento, é hora de aprofundar o vínculo espiritual. \
         Se está só, um encontro marcado pelo destino se aproxima.",
        LOVE_HEADING,
        request.card_name(0)
    )
}

/// Deterministic reading built from the actual drawn cards.
///
/// Last resort when no provider answers, so it never fails.
pub fn template_reading(request: &ReadingRequest) -> String {
    let first = request.card_name(0);
    let present = request.card_name(1);
    let future = request.card_name(2);

    let mut reading = format!(
        "## 🌌 Sinfonia das Esferas\n\
         As estrelas dançam em uma configuração rara. A carta **{first}** que abre seu jogo \
         revela uma busca profunda por verdade. O cosmos sussurra que ciclos antigos estão se fechando.\n\n\
         ## 🌱 A Raiz (Passado) - {first}\n\
         A presença de **{first}** no seu passado indica uma fundação sólida, mas solitária. \
         O que você viveu recentemente serviu para forjar seu caráter.\n\n\
         ## 🌫️ O Véu (Presente) - {present}\n\
         No presente, **{present}** surge como aviso e bênção. Você está em um momento de transição. \
         Não force portas que ainda estão trancadas; a chave está em sua mão.\n\n\
         ## 🌅 O Horizonte (Futuro) - {future}\n\
         O futuro se ilumina com **{future}**. Se você mantiver o foco, a colheita será abundante."
    );

    if request.has_extra_spread() {
        let shadow = request.card_name(3);
        let blessing = request.card_name(4);
        reading.push_str(&format!(
            "\n\n## 🌑 O Inconsciente - {shadow}\n\
             Nas profundezas, **{shadow}** revela desejos que você não admite em voz alta.\n\n\
             ## 🕊️ A Benção Final - {blessing}\n\
             Como conselho final, **{blessing}** traz a confirmação. O ciclo se completa."
        ));
    }

    reading.push_str(&format!(
        "\n\n## 👁️ Insight Oculto\n\
         Sua intuição tem falado alto, mas a lógica tem abafado essa voz. É hora de ouvi-la.\n\n\
         ## 🕯️ Ritual Sugerido\n\
         Em uma noite de lua clara, acenda uma vela azul e escreva o desejo ligado à carta {future}."
    ));

    if request.has(AddOn::Protection) {
        reading.push_str(
            "\n\n## 🛡️ Ritual de Proteção e Blindagem\n\
             Trace um círculo de sal ao redor de uma vela branca e visualize uma luz dourada \
             selando sua aura contra toda inveja.",
        );
    }

    if request.has(AddOn::Love) {
        reading.push_str(&format!(
            "\n\n{LOVE_HEADING}\n\
             As cartas do amor revelam uma conexão de chama gêmea próxima. \
             Se você já tem alguém, essa relação passará por um teste de fogo para se elevar."
        ));
    }

    reading.push_str(&format!(
        "\n\n## ⚠️ Aviso Final\n\
         Apesar da luz de **{future}**, sinto uma energia densa tentando bloquear sua ascensão."
    ));

    reading
}

// ============ Provider chain ============

struct GuardedProvider {
    provider: Arc<dyn ReadingProvider>,
    breaker: ProviderBreaker,
}

/// Providers tried in priority order, then the template.
#[derive(Default)]
pub struct ReadingChain {
    providers: Vec<GuardedProvider>,
}

impl ReadingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider after the ones already registered.
    pub fn with_provider(mut self, provider: Arc<dyn ReadingProvider>) -> Self {
        self.providers.push(GuardedProvider {
            provider,
            breaker: create_provider_circuit_breaker(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Runs `call` against each provider in order, through its breaker, and
    /// returns the first success. `None` when every provider failed or was
    /// skipped.
    pub(crate) async fn first_success<T, F, Fut>(&self, task: &str, call: F) -> Option<T>
    where
        F: Fn(Arc<dyn ReadingProvider>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        for guarded in &self.providers {
            let name = guarded.provider.name();
            tracing::info!("Trying {} for {}", name, task);

            match guarded.breaker.call(call(Arc::clone(&guarded.provider))).await {
                Ok(value) => return Some(value),
                Err(failsafe::Error::Rejected) => {
                    tracing::warn!("Circuit open for {}, skipping", name);
                }
                Err(failsafe::Error::Inner(e)) => {
                    tracing::error!("{} failed for {}: {}", name, task, e);
                }
            }
        }
        None
    }

    /// First non-empty provider answer wins. Never fails.
    pub async fn generate(&self, request: &ReadingRequest) -> String {
        let answer = self
            .first_success("reading", |provider| async move {
                let text = provider.generate(request).await?;
                if text.trim().is_empty() {
                    return Err(AppError::ExternalApiError(format!(
                        "{} returned an empty reading",
                        provider.name()
                    )));
                }
                Ok::<_, AppError>(text)
            })
            .await;

        match answer {
            Some(mut text) => {
                if request.has(AddOn::Love) && !has_love_section(&text) {
                    tracing::warn!("Provider left out the love section, appending it");
                    text.push_str("\n\n");
                    text.push_str(&love_section(request));
                }
                text
            }
            None => {
                tracing::warn!("All reading providers failed, using template reading");
                template_reading(request)
            }
        }
    }
}

// ============ Paid reading service ============

/// Produces the reading for a paid lead.
///
/// Both the live session and the recovery path go through `reading_for`, and
/// results are cached per lead and add-on set, so the two never diverge.
pub struct ReadingService {
    store: Arc<dyn LeadStore>,
    cards: Arc<dyn CardSource>,
    chain: Arc<ReadingChain>,
    cache: Cache<String, ReadingResponse>,
}

impl ReadingService {
    pub fn new(
        store: Arc<dyn LeadStore>,
        cards: Arc<dyn CardSource>,
        chain: Arc<ReadingChain>,
    ) -> Self {
        let cache = Cache::builder()
            .time_to_live(READING_CACHE_TTL)
            .max_capacity(10_000)
            .build();
        Self {
            store,
            cards,
            chain,
            cache,
        }
    }

    pub async fn reading_for(&self, email: &str) -> Result<ReadingResponse, AppError> {
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

        let key = cache_key(&lead);
        self.cache
            .try_get_with(key, self.generate(&lead))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn generate(&self, lead: &Lead) -> Result<ReadingResponse, AppError> {
        let count = card_count(&lead.selected_bumps);
        tracing::info!(
            "🔮 Generating reading for {} ({} cards, bumps: {:?})",
            lead.email,
            count,
            lead.selected_bumps
        );

        let cards = self.cards.draw(count).await.context("Failed to draw cards")?;
        let request = ReadingRequest {
            profile: lead.profile(),
            bumps: lead.selected_bumps.clone(),
            cards,
        };
        let reading = self.chain.generate(&request).await;

        Ok(ReadingResponse {
            cards: request.cards,
            reading,
            bumps: request.bumps.into_iter().collect(),
        })
    }
}

/// Lead id plus the confirmed add-ons, so a later add-on purchase regenerates.
fn cache_key(lead: &Lead) -> String {
    let bumps: Vec<&str> = lead.selected_bumps.iter().map(AddOn::as_str).collect();
    format!("{}:{}", lead.id, bumps.join(","))
}
