//! Add-on (order bump) identification.
//!
//! The payment processor only reliably reports free-text product and offer
//! names, so add-ons are inferred by accent-insensitive keyword matching plus
//! a couple of fixed offer identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Optional paid extras layered on top of the base reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOn {
    ExtraCards,
    Love,
    Protection,
    Horoscope,
}

impl AddOn {
    pub const ALL: [AddOn; 4] = [
        AddOn::ExtraCards,
        AddOn::Love,
        AddOn::Protection,
        AddOn::Horoscope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddOn::ExtraCards => "extra_cards",
            AddOn::Love => "love",
            AddOn::Protection => "protection",
            AddOn::Horoscope => "horoscope",
        }
    }

    /// Keywords (already folded to lower-case ASCII) that trigger this add-on.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            AddOn::ExtraCards => &["carta", "extra", "aprofundada"],
            AddOn::Love => &[
                "amor",
                "compatibilidade",
                "sinastria",
                "alma",
                "gemea",
                "analise",
            ],
            AddOn::Protection => &["protecao", "blindagem"],
            AddOn::Horoscope => &["mapa", "astral"],
        }
    }
}

impl fmt::Display for AddOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "extra_cards" => Ok(AddOn::ExtraCards),
            "love" => Ok(AddOn::Love),
            "protection" => Ok(AddOn::Protection),
            "horoscope" => Ok(AddOn::Horoscope),
            other => Err(format!("unknown add-on '{}'", other)),
        }
    }
}

/// Fixed checkout offer identifiers that map straight to an add-on.
#[derive(Debug, Clone, Default)]
pub struct OfferCatalog {
    pub protection_offer_id: Option<String>,
    pub horoscope_offer_id: Option<String>,
}

impl OfferCatalog {
    /// Add-on bound to the given offer identifier, if any.
    pub fn addon_for_offer(&self, offer_id: &str) -> Option<AddOn> {
        let offer_id = offer_id.trim();
        if offer_id.is_empty() {
            return None;
        }
        let matches = |known: &Option<String>| {
            known
                .as_deref()
                .is_some_and(|k| k.trim().eq_ignore_ascii_case(offer_id))
        };

        if matches(&self.protection_offer_id) {
            Some(AddOn::Protection)
        } else if matches(&self.horoscope_offer_id) {
            Some(AddOn::Horoscope)
        } else {
            None
        }
    }
}

/// Lower-cases and strips Portuguese diacritics.
pub fn fold_accents(input: &str) -> String {
    input
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Infers which add-ons a confirmed purchase covers.
///
/// Only the product-name fields are inspected, never the whole payload. A
/// recognised offer identifier always contributes its add-on on top of any
/// keyword matches.
pub fn infer_addons<S: AsRef<str>>(
    product_names: &[S],
    offer_id: Option<&str>,
    catalog: &OfferCatalog,
) -> BTreeSet<AddOn> {
    let mut detected = BTreeSet::new();

    if let Some(addon) = offer_id.and_then(|id| catalog.addon_for_offer(id)) {
        detected.insert(addon);
    }

    for name in product_names {
        let folded = fold_accents(name.as_ref());
        if folded.trim().is_empty() {
            continue;
        }
        for addon in AddOn::ALL {
            if addon.keywords().iter().any(|kw| folded.contains(kw)) {
                detected.insert(addon);
            }
        }
    }

    detected
}

/// Parses stored add-on names, skipping anything unrecognised.
pub fn parse_addons<S: AsRef<str>>(raw: &[S]) -> BTreeSet<AddOn> {
    raw.iter()
        .filter_map(|s| match s.as_ref().parse::<AddOn>() {
            Ok(addon) => Some(addon),
            Err(e) => {
                tracing::warn!("Ignoring stored add-on: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> OfferCatalog {
        OfferCatalog {
            protection_offer_id: Some("off_blind_77".to_string()),
            horoscope_offer_id: Some("off_mapa_42".to_string()),
        }
    }

    #[test]
    fn test_horoscope_product_is_not_protection() {
        let found = infer_addons(&["Mapa Astral Completo"], None, &catalog());
        assert_eq!(found, BTreeSet::from([AddOn::Horoscope]));
    }

    #[test]
    fn test_blindagem_is_protection_only() {
        let found = infer_addons(&["Ritual de Blindagem"], None, &catalog());
        assert_eq!(found, BTreeSet::from([AddOn::Protection]));
    }

    #[test]
    fn test_accented_keywords_match() {
        let found = infer_addons(&["Análise de Compatibilidade Amorosa"], None, &catalog());
        assert_eq!(found, BTreeSet::from([AddOn::Love]));

        let found = infer_addons(&["Ritual de PROTEÇÃO"], None, &catalog());
        assert_eq!(found, BTreeSet::from([AddOn::Protection]));
    }

    #[test]
    fn test_base_product_has_no_addons() {
        assert!(infer_addons(&["Leitura Completa"], None, &catalog()).is_empty());
        assert!(infer_addons::<&str>(&[], None, &catalog()).is_empty());
    }

    #[test]
    fn test_line_items_accumulate() {
        let found = infer_addons(
            &["Leitura de Tarot", "+ 2 Cartas (Leitura Aprofundada)", "Alma Gêmea"],
            None,
            &catalog(),
        );
        assert_eq!(found, BTreeSet::from([AddOn::ExtraCards, AddOn::Love]));
    }

    #[test]
    fn test_offer_id_supplements_keywords() {
        let found = infer_addons(&["Oferta Especial"], Some("off_blind_77"), &catalog());
        assert_eq!(found, BTreeSet::from([AddOn::Protection]));

        let found = infer_addons(&["Carta Extra"], Some("OFF_MAPA_42"), &catalog());
        assert_eq!(found, BTreeSet::from([AddOn::ExtraCards, AddOn::Horoscope]));
    }

    #[test]
    fn test_unknown_offer_id_is_ignored() {
        let found = infer_addons(&["Leitura"], Some("something-else"), &catalog());
        assert!(found.is_empty());
        assert_eq!(OfferCatalog::default().addon_for_offer("off_blind_77"), None);
    }

    #[test]
    fn test_fold_accents() {
        assert_eq!(fold_accents("Gêmea ÇÃO Análise"), "gemea cao analise");
    }

    #[test]
    fn test_parse_addons_skips_unknown() {
        let parsed = parse_addons(&["love", "bogus", "extra_cards"]);
        assert_eq!(parsed, BTreeSet::from([AddOn::ExtraCards, AddOn::Love]));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&AddOn::ExtraCards).unwrap();
        assert_eq!(json, "\"extra_cards\"");
        let back: AddOn = serde_json::from_str("\"horoscope\"").unwrap();
        assert_eq!(back, AddOn::Horoscope);
    }
}
