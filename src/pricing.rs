//! Competitor price comparison.
//!
//! Competitor listings are matched against our product with a weighted
//! keyword heuristic; only listings that look like the same product take
//! part in the price statistics.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Marketplace;

const TOKEN_WEIGHT: i32 = 10;
const MODEL_TOKEN_BONUS: i32 = 5;
const BRAND_WEIGHT: i32 = 15;
const PHRASE_WEIGHT: i32 = 20;
const ACCESSORY_PENALTY: i32 = 15;

pub const DEFAULT_MIN_RELEVANCE: u8 = 40;

const STOPWORDS: &[&str] = &[
    "de", "da", "do", "das", "dos", "para", "com", "sem", "em", "e", "o", "a", "os", "as", "um", "uma",
    "the", "for", "with", "and", "of",
];

/// Words that usually mark a listing as an accessory for the product rather than the product.
const ACCESSORY_WORDS: &[&str] = &[
    "capa", "capinha", "case", "pelicula", "suporte", "refil", "adaptador", "cabo", "carregador", "protetor", "replacement",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingQuery {
    pub title: String,
    #[serde(default)]
    pub brand: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompetitorListing {
    pub title: String,
    pub price: Decimal,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default)]
    pub marketplace: Option<Marketplace>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sold_quantity: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredListing {
    #[serde(flatten)]
    pub listing: CompetitorListing,
    pub relevance: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePosition { Cheapest, BelowMarket, Competitive, AboveMarket }

#[derive(Debug, Clone, Serialize)]
pub struct PriceComparison {
    pub considered: usize,
    pub matched: usize,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub median_price: Option<Decimal>,
    pub position: Option<PricePosition>,
    pub suggested_price: Option<Decimal>,
    pub competitors: Vec<ScoredListing>,
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Lowercases, folds Portuguese diacritics and splits on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(fold_char)
        .collect::<String>()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn is_model_token(token: &str) -> bool { token.chars().any(|c| c.is_ascii_digit()) }

fn token_weight(token: &str) -> i32 {
    if is_model_token(token) { TOKEN_WEIGHT + MODEL_TOKEN_BONUS } else { TOKEN_WEIGHT }
}

fn dedup(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

/// Relevance of `candidate` for `query`, from 0 to 100.
pub fn relevance_score(query: &PricingQuery, candidate: &str) -> u8 {
    let query_tokens = dedup(tokenize(&query.title));
    let brand_tokens = query.brand.as_deref().map(tokenize).unwrap_or_default();
    let candidate_tokens = tokenize(candidate);
    let candidate_set: HashSet<&str> = candidate_tokens.iter().map(String::as_str).collect();
    let query_set: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();

    let mut max_score: i32 = query_tokens.iter().map(|t| token_weight(t)).sum::<i32>() + PHRASE_WEIGHT;
    if !brand_tokens.is_empty() { max_score += BRAND_WEIGHT; }
    if query_tokens.is_empty() { return 0; }

    let mut score: i32 = query_tokens.iter()
        .filter(|t| candidate_set.contains(t.as_str()))
        .map(|t| token_weight(t))
        .sum();

    if !brand_tokens.is_empty() && brand_tokens.iter().all(|t| candidate_set.contains(t.as_str())) {
        score += BRAND_WEIGHT;
    }
    if format!(" {} ", candidate_tokens.join(" ")).contains(&format!(" {} ", query_tokens.join(" "))) {
        score += PHRASE_WEIGHT;
    }
    if ACCESSORY_WORDS.iter().any(|w| candidate_set.contains(w) && !query_set.contains(w)) {
        score -= ACCESSORY_PENALTY;
    }

    let normalized = score.max(0) * 100 / max_score;
    normalized.clamp(0, 100) as u8
}

fn median(sorted: &[Decimal]) -> Option<Decimal> {
    let n = sorted.len();
    if n == 0 { return None; }
    Some(if n % 2 == 1 { sorted[n / 2] } else { (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::TWO })
}

/// Scores `listings`, keeps the relevant ones and positions `our_price` against them.
///
/// The suggested price undercuts the median by 2% but never goes below `floor_price`.
pub fn compare(query: &PricingQuery, our_price: Decimal, floor_price: Decimal, listings: Vec<CompetitorListing>, min_relevance: u8) -> PriceComparison {
    let considered = listings.len();
    let mut competitors: Vec<ScoredListing> = listings.into_iter()
        .filter(|l| l.price > Decimal::ZERO)
        .map(|l| ScoredListing { relevance: relevance_score(query, &l.title), listing: l })
        .filter(|s| s.relevance >= min_relevance)
        .collect();
    competitors.sort_by(|a, b| b.relevance.cmp(&a.relevance).then(a.listing.price.cmp(&b.listing.price)));

    let mut prices: Vec<Decimal> = competitors.iter().map(|c| c.listing.price).collect();
    prices.sort();
    let median_price = median(&prices);
    let average_price = (!prices.is_empty())
        .then(|| (prices.iter().copied().sum::<Decimal>() / Decimal::from(prices.len())).round_dp(2));
    let min_price = prices.first().copied();

    let position = match (min_price, median_price) {
        (Some(min), Some(median)) => {
            let tolerance = median * Decimal::new(5, 2);
            Some(if our_price <= min {
                PricePosition::Cheapest
            } else if (our_price - median).abs() <= tolerance {
                PricePosition::Competitive
            } else if our_price > median {
                PricePosition::AboveMarket
            } else {
                PricePosition::BelowMarket
            })
        }
        _ => None,
    };
    let suggested_price = median_price.map(|m| (m * Decimal::new(98, 2)).round_dp(2).max(floor_price));

    PriceComparison {
        considered,
        matched: competitors.len(),
        min_price,
        max_price: prices.last().copied(),
        average_price,
        median_price,
        position,
        suggested_price,
        competitors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> PricingQuery {
        PricingQuery { title: "Fone de Ouvido Bluetooth JBL Tune 510BT".into(), brand: Some("JBL".into()) }
    }

    fn listing(title: &str, price: i64) -> CompetitorListing {
        CompetitorListing { title: title.into(), price: Decimal::new(price, 2), seller: None, marketplace: None, url: None, sold_quantity: None }
    }

    #[test]
    fn test_tokenize_folds_accents_and_drops_stopwords() {
        assert_eq!(tokenize("Café com Açúcar - 500g"), vec!["cafe", "acucar", "500g"]);
    }

    #[test]
    fn test_exact_title_scores_full() {
        let q = query();
        assert_eq!(relevance_score(&q, "Fone de Ouvido Bluetooth JBL Tune 510BT"), 100);
        assert_eq!(relevance_score(&q, "Fone Ouvido Bluetooth JBL Tune 510BT Preto"), 100);
    }

    #[test]
    fn test_accessory_and_unrelated_listings_score_low() {
        let q = query();
        let exact = relevance_score(&q, "Fone JBL Tune 510BT Bluetooth");
        let accessory = relevance_score(&q, "Capa Protetora para Fone JBL Tune 510BT");
        assert!(accessory < exact);
        assert_eq!(relevance_score(&q, "Panela de Pressão 4,5L"), 0);
    }

    #[test]
    fn test_scores_never_negative() {
        let q = PricingQuery { title: "Smartwatch".into(), brand: None };
        assert_eq!(relevance_score(&q, "Capa Case Suporte Pelicula"), 0);
        assert_eq!(relevance_score(&PricingQuery { title: "de a".into(), brand: None }, "qualquer"), 0);
    }

    #[test]
    fn test_compare_statistics_and_suggestion() {
        let q = query();
        let listings = vec![
            listing("Fone de Ouvido Bluetooth JBL Tune 510BT", 22000),
            listing("JBL Tune 510BT Fone Bluetooth Azul", 24000),
            listing("Fone de Ouvido Bluetooth JBL Tune 510BT Original", 26000),
            listing("Capa silicone fone", 1500),
            listing("Fone JBL Tune 510BT", 0),
        ];
        let c = compare(&q, Decimal::new(30000, 2), Decimal::new(20000, 2), listings, DEFAULT_MIN_RELEVANCE);
        assert_eq!(c.considered, 5);
        assert_eq!(c.matched, 3);
        assert_eq!(c.min_price, Some(Decimal::new(22000, 2)));
        assert_eq!(c.median_price, Some(Decimal::new(24000, 2)));
        assert_eq!(c.average_price, Some(Decimal::new(24000, 2)));
        assert_eq!(c.position, Some(PricePosition::AboveMarket));
        assert_eq!(c.suggested_price, Some(Decimal::new(23520, 2)));
    }

    #[test]
    fn test_suggestion_respects_floor_and_empty_market() {
        let q = query();
        let c = compare(&q, Decimal::new(100, 0), Decimal::new(250, 0), vec![listing("Fone Bluetooth JBL Tune 510BT", 20000)], 40);
        assert_eq!(c.suggested_price, Some(Decimal::new(250, 0)));
        assert_eq!(c.position, Some(PricePosition::Cheapest));

        let none = compare(&q, Decimal::new(100, 0), Decimal::ZERO, vec![], 40);
        assert_eq!(none.suggested_price, None);
        assert_eq!(none.position, None);
    }
}
