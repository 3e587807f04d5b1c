//! Business insights: fixed rules over the catalogue and recent sales, optionally extended by a language model.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::llm::{parse_json_answer, ChatMessage, LlmError, LlmProvider};
use crate::Result;

const LOW_MARGIN_PERCENT: i64 = 10;
const TREND_PERCENT: i64 = 20;
const MAX_MODEL_INSIGHTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority { High, Medium, Low }

impl Priority {
    pub fn as_str(&self) -> &'static str { match self { Self::High => "high", Self::Medium => "medium", Self::Low => "low" } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource { Rules, Ai }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub insight_type: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub source: InsightSource,
}

impl Insight {
    fn rule(insight_type: &str, title: String, description: String, priority: Priority) -> Self {
        Self { insight_type: insight_type.to_string(), title, description, priority, source: InsightSource::Rules }
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct InsightProduct {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub stock: i32,
    pub min_stock: i32,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub units_sold_30d: i64,
}

/// Revenue of the last seven days against the seven before.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SalesWindow { pub last_7_days: Decimal, pub previous_7_days: Decimal }

impl SalesWindow {
    pub fn change_percent(&self) -> Option<Decimal> {
        (!self.previous_7_days.is_zero())
            .then(|| ((self.last_7_days - self.previous_7_days) / self.previous_7_days * Decimal::ONE_HUNDRED).round_dp(1))
    }
}

pub fn rule_insights(products: &[InsightProduct], window: SalesWindow) -> Vec<Insight> {
    let mut out = Vec::new();
    for p in products {
        if p.stock <= 0 && p.units_sold_30d > 0 {
            out.push(Insight::rule("stock", format!("{} is out of stock", p.name),
                format!("{} ({}) sold {} units in 30 days and has no stock. Restock to avoid losing sales.", p.name, p.sku, p.units_sold_30d), Priority::High));
        } else if p.stock > 0 && p.stock <= p.min_stock {
            out.push(Insight::rule("stock", format!("Low stock: {}", p.name),
                format!("{} ({}) has {} units, minimum is {}.", p.name, p.sku, p.stock, p.min_stock), Priority::Medium));
        }

        if p.sale_price.is_zero() { continue; }
        let margin = ((p.sale_price - p.cost_price) / p.sale_price * Decimal::ONE_HUNDRED).round_dp(1);
        if margin.is_sign_negative() && !margin.is_zero() {
            out.push(Insight::rule("pricing", format!("{} sells at a loss", p.name),
                format!("Cost R$ {} is above the price R$ {} ({}% margin).", p.cost_price, p.sale_price, margin), Priority::High));
        } else if margin < Decimal::from(LOW_MARGIN_PERCENT) {
            out.push(Insight::rule("pricing", format!("Low margin on {}", p.name),
                format!("Margin is {}%, below {}%. Review price or costs.", margin, LOW_MARGIN_PERCENT), Priority::Medium));
        }
    }

    if let Some(top) = products.iter().filter(|p| p.units_sold_30d > 0).max_by_key(|p| p.units_sold_30d) {
        out.push(Insight::rule("sales", format!("Top seller: {}", top.name),
            format!("{} sold {} units in the last 30 days.", top.name, top.units_sold_30d), Priority::Low));
    }

    if let Some(change) = window.change_percent() {
        let limit = Decimal::from(TREND_PERCENT);
        if change >= limit {
            out.push(Insight::rule("trend", format!("Sales up {}%", change),
                format!("Revenue went from R$ {} to R$ {} week over week.", window.previous_7_days, window.last_7_days), Priority::Low));
        } else if change <= -limit {
            out.push(Insight::rule("trend", format!("Sales down {}%", change.abs()),
                format!("Revenue went from R$ {} to R$ {} week over week.", window.previous_7_days, window.last_7_days), Priority::High));
        }
    }
    out.sort_by_key(|i| i.priority);
    out
}

#[derive(Debug, Deserialize)]
struct ModelInsight {
    #[serde(rename = "type", default = "default_type")]
    insight_type: String,
    title: String,
    description: String,
    #[serde(default = "default_priority")]
    priority: Priority,
}

fn default_type() -> String { "ai".to_string() }
fn default_priority() -> Priority { Priority::Medium }

fn build_prompt(products: &[InsightProduct], window: SalesWindow, rules: &[Insight]) -> Vec<ChatMessage> {
    let data = serde_json::json!({ "products": products, "sales": window, "already_found": rules });
    vec![
        ChatMessage::system(
            "You are a business consultant for a Brazilian marketplace seller. Answer only with a JSON array of at most 5 items \
             [{\"type\":\"...\",\"title\":\"...\",\"description\":\"...\",\"priority\":\"high|medium|low\"}]. Do not repeat insights already found.",
        ),
        ChatMessage::user(format!("Store data:\n{}", data)),
    ]
}

async fn ask_model(provider: &dyn LlmProvider, products: &[InsightProduct], window: SalesWindow, rules: &[Insight]) -> std::result::Result<Vec<ModelInsight>, LlmError> {
    let answer = provider.chat_completion(build_prompt(products, window, rules)).await?;
    parse_json_answer(&answer.content)
}

/// Rule insights followed by the model's, or the rules alone when the model is unavailable.
pub async fn generate(provider: Option<&dyn LlmProvider>, products: &[InsightProduct], window: SalesWindow) -> Vec<Insight> {
    let mut insights = rule_insights(products, window);
    let Some(provider) = provider else { return insights };
    match ask_model(provider, products, window, &insights).await {
        Ok(extra) => insights.extend(extra.into_iter().take(MAX_MODEL_INSIGHTS).map(|m| Insight {
            insight_type: m.insight_type, title: m.title, description: m.description, priority: m.priority, source: InsightSource::Ai,
        })),
        Err(e) => tracing::warn!(error = %e, "model insights failed, keeping rule insights"),
    }
    insights
}

pub async fn load_inputs(db: &PgPool, user_id: Uuid, now: DateTime<Utc>) -> Result<(Vec<InsightProduct>, SalesWindow)> {
    let products = sqlx::query_as::<_, InsightProduct>(
        "SELECT p.id, p.sku, p.name, p.stock, p.min_stock, p.cost_price, p.sale_price, \
         COALESCE((SELECT SUM(i.quantity) FROM order_items i JOIN orders o ON o.id = i.order_id \
           WHERE i.product_id = p.id AND o.user_id = $1 AND o.ordered_at >= $2 AND o.status NOT IN ('cancelled', 'returned')), 0)::BIGINT AS units_sold_30d \
         FROM products p WHERE p.user_id = $1 AND p.status = 'active'")
        .bind(user_id).bind(now - Duration::days(30)).fetch_all(db).await?;
    let (last, previous): (Decimal, Decimal) = sqlx::query_as(
        "SELECT COALESCE(SUM(total) FILTER (WHERE ordered_at >= $2), 0), COALESCE(SUM(total) FILTER (WHERE ordered_at < $2), 0) \
         FROM orders WHERE user_id = $1 AND ordered_at >= $3 AND status NOT IN ('cancelled', 'returned')")
        .bind(user_id).bind(now - Duration::days(7)).bind(now - Duration::days(14)).fetch_one(db).await?;
    Ok((products, SalesWindow { last_7_days: last, previous_7_days: previous }))
}

/// Replaces the stored insights of the user.
pub async fn save(db: &PgPool, user_id: Uuid, insights: &[Insight]) -> Result<()> {
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM ai_insights WHERE user_id = $1").bind(user_id).execute(&mut *tx).await?;
    for i in insights {
        sqlx::query("INSERT INTO ai_insights (id, user_id, insight_type, title, description, priority, source, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())")
            .bind(Uuid::now_v7()).bind(user_id).bind(&i.insight_type).bind(&i.title).bind(&i.description).bind(i.priority.as_str())
            .bind(if i.source == InsightSource::Ai { "ai" } else { "rules" })
            .execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::ScriptedProvider;

    fn product(name: &str, stock: i32, min_stock: i32, cost: i64, price: i64, sold: i64) -> InsightProduct {
        InsightProduct { id: Uuid::new_v4(), sku: name.to_uppercase(), name: name.into(), stock, min_stock,
            cost_price: Decimal::new(cost, 0), sale_price: Decimal::new(price, 0), units_sold_30d: sold }
    }

    #[test]
    fn test_stock_and_margin_rules() {
        let products = vec![
            product("caneca", 0, 2, 10, 30, 12),
            product("garrafa", 2, 5, 10, 30, 0),
            product("copo", 50, 5, 25, 20, 1),
            product("prato", 50, 5, 19, 20, 0),
        ];
        let insights = rule_insights(&products, SalesWindow::default());
        let titles: Vec<&str> = insights.iter().map(|i| i.title.as_str()).collect();
        assert!(titles.contains(&"caneca is out of stock"));
        assert!(titles.contains(&"Low stock: garrafa"));
        assert!(titles.contains(&"copo sells at a loss"));
        assert!(titles.contains(&"Low margin on prato"));
        assert!(titles.contains(&"Top seller: caneca"));
        assert_eq!(insights[0].priority, Priority::High);
        assert_eq!(insights.last().unwrap().priority, Priority::Low);
    }

    #[test]
    fn test_trend_rule_needs_twenty_percent() {
        let up = SalesWindow { last_7_days: Decimal::new(1300, 0), previous_7_days: Decimal::new(1000, 0) };
        assert_eq!(rule_insights(&[], up)[0].title, "Sales up 30.0%");
        let flat = SalesWindow { last_7_days: Decimal::new(1100, 0), previous_7_days: Decimal::new(1000, 0) };
        assert!(rule_insights(&[], flat).is_empty());
        let down = SalesWindow { last_7_days: Decimal::new(500, 0), previous_7_days: Decimal::new(1000, 0) };
        assert_eq!(rule_insights(&[], down)[0].priority, Priority::High);
        assert!(SalesWindow { last_7_days: Decimal::ONE, previous_7_days: Decimal::ZERO }.change_percent().is_none());
    }

    #[tokio::test]
    async fn test_model_insights_are_appended() {
        let provider = ScriptedProvider::new(&["```json\n[{\"type\":\"ads\",\"title\":\"Invista em anúncios\",\"description\":\"ROAS alto\",\"priority\":\"low\"}]\n```"]);
        let insights = generate(Some(&provider as &dyn LlmProvider), &[product("caneca", 0, 2, 10, 30, 12)], SalesWindow::default()).await;
        let ai: Vec<&Insight> = insights.iter().filter(|i| i.source == InsightSource::Ai).collect();
        assert_eq!(ai.len(), 1);
        assert_eq!(ai[0].insight_type, "ads");
    }

    #[tokio::test]
    async fn test_model_failure_keeps_rules() {
        let provider = ScriptedProvider::new(&[]);
        let insights = generate(Some(&provider as &dyn LlmProvider), &[product("caneca", 0, 2, 10, 30, 12)], SalesWindow::default()).await;
        assert_eq!(provider.calls(), 1);
        assert!(insights.iter().all(|i| i.source == InsightSource::Rules));
        assert!(!insights.is_empty());
    }
}
