//! Automation rules evaluated against the product catalogue.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::events::EventNotice;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTrigger { LowStock, OutOfStock, LowMargin }

impl RuleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self { Self::LowStock => "low_stock", Self::OutOfStock => "out_of_stock", Self::LowMargin => "low_margin" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "low_stock" => Some(Self::LowStock), "out_of_stock" => Some(Self::OutOfStock), "low_margin" => Some(Self::LowMargin), _ => None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction { Notify, PauseListings }

impl RuleAction {
    pub fn as_str(&self) -> &'static str { match self { Self::Notify => "notify", Self::PauseListings => "pause_listings" } }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "notify" => Some(Self::Notify), "pause_listings" => Some(Self::PauseListings), _ => None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub trigger: RuleTrigger,
    pub threshold: Option<Decimal>,
    pub action: RuleAction,
    pub enabled: bool,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub stock: i32,
    pub min_stock: i32,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
}

impl ProductSnapshot {
    pub fn margin_percent(&self) -> Decimal {
        if self.sale_price.is_zero() { return Decimal::ZERO; }
        ((self.sale_price - self.cost_price) / self.sale_price * Decimal::ONE_HUNDRED).round_dp(2)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleHit {
    pub rule_id: Uuid,
    pub product_id: Uuid,
    pub action: RuleAction,
    pub message: String,
}

impl RuleHit {
    pub fn notice(&self, rule_name: &str) -> EventNotice {
        EventNotice { kind: "automation", title: rule_name.to_string(), message: self.message.clone() }
    }
}

/// Fires when the rule is enabled and its trigger matches the product.
pub fn evaluate(rule: &AutomationRule, p: &ProductSnapshot) -> Option<RuleHit> {
    if !rule.enabled { return None; }
    let message = match rule.trigger {
        RuleTrigger::LowStock => {
            let limit = rule.threshold.and_then(|t| t.floor().to_i64()).unwrap_or(p.min_stock as i64);
            (i64::from(p.stock) <= limit).then(|| format!("{} ({}) has {} units, limit {}", p.name, p.sku, p.stock, limit))
        }
        RuleTrigger::OutOfStock => (p.stock <= 0).then(|| format!("{} ({}) is out of stock", p.name, p.sku)),
        RuleTrigger::LowMargin => {
            let limit = rule.threshold.unwrap_or(Decimal::TEN);
            let margin = p.margin_percent();
            (margin < limit).then(|| format!("{} ({}) margin is {}%, below {}%", p.name, p.sku, margin, limit))
        }
    }?;
    Some(RuleHit { rule_id: rule.id, product_id: p.id, action: rule.action, message })
}

pub fn evaluate_all(rules: &[AutomationRule], products: &[ProductSnapshot]) -> Vec<RuleHit> {
    rules.iter().flat_map(|r| products.iter().filter_map(move |p| evaluate(r, p))).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct RuleRow { id: Uuid, name: String, trigger_type: String, threshold: Option<Decimal>, action: String, enabled: bool }

impl RuleRow {
    fn into_rule(self) -> Option<AutomationRule> {
        Some(AutomationRule {
            id: self.id, name: self.name, trigger: RuleTrigger::parse(&self.trigger_type)?,
            threshold: self.threshold, action: RuleAction::parse(&self.action)?, enabled: self.enabled,
        })
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub rules_evaluated: usize,
    pub products_checked: usize,
    pub hits: Vec<RuleHit>,
    pub listings_paused: u64,
}

/// Evaluates every enabled rule of the user, logging each hit and carrying out its action.
pub async fn run_rules(db: &PgPool, user_id: Uuid) -> Result<RunSummary> {
    let rules: Vec<AutomationRule> = sqlx::query_as::<_, RuleRow>("SELECT id, name, trigger_type, threshold, action, enabled FROM automation_rules WHERE user_id = $1 AND enabled")
        .bind(user_id).fetch_all(db).await?
        .into_iter().filter_map(RuleRow::into_rule).collect();
    let products = sqlx::query_as::<_, ProductSnapshot>("SELECT id, sku, name, stock, min_stock, cost_price, sale_price FROM products WHERE user_id = $1 AND status = 'active'")
        .bind(user_id).fetch_all(db).await?;

    let hits = evaluate_all(&rules, &products);
    let mut listings_paused = 0;
    for hit in &hits {
        let rule_name = rules.iter().find(|r| r.id == hit.rule_id).map(|r| r.name.as_str()).unwrap_or("Automation");
        sqlx::query("INSERT INTO automation_logs (id, user_id, rule_id, product_id, action, message, created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW())")
            .bind(Uuid::now_v7()).bind(user_id).bind(hit.rule_id).bind(hit.product_id).bind(hit.action.as_str()).bind(&hit.message)
            .execute(db).await?;
        crate::events::insert_notification(db, user_id, &hit.notice(rule_name)).await?;
        if hit.action == RuleAction::PauseListings {
            listings_paused += sqlx::query("UPDATE product_listings SET status = 'paused', sync_status = 'pending', updated_at = NOW() WHERE user_id = $1 AND product_id = $2 AND status = 'active'")
                .bind(user_id).bind(hit.product_id).execute(db).await?.rows_affected();
        }
    }
    tracing::info!(%user_id, rules = rules.len(), hits = hits.len(), listings_paused, "automation run finished");
    Ok(RunSummary { rules_evaluated: rules.len(), products_checked: products.len(), hits, listings_paused })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(trigger: RuleTrigger, threshold: Option<Decimal>) -> AutomationRule {
        AutomationRule { id: Uuid::new_v4(), name: "Regra".into(), trigger, threshold, action: RuleAction::Notify, enabled: true }
    }

    fn product(stock: i32, min_stock: i32, cost: i64, price: i64) -> ProductSnapshot {
        ProductSnapshot { id: Uuid::new_v4(), sku: "CAM-01".into(), name: "Camiseta".into(), stock, min_stock, cost_price: Decimal::new(cost, 0), sale_price: Decimal::new(price, 0) }
    }

    #[test]
    fn test_low_stock_uses_threshold_or_min_stock() {
        let p = product(4, 5, 10, 20);
        assert!(evaluate(&rule(RuleTrigger::LowStock, None), &p).is_some());
        assert!(evaluate(&rule(RuleTrigger::LowStock, Some(Decimal::new(3, 0))), &p).is_none());
        assert!(evaluate(&rule(RuleTrigger::LowStock, Some(Decimal::new(4, 0))), &p).is_some());
    }

    #[test]
    fn test_out_of_stock_and_low_margin() {
        assert!(evaluate(&rule(RuleTrigger::OutOfStock, None), &product(0, 1, 10, 20)).is_some());
        assert!(evaluate(&rule(RuleTrigger::OutOfStock, None), &product(1, 1, 10, 20)).is_none());
        let thin = product(10, 1, 95, 100);
        assert_eq!(thin.margin_percent(), Decimal::new(5, 0));
        let hit = evaluate(&rule(RuleTrigger::LowMargin, None), &thin).unwrap();
        assert!(hit.message.contains("below 10%"));
        assert!(evaluate(&rule(RuleTrigger::LowMargin, Some(Decimal::new(4, 0))), &thin).is_none());
    }

    #[test]
    fn test_disabled_rules_never_fire() {
        let mut r = rule(RuleTrigger::OutOfStock, None);
        r.enabled = false;
        assert!(evaluate(&r, &product(0, 0, 1, 2)).is_none());
        assert!(evaluate_all(&[r], &[product(0, 0, 1, 2)]).is_empty());
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!(RuleTrigger::parse("low_margin"), Some(RuleTrigger::LowMargin));
        assert_eq!(RuleAction::parse(RuleAction::PauseListings.as_str()), Some(RuleAction::PauseListings));
        assert_eq!(RuleTrigger::parse("weekly"), None);
    }
}
