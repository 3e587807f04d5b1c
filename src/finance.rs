//! Profit breakdown, projection and marketing ratios.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::aggregates::OrderStatus;
use crate::{Marketplace, Result, UnistockError};

/// Largest money amount accepted from clients: R$ 999.999.999.999,99, the range of the `NUMERIC(14, 2)` columns.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);
/// Largest monthly unit volume a projection accepts.
pub const MAX_MONTHLY_UNITS: u32 = 10_000_000;

pub fn valid_amount(value: &Decimal) -> std::result::Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() { return Err(ValidationError::new("non_negative")); }
    if *value > MAX_AMOUNT { return Err(ValidationError::new("amount_too_large")); }
    Ok(())
}

pub fn valid_percent(value: &Decimal) -> std::result::Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED { return Err(ValidationError::new("percent_range")); }
    Ok(())
}

/// Monthly growth may shrink volume down to zero but not more than double it.
pub fn valid_growth(value: &Decimal) -> std::result::Result<(), ValidationError> {
    if *value < -Decimal::ONE_HUNDRED || *value > Decimal::ONE_HUNDRED { return Err(ValidationError::new("growth_range")); }
    Ok(())
}

fn overflow() -> UnistockError {
    UnistockError::Validation("Figures are too large to compute".to_string())
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal> { a.checked_mul(b).ok_or_else(overflow) }
fn div(a: Decimal, b: Decimal) -> Result<Decimal> { a.checked_div(b).ok_or_else(overflow) }
fn add(a: Decimal, b: Decimal) -> Result<Decimal> { a.checked_add(b).ok_or_else(overflow) }
fn sub(a: Decimal, b: Decimal) -> Result<Decimal> { a.checked_sub(b).ok_or_else(overflow) }

fn percent_of(base: Decimal, percent: Decimal) -> Result<Decimal> {
    Ok(div(mul(base, percent)?, Decimal::ONE_HUNDRED)?.round_dp(2))
}

/// Per-sale costs for a single unit.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct SaleCostInputs {
    #[validate(custom = "valid_amount")]
    pub sale_price: Decimal,
    #[validate(custom = "valid_amount")]
    pub unit_cost: Decimal,
    #[serde(default)]
    #[validate(custom = "valid_percent")]
    pub commission_percent: Decimal,
    #[serde(default)]
    #[validate(custom = "valid_amount")]
    pub fixed_fee: Decimal,
    #[serde(default)]
    #[validate(custom = "valid_amount")]
    pub shipping_cost: Decimal,
    #[serde(default)]
    #[validate(custom = "valid_percent")]
    pub tax_percent: Decimal,
    #[serde(default)]
    #[validate(custom = "valid_amount")]
    pub ad_cost: Decimal,
    #[serde(default)]
    #[validate(custom = "valid_amount")]
    pub other_costs: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitBreakdown {
    pub sale_price: Decimal,
    pub commission: Decimal,
    pub fixed_fee: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub unit_cost: Decimal,
    pub ad_cost: Decimal,
    pub other_costs: Decimal,
    pub total_costs: Decimal,
    pub net_profit: Decimal,
    pub margin_percent: Decimal,
    pub markup_percent: Option<Decimal>,
    pub is_profitable: bool,
}

impl ProfitBreakdown {
    pub fn compute(i: &SaleCostInputs) -> Result<Self> {
        let commission = percent_of(i.sale_price, i.commission_percent)?;
        let tax = percent_of(i.sale_price, i.tax_percent)?;
        let total_costs = [i.fixed_fee, tax, i.shipping_cost, i.unit_cost, i.ad_cost, i.other_costs]
            .into_iter()
            .try_fold(commission, add)?;
        let net_profit = sub(i.sale_price, total_costs)?;
        let margin_percent = if i.sale_price.is_zero() {
            Decimal::ZERO
        } else {
            mul(div(net_profit, i.sale_price)?, Decimal::ONE_HUNDRED)?.round_dp(2)
        };
        let markup_percent = if i.unit_cost.is_zero() {
            None
        } else {
            Some(mul(div(sub(i.sale_price, i.unit_cost)?, i.unit_cost)?, Decimal::ONE_HUNDRED)?.round_dp(2))
        };
        Ok(Self {
            sale_price: i.sale_price, commission, fixed_fee: i.fixed_fee, tax, shipping_cost: i.shipping_cost,
            unit_cost: i.unit_cost, ad_cost: i.ad_cost, other_costs: i.other_costs,
            total_costs, net_profit, margin_percent, markup_percent,
            is_profitable: net_profit > Decimal::ZERO,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProjectionInputs {
    #[validate]
    pub unit: SaleCostInputs,
    #[validate(range(max = 10000000))]
    pub monthly_units: u32,
    #[serde(default)]
    #[validate(custom = "valid_amount")]
    pub fixed_monthly_expenses: Decimal,
    #[validate(range(min = 1, max = 36))]
    pub months: u32,
    #[serde(default)]
    #[validate(custom = "valid_growth")]
    pub monthly_growth_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedMonth {
    pub month: u32,
    pub units: u64,
    pub revenue: Decimal,
    pub contribution: Decimal,
    pub fixed_expenses: Decimal,
    pub net_profit: Decimal,
    pub cumulative_profit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitProjection {
    pub unit: ProfitBreakdown,
    pub months: Vec<ProjectedMonth>,
    pub break_even_units: Option<u64>,
    pub break_even_revenue: Option<Decimal>,
    pub total_net_profit: Decimal,
}

impl ProfitProjection {
    pub fn compute(input: &ProjectionInputs) -> Result<Self> {
        let unit = ProfitBreakdown::compute(&input.unit)?;
        let growth = add(Decimal::ONE, div(input.monthly_growth_percent, Decimal::ONE_HUNDRED)?)?;
        let (break_even_units, break_even_revenue) = break_even(&unit, input.fixed_monthly_expenses)?;

        let mut months = Vec::with_capacity(input.months as usize);
        let mut expected_units = Decimal::from(input.monthly_units);
        let mut cumulative = Decimal::ZERO;
        for month in 1..=input.months {
            let units = expected_units.round().to_u64().ok_or_else(overflow)?;
            let units_dec = Decimal::from(units);
            let revenue = mul(units_dec, unit.sale_price)?;
            let contribution = mul(units_dec, unit.net_profit)?;
            let net_profit = sub(contribution, input.fixed_monthly_expenses)?;
            cumulative = add(cumulative, net_profit)?;
            months.push(ProjectedMonth {
                month, units, revenue, contribution,
                fixed_expenses: input.fixed_monthly_expenses, net_profit, cumulative_profit: cumulative,
            });
            expected_units = mul(expected_units, growth)?;
        }

        Ok(Self { unit, months, break_even_units, break_even_revenue, total_net_profit: cumulative })
    }
}

/// Units (and revenue) per month needed to cover fixed expenses.
/// None when each sale loses money or breaks exactly even.
pub fn break_even(unit: &ProfitBreakdown, fixed_expenses: Decimal) -> Result<(Option<u64>, Option<Decimal>)> {
    if unit.net_profit <= Decimal::ZERO { return Ok((None, None)); }
    let units = div(fixed_expenses, unit.net_profit)?.ceil().to_u64();
    let revenue = units.map(|u| mul(Decimal::from(u), unit.sale_price)).transpose()?;
    Ok((units, revenue))
}

/// Return on ad spend: attributed revenue divided by ad spend.
pub fn roas(attributed_revenue: Decimal, ad_spend: Decimal) -> Option<Decimal> {
    (!ad_spend.is_zero()).then(|| (attributed_revenue / ad_spend).round_dp(2))
}

/// Total advertising cost of sales, as a percentage of total revenue.
pub fn tacos(ad_spend: Decimal, total_revenue: Decimal) -> Option<Decimal> {
    (!total_revenue.is_zero()).then(|| (ad_spend / total_revenue * Decimal::ONE_HUNDRED).round_dp(2))
}

/// Figures of one order needed for aggregate reporting.
#[derive(Debug, Clone)]
pub struct OrderFigures {
    pub marketplace: Option<Marketplace>,
    pub status: OrderStatus,
    pub total: Decimal,
    pub marketplace_fee: Decimal,
    pub shipping_cost: Decimal,
    pub product_cost: Decimal,
    pub units: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalesSummary {
    pub orders: u64,
    pub units: u64,
    pub revenue: Decimal,
    pub average_ticket: Decimal,
    pub marketplace_fees: Decimal,
    pub shipping_costs: Decimal,
    pub product_costs: Decimal,
    pub revenue_by_marketplace: BTreeMap<String, Decimal>,
}

impl SalesSummary {
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a OrderFigures>) -> Self {
        let mut s = Self::default();
        for o in orders.into_iter().filter(|o| o.status.counts_as_sale()) {
            s.orders += 1;
            s.units += u64::from(o.units);
            s.revenue += o.total;
            s.marketplace_fees += o.marketplace_fee;
            s.shipping_costs += o.shipping_cost;
            s.product_costs += o.product_cost;
            let key = o.marketplace.map(|m| m.as_str()).unwrap_or("direct").to_string();
            *s.revenue_by_marketplace.entry(key).or_default() += o.total;
        }
        if s.orders > 0 {
            s.average_ticket = (s.revenue / Decimal::from(s.orders)).round_dp(2);
        }
        s
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialSummary {
    pub sales: SalesSummary,
    pub expenses: Decimal,
    pub ad_spend: Decimal,
    pub net_profit: Decimal,
    pub net_margin_percent: Decimal,
    pub roas: Option<Decimal>,
    pub tacos: Option<Decimal>,
}

impl FinancialSummary {
    /// `ad_spend` is the advertising share of `expenses`, reported separately for ROAS/TACOS.
    pub fn compute(sales: SalesSummary, expenses: Decimal, ad_spend: Decimal) -> Self {
        let net_profit = sales.revenue - sales.marketplace_fees - sales.shipping_costs - sales.product_costs - expenses;
        let net_margin_percent = if sales.revenue.is_zero() {
            Decimal::ZERO
        } else {
            (net_profit / sales.revenue * Decimal::ONE_HUNDRED).round_dp(2)
        };
        Self {
            roas: roas(sales.revenue, ad_spend),
            tacos: tacos(ad_spend, sales.revenue),
            sales, expenses, ad_spend, net_profit, net_margin_percent,
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Expense category whose amounts count as advertising spend.
pub const AD_EXPENSE_CATEGORY: &str = "ads";

#[derive(Debug, sqlx::FromRow)]
struct OrderFiguresRow {
    marketplace: Option<String>,
    status: String,
    total: Decimal,
    marketplace_fee: Decimal,
    shipping_cost: Decimal,
    product_cost: Decimal,
    units: i64,
}

pub async fn load_order_figures(db: &PgPool, user_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> crate::Result<Vec<OrderFigures>> {
    let rows = sqlx::query_as::<_, OrderFiguresRow>(
        "SELECT o.marketplace, o.status, o.total, o.marketplace_fee, o.shipping_cost, \
         COALESCE(SUM(i.quantity * COALESCE(p.cost_price, 0)), 0) AS product_cost, COALESCE(SUM(i.quantity), 0)::BIGINT AS units \
         FROM orders o LEFT JOIN order_items i ON i.order_id = o.id LEFT JOIN products p ON p.id = i.product_id \
         WHERE o.user_id = $1 AND o.ordered_at >= $2 AND o.ordered_at < $3 GROUP BY o.id")
        .bind(user_id).bind(from).bind(to).fetch_all(db).await?;
    Ok(rows.into_iter().map(|r| OrderFigures {
        marketplace: r.marketplace.as_deref().and_then(Marketplace::parse),
        status: OrderStatus::parse(&r.status).unwrap_or_default(),
        total: r.total,
        marketplace_fee: r.marketplace_fee,
        shipping_cost: r.shipping_cost,
        product_cost: r.product_cost,
        units: r.units.clamp(0, i64::from(u32::MAX)) as u32,
    }).collect())
}

/// Sales, expenses and ad spend of the user between `from` (inclusive) and `to` (exclusive).
pub async fn load_financial_summary(db: &PgPool, user_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> crate::Result<FinancialSummary> {
    let orders = load_order_figures(db, user_id, from, to).await?;
    let (expenses, ad_spend): (Decimal, Decimal) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(amount) FILTER (WHERE category = $4), 0) FROM expenses \
         WHERE user_id = $1 AND incurred_on >= $2::date AND incurred_on < $3::date")
        .bind(user_id).bind(from).bind(to).bind(AD_EXPENSE_CATEGORY).fetch_one(db).await?;
    Ok(FinancialSummary::compute(SalesSummary::from_orders(&orders), expenses, ad_spend))
}
