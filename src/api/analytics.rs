//! Calculators and analytics: competitor pricing, stock forecast, insights, finance and barcodes.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{ApiError, ApiResult, AppState};
use crate::auth::AuthUser;
use crate::domain::value_objects::{generate_ean13_check_digit, validate_ean13, Ean13};
use crate::finance::{self, FinancialSummary, ProfitBreakdown, ProfitProjection, ProjectionInputs, SaleCostInputs};
use crate::forecast::{ForecastReport, ProductSales};
use crate::insights::{self, Insight};
use crate::pricing::{self, CompetitorListing, PriceComparison, PricingQuery, DEFAULT_MIN_RELEVANCE};

// ===== Competitor pricing =====

#[derive(Debug, Deserialize, Validate)]
pub struct CompareRequest {
    #[validate(length(min = 2, max = 200))]
    pub title: String,
    pub brand: Option<String>,
    pub our_price: Decimal,
    #[serde(default)]
    pub floor_price: Decimal,
    /// Candidates to score. When absent, Mercado Livre is searched with the title.
    pub listings: Option<Vec<CompetitorListing>>,
    #[validate(range(min = 1, max = 50))]
    pub search_limit: Option<u32>,
    #[validate(range(max = 100))]
    pub min_relevance: Option<u8>,
}

pub async fn compare_prices(State(s): State<AppState>, _user: AuthUser, Json(r): Json<CompareRequest>) -> ApiResult<Json<PriceComparison>> {
    r.validate()?;
    let listings = match r.listings {
        Some(listings) => listings,
        None => s.mercadolivre.search_listings(&r.title, r.search_limit.unwrap_or(20), None).await
            .map_err(|e| ApiError::Upstream(e.user_message()))?,
    };
    let query = PricingQuery { title: r.title, brand: r.brand };
    Ok(Json(pricing::compare(&query, r.our_price, r.floor_price, listings, r.min_relevance.unwrap_or(DEFAULT_MIN_RELEVANCE))))
}

// ===== Stock forecast =====

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    pub cached: bool,
    #[serde(flatten)]
    pub report: ForecastReport,
}

#[derive(Debug, sqlx::FromRow)]
struct SalesRow { id: Uuid, sku: String, name: String, stock: i32, units_sold: i64, lead_time_days: Option<i32> }

fn clamp_u32(v: i64) -> u32 { v.clamp(0, i64::from(u32::MAX)) as u32 }

async fn load_sales(s: &AppState, user_id: Uuid, window_days: u32, now: DateTime<Utc>) -> ApiResult<Vec<ProductSales>> {
    let rows = sqlx::query_as::<_, SalesRow>(
        "SELECT p.id, p.sku, p.name, p.stock, sup.lead_time_days, \
         COALESCE((SELECT SUM(i.quantity) FROM order_items i JOIN orders o ON o.id = i.order_id \
           WHERE i.product_id = p.id AND o.user_id = $1 AND o.ordered_at >= $2 AND o.status NOT IN ('cancelled', 'returned')), 0)::BIGINT AS units_sold \
         FROM products p LEFT JOIN suppliers sup ON sup.id = p.supplier_id \
         WHERE p.user_id = $1 AND p.status = 'active' ORDER BY p.name")
        .bind(user_id).bind(now - Duration::days(i64::from(window_days))).fetch_all(&s.db).await?;
    Ok(rows.into_iter().map(|r| ProductSales {
        product_id: r.id, sku: r.sku, name: r.name, stock: clamp_u32(r.stock.into()), units_sold: clamp_u32(r.units_sold),
        lead_time_days: clamp_u32(r.lead_time_days.unwrap_or(7).into()),
    }).collect())
}

/// Serves the cached forecast of the user unless it expired or a refresh is requested.
pub async fn stock_forecast(State(s): State<AppState>, user: AuthUser, Query(p): Query<ForecastQuery>) -> ApiResult<Json<ForecastResponse>> {
    if !p.refresh {
        if let Some(report) = s.forecaster.cached(user.id).await {
            return Ok(Json(ForecastResponse { cached: true, report }));
        }
    }
    let sales = load_sales(&s, user.id, s.forecaster.params.window_days, Utc::now()).await?;
    let report = s.forecaster.refresh(user.id, &sales).await;
    Ok(Json(ForecastResponse { cached: false, report }))
}

// ===== Insights =====

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InsightRow {
    pub id: Uuid,
    pub insight_type: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

pub async fn list_insights(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<InsightRow>>> {
    let rows = sqlx::query_as::<_, InsightRow>("SELECT id, insight_type, title, description, priority, source, created_at FROM ai_insights WHERE user_id = $1 \
        ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, created_at DESC")
        .bind(user.id).fetch_all(&s.db).await?;
    Ok(Json(rows))
}

pub async fn generate_insights(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<Insight>>> {
    let (products, window) = insights::load_inputs(&s.db, user.id, Utc::now()).await?;
    let generated = insights::generate(s.llm.as_deref(), &products, window).await;
    insights::save(&s.db, user.id, &generated).await?;
    tracing::info!(user_id = %user.id, count = generated.len(), "insights generated");
    Ok(Json(generated))
}

// ===== Finance =====

pub async fn profit_breakdown(_user: AuthUser, Json(r): Json<SaleCostInputs>) -> ApiResult<Json<ProfitBreakdown>> {
    r.validate()?;
    Ok(Json(ProfitBreakdown::compute(&r)?))
}

pub async fn profit_projection(_user: AuthUser, Json(r): Json<ProjectionInputs>) -> ApiResult<Json<ProfitProjection>> {
    r.validate()?;
    Ok(Json(ProfitProjection::compute(&r)?))
}

#[derive(Debug, Deserialize)]
pub struct PeriodParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl PeriodParams {
    /// Defaults to the last 30 days.
    fn resolve(&self, now: DateTime<Utc>) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
        let to = self.to.unwrap_or(now);
        let from = self.from.unwrap_or(to - Duration::days(30));
        if from >= to { return Err(ApiError::BadRequest("`from` must be before `to`".to_string())); }
        Ok((from, to))
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: FinancialSummary,
}

pub async fn financial_summary(State(s): State<AppState>, user: AuthUser, Query(p): Query<PeriodParams>) -> ApiResult<Json<SummaryResponse>> {
    let (from, to) = p.resolve(Utc::now())?;
    let summary = finance::load_financial_summary(&s.db, user.id, from, to).await?;
    Ok(Json(SummaryResponse { from, to, summary }))
}

// ===== Barcodes =====

#[derive(Debug, Deserialize)]
pub struct BarcodeRequest { pub code: String }

#[derive(Debug, Serialize)]
pub struct BarcodeValidation {
    pub code: String,
    pub valid: bool,
    pub expected_check_digit: Option<u8>,
}

pub async fn validate_barcode(_user: AuthUser, Json(r): Json<BarcodeRequest>) -> Json<BarcodeValidation> {
    let code = r.code.trim().to_string();
    let expected_check_digit = code.get(..12).and_then(|prefix| generate_ean13_check_digit(prefix).ok());
    Json(BarcodeValidation { valid: validate_ean13(&code), expected_check_digit, code })
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateBarcodeRequest {
    /// 12-digit prefix to complete. A random internal `789` code is issued when absent.
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GeneratedBarcode { pub code: String }

pub async fn generate_barcode(_user: AuthUser, body: Option<Json<GenerateBarcodeRequest>>) -> ApiResult<Json<GeneratedBarcode>> {
    let r = body.map(|Json(r)| r).unwrap_or_default();
    let ean = match r.prefix.as_deref().map(str::trim) {
        Some(prefix) => Ean13::from_prefix(prefix).map_err(|e| ApiError::BadRequest(format!("Invalid prefix: {}", e)))?,
        None => Ean13::generate_internal(&mut rand::thread_rng()),
    };
    Ok(Json(GeneratedBarcode { code: ean.as_str().to_string() }))
}
