//! Stock forecast: sales velocity with optional model-assisted demand prediction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::llm::{parse_json_answer, ChatMessage, LlmError, LlmProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSales {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub stock: u32,
    pub units_sold: u32,
    pub lead_time_days: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ForecastParams {
    pub window_days: u32,
    pub safety_days: u32,
    pub coverage_days: u32,
}

impl Default for ForecastParams {
    fn default() -> Self { Self { window_days: 30, safety_days: 7, coverage_days: 30 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus { Critical, Warning, Ok }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource { Ai, Heuristic }

#[derive(Debug, Clone, Serialize)]
pub struct ProductForecast {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub stock: u32,
    pub daily_velocity: f64,
    pub days_of_stock: Option<f64>,
    pub reorder_point: u32,
    pub suggested_order: u32,
    pub predicted_demand_30d: f64,
    pub status: StockStatus,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastReport {
    pub generated_at: DateTime<Utc>,
    pub source: ForecastSource,
    pub items: Vec<ProductForecast>,
}

pub fn forecast_product(p: &ProductSales, params: ForecastParams) -> ProductForecast {
    let velocity = f64::from(p.units_sold) / f64::from(params.window_days.max(1));
    let stock = f64::from(p.stock);
    let days_of_stock = (velocity > 0.0).then(|| stock / velocity);
    let reorder_point = (velocity * f64::from(p.lead_time_days + params.safety_days)).ceil() as u32;
    let needed = velocity * f64::from(params.coverage_days) + velocity * f64::from(params.safety_days) - stock;
    let suggested_order = needed.max(0.0).ceil() as u32;

    let lead = f64::from(p.lead_time_days);
    let status = match days_of_stock {
        None => StockStatus::Ok,
        Some(_) if p.stock == 0 => StockStatus::Critical,
        Some(days) if days < lead => StockStatus::Critical,
        Some(days) if days < lead + f64::from(params.safety_days) => StockStatus::Warning,
        Some(_) => StockStatus::Ok,
    };

    ProductForecast {
        product_id: p.product_id,
        sku: p.sku.clone(),
        name: p.name.clone(),
        stock: p.stock,
        daily_velocity: (velocity * 100.0).round() / 100.0,
        days_of_stock: days_of_stock.map(|d| (d * 10.0).round() / 10.0),
        reorder_point,
        suggested_order,
        predicted_demand_30d: (velocity * 30.0).round(),
        status,
        confidence: None,
        reasoning: None,
    }
}

pub fn heuristic_report(products: &[ProductSales], params: ForecastParams) -> ForecastReport {
    let mut items: Vec<ProductForecast> = products.iter().map(|p| forecast_product(p, params)).collect();
    items.sort_by_key(|f| match f.status { StockStatus::Critical => 0, StockStatus::Warning => 1, StockStatus::Ok => 2 });
    ForecastReport { generated_at: Utc::now(), source: ForecastSource::Heuristic, items }
}

#[derive(Debug, Deserialize)]
struct ModelForecasts { forecasts: Vec<ModelForecast> }

#[derive(Debug, Deserialize)]
struct ModelForecast {
    product_id: Uuid,
    predicted_demand_30d: f64,
    recommended_order: u32,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn build_prompt(products: &[ProductSales], params: ForecastParams) -> Vec<ChatMessage> {
    let rows: Vec<serde_json::Value> = products.iter().map(|p| serde_json::json!({
        "product_id": p.product_id,
        "sku": p.sku,
        "name": p.name,
        "stock": p.stock,
        "units_sold_last_window": p.units_sold,
        "lead_time_days": p.lead_time_days,
    })).collect();
    vec![
        ChatMessage::system(
            "You are an inventory analyst for a Brazilian e-commerce seller. Answer only with JSON of the form \
             {\"forecasts\":[{\"product_id\":\"...\",\"predicted_demand_30d\":0,\"recommended_order\":0,\"confidence\":0.0,\"reasoning\":\"...\"}]}.",
        ),
        ChatMessage::user(format!(
            "Sales window: {} days. Safety stock: {} days. Forecast demand for the next 30 days and how many units to reorder.\n{}",
            params.window_days, params.safety_days, serde_json::Value::Array(rows),
        )),
    ]
}

async fn ask_model(provider: &dyn LlmProvider, products: &[ProductSales], params: ForecastParams) -> Result<ModelForecasts, LlmError> {
    let answer = provider.chat_completion(build_prompt(products, params)).await?;
    parse_json_answer(&answer.content)
}

/// Heuristic report refined by the model's answer; the heuristic alone when the model is unavailable or answers badly.
pub async fn forecast(provider: Option<&dyn LlmProvider>, products: &[ProductSales], params: ForecastParams) -> ForecastReport {
    let mut report = heuristic_report(products, params);
    let Some(provider) = provider else { return report };
    if products.is_empty() { return report; }

    match ask_model(provider, products, params).await {
        Ok(answer) => {
            let by_id: HashMap<Uuid, ModelForecast> = answer.forecasts.into_iter().map(|f| (f.product_id, f)).collect();
            for item in &mut report.items {
                if let Some(f) = by_id.get(&item.product_id) {
                    item.predicted_demand_30d = f.predicted_demand_30d.max(0.0);
                    item.suggested_order = f.recommended_order;
                    item.confidence = f.confidence;
                    item.reasoning = f.reasoning.clone();
                }
            }
            report.source = ForecastSource::Ai;
        }
        Err(e) => tracing::warn!(error = %e, "model forecast failed, using heuristic"),
    }
    report
}

/// Per-user forecast memo for the lifetime of the process. Entries expire after a fixed TTL and are overwritten on refresh.
pub struct ForecastCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, (Instant, ForecastReport)>>,
}

impl ForecastCache {
    pub fn new(ttl: Duration) -> Self { Self { ttl, entries: RwLock::new(HashMap::new()) } }

    pub async fn get(&self, user_id: Uuid, now: Instant) -> Option<ForecastReport> {
        let entries = self.entries.read().await;
        entries.get(&user_id)
            .filter(|(stored_at, _)| now.saturating_duration_since(*stored_at) < self.ttl)
            .map(|(_, report)| report.clone())
    }

    pub async fn put(&self, user_id: Uuid, report: ForecastReport, now: Instant) {
        self.entries.write().await.insert(user_id, (now, report));
    }
}

/// Forecasting entry point shared through application state.
pub struct StockForecaster {
    pub cache: ForecastCache,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub params: ForecastParams,
}

impl StockForecaster {
    pub fn new(ttl: Duration, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { cache: ForecastCache::new(ttl), llm, params: ForecastParams::default() }
    }

    pub async fn cached(&self, user_id: Uuid) -> Option<ForecastReport> {
        let hit = self.cache.get(user_id, Instant::now()).await;
        tracing::debug!(%user_id, hit = hit.is_some(), "forecast cache lookup");
        hit
    }

    pub async fn refresh(&self, user_id: Uuid, products: &[ProductSales]) -> ForecastReport {
        let report = forecast(self.llm.as_deref(), products, self.params).await;
        self.cache.put(user_id, report.clone(), Instant::now()).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::ScriptedProvider;

    fn sales(stock: u32, sold: u32, lead: u32) -> ProductSales {
        ProductSales { product_id: Uuid::new_v4(), sku: "SKU".into(), name: "Produto".into(), stock, units_sold: sold, lead_time_days: lead }
    }

    #[test]
    fn test_velocity_and_reorder() {
        let f = forecast_product(&sales(20, 60, 5), ForecastParams::default());
        assert_eq!(f.daily_velocity, 2.0);
        assert_eq!(f.days_of_stock, Some(10.0));
        assert_eq!(f.reorder_point, 24);
        assert_eq!(f.suggested_order, 54);
        assert_eq!(f.predicted_demand_30d, 60.0);
        assert_eq!(f.status, StockStatus::Warning);
    }

    #[test]
    fn test_status_thresholds() {
        let params = ForecastParams::default();
        assert_eq!(forecast_product(&sales(8, 60, 5), params).status, StockStatus::Critical);
        assert_eq!(forecast_product(&sales(0, 3, 5), params).status, StockStatus::Critical);
        assert_eq!(forecast_product(&sales(100, 60, 5), params).status, StockStatus::Ok);
    }

    #[test]
    fn test_no_sales_means_no_reorder() {
        let f = forecast_product(&sales(0, 0, 5), ForecastParams::default());
        assert_eq!(f.days_of_stock, None);
        assert_eq!(f.suggested_order, 0);
        assert_eq!(f.status, StockStatus::Ok);
    }

    #[tokio::test]
    async fn test_model_answer_overrides_heuristic() {
        let p = sales(20, 60, 5);
        let answer = format!(
            "```json\n{{\"forecasts\":[{{\"product_id\":\"{}\",\"predicted_demand_30d\":75,\"recommended_order\":80,\"confidence\":0.8,\"reasoning\":\"seasonal peak\"}}]}}\n```",
            p.product_id
        );
        let provider = ScriptedProvider::new(&[&answer]);
        let report = forecast(Some(&provider as &dyn LlmProvider), &[p], ForecastParams::default()).await;
        assert_eq!(report.source, ForecastSource::Ai);
        assert_eq!(report.items[0].suggested_order, 80);
        assert_eq!(report.items[0].predicted_demand_30d, 75.0);
        assert_eq!(report.items[0].reasoning.as_deref(), Some("seasonal peak"));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let bad = ScriptedProvider::new(&["I think you should buy more"]);
        let report = forecast(Some(&bad), &[sales(20, 60, 5)], ForecastParams::default()).await;
        assert_eq!(report.source, ForecastSource::Heuristic);
        assert_eq!(report.items[0].suggested_order, 54);

        let failing = ScriptedProvider::new(&[]);
        let report = forecast(Some(&failing), &[sales(20, 60, 5)], ForecastParams::default()).await;
        assert_eq!(report.source, ForecastSource::Heuristic);
    }

    #[tokio::test]
    async fn test_cache_honours_ttl() {
        let cache = ForecastCache::new(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let t0 = Instant::now();
        assert!(cache.get(user, t0).await.is_none());
        cache.put(user, heuristic_report(&[], ForecastParams::default()), t0).await;
        assert!(cache.get(user, t0 + Duration::from_secs(59)).await.is_some());
        assert!(cache.get(user, t0 + Duration::from_secs(60)).await.is_none());
        assert!(cache.get(Uuid::new_v4(), t0).await.is_none());
    }

    #[tokio::test]
    async fn test_forecaster_reuses_cached_report() {
        let provider = Arc::new(ScriptedProvider::new(&["{\"forecasts\":[]}"]));
        let forecaster = StockForecaster::new(Duration::from_secs(3600), Some(provider.clone() as Arc<dyn LlmProvider>));
        let user = Uuid::new_v4();
        assert!(forecaster.cached(user).await.is_none());
        forecaster.refresh(user, &[sales(1, 1, 1)]).await;
        assert!(forecaster.cached(user).await.is_some());
        assert_eq!(provider.calls(), 1);
    }
}
