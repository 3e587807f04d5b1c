//! HTTP surface: shared state, error mapping and the `/api/v1` router.

pub mod analytics;
pub mod catalog;
pub mod marketplace;
pub mod orders;
pub mod purchasing;
pub mod workspace;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRef},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::JwtKeys;
use crate::events::EventPublisher;
use crate::forecast::StockForecaster;
use crate::llm::LlmProvider;
use crate::marketplaces::MercadoLivreClient;
use crate::reports::Mailer;
use crate::sync::ListingSyncService;
use crate::UnistockError;

// =============================================================================
// State
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt: JwtKeys,
    pub events: EventPublisher,
    pub sync: ListingSyncService,
    pub forecaster: Arc<StockForecaster>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub mercadolivre: Arc<MercadoLivreClient>,
    pub mailer: Option<Arc<dyn Mailer>>,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self { state.jwt.clone() }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Conflict(String),

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("{0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict("Record already exists".to_string()),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => Self::BadRequest("Referenced record does not exist".to_string()),
            _ => Self::Database(e),
        }
    }
}

impl From<UnistockError> for ApiError {
    fn from(e: UnistockError) -> Self {
        match e {
            UnistockError::NotFound(what) => Self::NotFound(what),
            UnistockError::Validation(msg) => Self::BadRequest(msg),
            UnistockError::InvalidState(msg) => Self::Conflict(msg),
            UnistockError::Database(e) => e.into(),
            UnistockError::Sync(e) => Self::Upstream(e.user_message()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Shared DTOs
// =============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
    pub status: Option<String>,
}

impl ListParams {
    /// Paging only, for handlers with their own filters.
    pub fn window(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page, per_page, ..Self::default() }
    }
    pub fn page(&self) -> u32 { self.page.unwrap_or(1).max(1) }
    pub fn limit(&self) -> i64 { i64::from(self.per_page.unwrap_or(20).clamp(1, 100)) }
    pub fn offset(&self) -> i64 { i64::from(self.page() - 1) * self.limit() }
    /// `ILIKE` pattern for the search term, `%` when absent.
    pub fn pattern(&self) -> String {
        format!("%{}%", self.search.as_deref().unwrap_or("").trim())
    }
}

/// Body of an endpoint where the JSON payload is optional. A request without a JSON
/// body gets the default; a JSON body that does not parse is a 400.
pub(crate) fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    }
}

/// Unwraps the row of an `UPDATE ... WHERE status = <previous>`; `None` means another request moved it first.
pub(crate) fn transitioned<T>(row: Option<T>, what: &str) -> ApiResult<T> {
    row.ok_or_else(|| ApiError::Conflict(format!("{} was changed by another request", what)))
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

// =============================================================================
// Router
// =============================================================================

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/products", get(catalog::list_products).post(catalog::create_product))
        .route("/products/:id", get(catalog::get_product).put(catalog::update_product).delete(catalog::delete_product))
        .route("/products/:id/stock", post(catalog::adjust_stock))
        .route("/products/:id/sync", post(marketplace::sync_product))
        .route("/suppliers", get(purchasing::list_suppliers).post(purchasing::create_supplier))
        .route("/suppliers/:id", get(purchasing::get_supplier).put(purchasing::update_supplier).delete(purchasing::delete_supplier))
        .route("/purchase-orders", get(purchasing::list_purchase_orders).post(purchasing::create_purchase_order))
        .route("/purchase-orders/:id", get(purchasing::get_purchase_order))
        .route("/purchase-orders/:id/send", post(purchasing::send_purchase_order))
        .route("/purchase-orders/:id/receive", post(purchasing::receive_purchase_order))
        .route("/purchase-orders/:id/cancel", post(purchasing::cancel_purchase_order))
        .route("/expenses", get(purchasing::list_expenses).post(purchasing::create_expense))
        .route("/expenses/:id", delete(purchasing::delete_expense))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", post(orders::change_status))
        .route("/orders/:id/ship", post(orders::ship_order))
        .route("/integrations", get(marketplace::list_integrations))
        .route("/integrations/:id", delete(marketplace::delete_integration))
        .route("/listings", get(marketplace::list_listings).post(marketplace::create_listing))
        .route("/listings/:id", delete(marketplace::delete_listing))
        .route("/listings/:id/sync", post(marketplace::sync_listing))
        .route("/notifications", get(workspace::list_notifications))
        .route("/notifications/read-all", post(workspace::mark_all_read))
        .route("/notifications/:id/read", post(workspace::mark_read))
        .route("/automation/rules", get(workspace::list_rules).post(workspace::create_rule))
        .route("/automation/rules/:id", delete(workspace::delete_rule))
        .route("/automation/run", post(workspace::run_automation))
        .route("/automation/logs", get(workspace::list_automation_logs))
        .route("/reports", get(workspace::list_reports).post(workspace::create_report))
        .route("/reports/run-due", post(workspace::run_due_reports))
        .route("/reports/:id", delete(workspace::delete_report))
        .route("/demo/seed", post(workspace::seed_demo))
        .route("/pricing/compare", post(analytics::compare_prices))
        .route("/forecast/stock", get(analytics::stock_forecast))
        .route("/insights", get(analytics::list_insights))
        .route("/insights/generate", post(analytics::generate_insights))
        .route("/finance/breakdown", post(analytics::profit_breakdown))
        .route("/finance/projection", post(analytics::profit_projection))
        .route("/finance/summary", get(analytics::financial_summary))
        .route("/barcodes/ean13/validate", post(analytics::validate_barcode))
        .route("/barcodes/ean13/generate", post(analytics::generate_barcode));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "unistock"})) }))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
