//! Marketplace integrations, listings and listing sync.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::catalog::fetch_product;
use crate::finance::valid_amount;
use super::{optional_body, ApiError, ApiResult, AppState, ListParams, PaginatedResponse};
use crate::auth::AuthUser;
use crate::domain::aggregates::{ListingStatus, ListingUpdate, SyncStatus};
use crate::sync::{IntegrationRow, ListingRow, SyncOutcome};
use crate::Marketplace;

// ===== Integrations =====

/// Integration as shown to the seller. Tokens stay server-side.
#[derive(Debug, Serialize)]
pub struct IntegrationSummary {
    pub id: Uuid,
    pub marketplace: String,
    pub status: String,
    pub seller_id: Option<String>,
    pub shop_domain: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IntegrationRow> for IntegrationSummary {
    fn from(r: IntegrationRow) -> Self {
        Self {
            id: r.id, marketplace: r.marketplace, status: r.status, seller_id: r.seller_id, shop_domain: r.shop_domain,
            expires_at: r.expires_at, created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

pub async fn list_integrations(State(s): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<IntegrationSummary>>> {
    let rows = sqlx::query_as::<_, IntegrationRow>("SELECT * FROM integrations WHERE user_id = $1 ORDER BY marketplace")
        .bind(user.id).fetch_all(&s.db).await?;
    Ok(Json(rows.into_iter().map(IntegrationSummary::from).collect()))
}

pub async fn delete_integration(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM integrations WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Integration")); }
    tracing::info!(integration_id = %id, "integration disconnected");
    Ok(StatusCode::NO_CONTENT)
}

// ===== Listings =====

#[derive(Debug, Deserialize)]
pub struct ListingListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub product_id: Option<Uuid>,
    pub marketplace: Option<String>,
    pub sync_status: Option<String>,
}

pub async fn list_listings(State(s): State<AppState>, user: AuthUser, Query(p): Query<ListingListParams>) -> ApiResult<Json<PaginatedResponse<ListingRow>>> {
    let w = ListParams::window(p.page, p.per_page);
    let filter = "user_id = $1 AND ($2::uuid IS NULL OR product_id = $2) AND ($3::text IS NULL OR marketplace = $3) AND ($4::text IS NULL OR sync_status = $4)";
    let listings = sqlx::query_as::<_, ListingRow>(&format!("SELECT * FROM product_listings WHERE {} ORDER BY updated_at DESC LIMIT $5 OFFSET $6", filter))
        .bind(user.id).bind(p.product_id).bind(&p.marketplace).bind(&p.sync_status).bind(w.limit()).bind(w.offset())
        .fetch_all(&s.db).await?;
    let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM product_listings WHERE {}", filter))
        .bind(user.id).bind(p.product_id).bind(&p.marketplace).bind(&p.sync_status).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse { data: listings, total: total.0, page: w.page() }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateListingRequest {
    pub product_id: Uuid,
    pub marketplace: Marketplace,
    #[validate(length(min = 1, max = 100))]
    pub external_id: String,
    pub external_variant_id: Option<String>,
    /// Title, price and stock default to the product's own values.
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(custom = "valid_amount")]
    pub price: Option<Decimal>,
    pub stock: Option<u32>,
}

/// Links a product to an existing marketplace listing. The row starts pending until the first sync.
pub async fn create_listing(State(s): State<AppState>, user: AuthUser, Json(r): Json<CreateListingRequest>) -> ApiResult<(StatusCode, Json<ListingRow>)> {
    r.validate()?;
    let product = fetch_product(&s, user.id, r.product_id).await?;
    let stock = match r.stock {
        Some(st) => i32::try_from(st).map_err(|_| ApiError::BadRequest("Stock out of range".to_string()))?,
        None => product.stock.max(0),
    };
    let listing = sqlx::query_as::<_, ListingRow>("INSERT INTO product_listings (id, user_id, product_id, marketplace, external_id, external_variant_id, title, price, stock, status, sync_status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(user.id).bind(product.id).bind(r.marketplace.as_str()).bind(r.external_id.trim()).bind(&r.external_variant_id)
        .bind(r.title.as_ref().unwrap_or(&product.name)).bind(r.price.unwrap_or(product.sale_price)).bind(stock)
        .bind(ListingStatus::Active.as_str()).bind(SyncStatus::Pending.as_str())
        .fetch_one(&s.db).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn delete_listing(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM product_listings WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Listing")); }
    Ok(StatusCode::NO_CONTENT)
}

/// A well-formed request always answers 200; a failed push is reported in the body with `success: false`.
pub async fn sync_listing(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, body: Result<Json<ListingUpdate>, JsonRejection>) -> ApiResult<Json<SyncOutcome>> {
    let update = optional_body(body)?;
    update.check().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(s.sync.sync_listing(user.id, id, update).await))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProductSyncRequest {
    #[validate(custom = "valid_amount")]
    pub price: Option<Decimal>,
    #[validate(range(max = 2147483647))]
    pub stock: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ProductSyncResponse {
    pub product_id: Uuid,
    pub synced: usize,
    pub failed: usize,
    pub results: Vec<SyncOutcome>,
}

/// Pushes the product's price and stock (or the given overrides) to every listing that differs.
pub async fn sync_product(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, body: Result<Json<ProductSyncRequest>, JsonRejection>) -> ApiResult<Json<ProductSyncResponse>> {
    let r = optional_body(body)?;
    r.validate()?;
    let product = fetch_product(&s, user.id, id).await?;
    let price = r.price.unwrap_or(product.sale_price);
    let stock = r.stock.unwrap_or(product.stock.max(0) as u32);
    let results = s.sync.sync_product(user.id, id, Some(price), Some(stock)).await?;
    let synced = results.iter().filter(|o| o.success).count();
    Ok(Json(ProductSyncResponse { product_id: id, synced, failed: results.len() - synced, results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::call;
    use serde_json::json;

    #[tokio::test]
    async fn test_sync_rejects_malformed_body() {
        let uri = format!("/api/v1/listings/{}/sync", Uuid::new_v4());
        let (status, body) = call("POST", &uri, Some(json!({ "stock": -5, "price": "abc" })), true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Failed to deserialize"));

        let (status, body) = call("POST", &uri, Some(json!({ "price": "-9.99" })), true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Price cannot be negative");
    }

    #[tokio::test]
    async fn test_sync_without_body_reports_outcome() {
        let uri = format!("/api/v1/listings/{}/sync", Uuid::new_v4());
        let (status, body) = call("POST", &uri, None, true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_product_sync_rejects_out_of_range_stock() {
        let uri = format!("/api/v1/products/{}/sync", Uuid::new_v4());
        let (status, _) = call("POST", &uri, Some(json!({ "stock": 3_000_000_000u64 })), true).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_integration_summary_hides_tokens() {
        let now = Utc::now();
        let row = IntegrationRow {
            id: Uuid::new_v4(), user_id: Uuid::new_v4(), marketplace: "mercadolivre".into(), access_token: "APP_USR-secret".into(),
            refresh_token: Some("TG-secret".into()), expires_at: Some(now), seller_id: Some("123".into()), shop_domain: None,
            marketplace_id: None, status: "connected".into(), created_at: now, updated_at: now,
        };
        let json = serde_json::to_string(&IntegrationSummary::from(row)).unwrap();
        assert!(json.contains("\"seller_id\":\"123\""));
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_create_listing_request_accepts_marketplace_names() {
        let r: CreateListingRequest = serde_json::from_value(serde_json::json!({ "product_id": Uuid::nil(), "marketplace": "amazon", "external_id": "KIT-2" })).unwrap();
        assert_eq!(r.marketplace, Marketplace::Amazon);
        assert!(r.validate().is_ok());
        assert!(serde_json::from_value::<CreateListingRequest>(serde_json::json!({ "product_id": Uuid::nil(), "marketplace": "ebay", "external_id": "1" })).is_err());
    }
}
