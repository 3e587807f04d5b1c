//! Product catalogue handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{ApiError, ApiResult, AppState, ListParams, PaginatedResponse};
use crate::auth::AuthUser;
use crate::domain::aggregates::{Product, ProductStatus};
use crate::domain::value_objects::{Ean13, Money, Sku};
use crate::finance::valid_amount;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub ean: Option<String>,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub stock: i32,
    pub min_stock: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRow {
    pub fn to_aggregate(&self) -> ApiResult<Product> {
        let sku = Sku::new(self.sku.as_str()).map_err(|e| ApiError::Conflict(format!("Stored SKU is invalid: {}", e)))?;
        Ok(Product::restore(
            self.id, sku, self.name.as_str(), self.ean.as_deref().and_then(|e| Ean13::parse(e).ok()),
            Money::brl(self.cost_price), Money::brl(self.sale_price),
            self.stock.max(0) as u32, self.min_stock.max(0) as u32, ProductStatus::parse(&self.status),
        ))
    }
}

pub(crate) async fn fetch_product(s: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<ProductRow> {
    sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1 AND user_id = $2")
        .bind(id).bind(user_id).fetch_optional(&s.db).await?.ok_or(ApiError::NotFound("Product"))
}

pub async fn list_products(State(s): State<AppState>, user: AuthUser, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<ProductRow>>> {
    let pattern = p.pattern();
    let products = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE user_id = $1 AND (name ILIKE $2 OR sku ILIKE $2) AND ($3::text IS NULL OR status = $3) ORDER BY created_at DESC LIMIT $4 OFFSET $5")
        .bind(user.id).bind(&pattern).bind(&p.status).bind(p.limit()).bind(p.offset()).fetch_all(&s.db).await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE user_id = $1 AND (name ILIKE $2 OR sku ILIKE $2) AND ($3::text IS NULL OR status = $3)")
        .bind(user.id).bind(&pattern).bind(&p.status).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse { data: products, total: total.0, page: p.page() }))
}

pub async fn get_product(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<ProductRow>> {
    Ok(Json(fetch_product(&s, user.id, id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub ean: Option<String>,
    /// Assigns an internal `789` code when no EAN is given.
    #[serde(default)]
    pub generate_ean: bool,
    pub supplier_id: Option<Uuid>,
    #[validate(custom = "valid_amount")]
    pub cost_price: Decimal,
    #[validate(custom = "valid_amount")]
    pub sale_price: Decimal,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub stock: i32,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub min_stock: i32,
}

fn resolve_ean(ean: Option<&str>, generate: bool) -> ApiResult<Option<String>> {
    match ean.map(str::trim).filter(|e| !e.is_empty()) {
        Some(code) => Ean13::parse(code).map(|e| Some(e.as_str().to_string())).map_err(|e| ApiError::BadRequest(format!("Invalid EAN-13: {}", e))),
        None if generate => Ok(Some(Ean13::generate_internal(&mut rand::thread_rng()).as_str().to_string())),
        None => Ok(None),
    }
}

pub async fn create_product(State(s): State<AppState>, user: AuthUser, Json(r): Json<CreateProductRequest>) -> ApiResult<(StatusCode, Json<ProductRow>)> {
    r.validate()?;
    let sku = Sku::new(r.sku.as_str()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let ean = resolve_ean(r.ean.as_deref(), r.generate_ean)?;
    let p = sqlx::query_as::<_, ProductRow>("INSERT INTO products (id, user_id, supplier_id, sku, name, description, category, ean, cost_price, sale_price, stock, min_stock, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'active', NOW(), NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(user.id).bind(r.supplier_id).bind(sku.as_str()).bind(&r.name).bind(&r.description).bind(&r.category).bind(&ean)
        .bind(r.cost_price).bind(r.sale_price).bind(r.stock).bind(r.min_stock)
        .fetch_one(&s.db).await?;
    tracing::info!(product_id = %p.id, sku = %p.sku, "product created");
    Ok((StatusCode::CREATED, Json(p)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub ean: Option<String>,
    pub supplier_id: Option<Uuid>,
    #[validate(custom = "valid_amount")]
    pub cost_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub min_stock: Option<i32>,
    pub status: Option<String>,
}

/// Partial update. A new sale price goes through the aggregate so price-change events are raised.
pub async fn update_product(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, Json(r): Json<UpdateProductRequest>) -> ApiResult<Json<ProductRow>> {
    r.validate()?;
    let current = fetch_product(&s, user.id, id).await?;
    let mut product = current.to_aggregate()?;
    if let Some(price) = r.sale_price {
        product.change_price(Money::brl(price)).map_err(crate::UnistockError::from)?;
    }
    let ean = match r.ean.as_deref() {
        Some(code) => resolve_ean(Some(code), false)?,
        None => current.ean.clone(),
    };
    let status = r.status.as_deref().map(|st| ProductStatus::parse(st).as_str()).unwrap_or(current.status.as_str());
    let updated = sqlx::query_as::<_, ProductRow>("UPDATE products SET name = $3, description = $4, category = $5, ean = $6, supplier_id = $7, cost_price = $8, sale_price = $9, min_stock = $10, status = $11, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING *")
        .bind(id).bind(user.id)
        .bind(r.name.as_ref().unwrap_or(&current.name)).bind(r.description.as_ref().or(current.description.as_ref())).bind(r.category.as_ref().or(current.category.as_ref()))
        .bind(&ean).bind(r.supplier_id.or(current.supplier_id))
        .bind(r.cost_price.unwrap_or(current.cost_price)).bind(product.sale_price().amount()).bind(r.min_stock.unwrap_or(current.min_stock)).bind(status)
        .fetch_optional(&s.db).await?.ok_or(ApiError::NotFound("Product"))?;
    crate::events::dispatch(&s.db, &s.events, user.id, product.take_events()).await?;
    Ok(Json(updated))
}

pub async fn delete_product(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM products WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Product")); }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct StockAdjustmentRequest {
    #[validate(range(min = -2147483647, max = 2147483647))]
    pub delta: i64,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

/// Applies a manual stock movement and raises the stock events that follow from it.
/// The row stays locked from read to write so concurrent movements queue up instead of overwriting each other.
pub async fn adjust_stock(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, Json(r): Json<StockAdjustmentRequest>) -> ApiResult<Json<ProductRow>> {
    r.validate()?;
    let mut tx = s.db.begin().await?;
    let mut product = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1 AND user_id = $2 FOR UPDATE")
        .bind(id).bind(user.id).fetch_optional(&mut *tx).await?
        .ok_or(ApiError::NotFound("Product"))?
        .to_aggregate()?;
    product.adjust_stock(r.delta, r.reason.as_str()).map_err(crate::UnistockError::from)?;
    let stock = i32::try_from(product.stock()).map_err(|_| ApiError::BadRequest("Stock out of range".to_string()))?;
    let updated = sqlx::query_as::<_, ProductRow>("UPDATE products SET stock = $3, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING *")
        .bind(id).bind(user.id).bind(stock).fetch_one(&mut *tx).await?;
    tx.commit().await?;
    crate::events::dispatch(&s.db, &s.events, user.id, product.take_events()).await?;
    tracing::info!(product_id = %id, delta = r.delta, stock, reason = %r.reason, "stock adjusted");
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::call;
    use serde_json::json;

    #[test]
    fn test_resolve_ean() {
        assert_eq!(resolve_ean(Some(" 7891234567895 "), false).unwrap().as_deref(), Some("7891234567895"));
        assert!(matches!(resolve_ean(Some("7891234567890"), false), Err(ApiError::BadRequest(_))));
        assert_eq!(resolve_ean(None, false).unwrap(), None);
        let generated = resolve_ean(Some(""), true).unwrap().unwrap();
        assert!(generated.starts_with("789") && crate::domain::value_objects::validate_ean13(&generated));
    }

    #[tokio::test]
    async fn test_stock_delta_must_fit_stock_column() {
        let uri = format!("/api/v1/products/{}/stock", Uuid::new_v4());
        let (status, _) = call("POST", &uri, Some(json!({ "delta": 3_000_000_000i64, "reason": "inventário" })), true).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_amount_bounds() {
        assert!(valid_amount(&Decimal::ZERO).is_ok());
        assert!(valid_amount(&crate::finance::MAX_AMOUNT).is_ok());
        assert!(valid_amount(&Decimal::new(-1, 2)).is_err());
        assert!(valid_amount(&(crate::finance::MAX_AMOUNT + Decimal::ONE)).is_err());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_payload_before_storage() {
        let body = json!({ "sku": "", "name": "Fone", "cost_price": "-1", "sale_price": "10" });
        let (status, body) = call("POST", "/api/v1/products", Some(body), true).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("Validation failed"));
    }
}
