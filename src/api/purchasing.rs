//! Suppliers, purchase orders and operating expenses.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::finance::valid_amount;
use super::{transitioned, ApiError, ApiResult, AppState, ListParams, PaginatedResponse};
use crate::auth::AuthUser;
use crate::domain::aggregates::{PurchaseLine, PurchaseOrder, PurchaseOrderStatus};
use crate::UnistockError;

// ===== Suppliers =====

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SupplierRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub lead_time_days: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SupplierRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub contact_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[validate(range(min = 0, max = 365))]
    #[serde(default)]
    pub lead_time_days: i32,
    pub notes: Option<String>,
}

pub async fn list_suppliers(State(s): State<AppState>, user: AuthUser, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<SupplierRow>>> {
    let pattern = p.pattern();
    let suppliers = sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers WHERE user_id = $1 AND name ILIKE $2 ORDER BY name LIMIT $3 OFFSET $4")
        .bind(user.id).bind(&pattern).bind(p.limit()).bind(p.offset()).fetch_all(&s.db).await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM suppliers WHERE user_id = $1 AND name ILIKE $2").bind(user.id).bind(&pattern).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse { data: suppliers, total: total.0, page: p.page() }))
}

pub async fn get_supplier(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<SupplierRow>> {
    sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers WHERE id = $1 AND user_id = $2")
        .bind(id).bind(user.id).fetch_optional(&s.db).await?.map(Json).ok_or(ApiError::NotFound("Supplier"))
}

pub async fn create_supplier(State(s): State<AppState>, user: AuthUser, Json(r): Json<SupplierRequest>) -> ApiResult<(StatusCode, Json<SupplierRow>)> {
    r.validate()?;
    let supplier = sqlx::query_as::<_, SupplierRow>("INSERT INTO suppliers (id, user_id, name, contact_name, email, phone, lead_time_days, notes, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(user.id).bind(&r.name).bind(&r.contact_name).bind(&r.email).bind(&r.phone).bind(r.lead_time_days).bind(&r.notes)
        .fetch_one(&s.db).await?;
    Ok((StatusCode::CREATED, Json(supplier)))
}

pub async fn update_supplier(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>, Json(r): Json<SupplierRequest>) -> ApiResult<Json<SupplierRow>> {
    r.validate()?;
    sqlx::query_as::<_, SupplierRow>("UPDATE suppliers SET name = $3, contact_name = $4, email = $5, phone = $6, lead_time_days = $7, notes = $8, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING *")
        .bind(id).bind(user.id).bind(&r.name).bind(&r.contact_name).bind(&r.email).bind(&r.phone).bind(r.lead_time_days).bind(&r.notes)
        .fetch_optional(&s.db).await?.map(Json).ok_or(ApiError::NotFound("Supplier"))
}

pub async fn delete_supplier(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM suppliers WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Supplier")); }
    Ok(StatusCode::NO_CONTENT)
}

// ===== Purchase orders =====

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseOrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub supplier_id: Uuid,
    pub status: String,
    pub total: Decimal,
    pub expected_at: Option<NaiveDate>,
    pub notes: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseOrderItemRow {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PurchaseOrderDetail {
    #[serde(flatten)]
    pub purchase_order: PurchaseOrderRow,
    pub items: Vec<PurchaseOrderItemRow>,
}

impl PurchaseOrderDetail {
    fn to_aggregate(&self) -> ApiResult<PurchaseOrder> {
        let status = PurchaseOrderStatus::parse(&self.purchase_order.status)
            .ok_or_else(|| ApiError::Conflict(format!("Unknown purchase order status {}", self.purchase_order.status)))?;
        let lines = self.items.iter().map(|i| PurchaseLine { product_id: i.product_id, quantity: i.quantity.max(0) as u32, unit_cost: i.unit_cost }).collect();
        Ok(PurchaseOrder::restore(self.purchase_order.id, self.purchase_order.supplier_id, status, lines))
    }
}

async fn fetch_purchase_order(s: &AppState, user_id: Uuid, id: Uuid) -> ApiResult<PurchaseOrderDetail> {
    let purchase_order = sqlx::query_as::<_, PurchaseOrderRow>("SELECT * FROM purchase_orders WHERE id = $1 AND user_id = $2")
        .bind(id).bind(user_id).fetch_optional(&s.db).await?.ok_or(ApiError::NotFound("Purchase order"))?;
    let items = sqlx::query_as::<_, PurchaseOrderItemRow>("SELECT * FROM purchase_order_items WHERE purchase_order_id = $1 AND user_id = $2")
        .bind(id).bind(user_id).fetch_all(&s.db).await?;
    Ok(PurchaseOrderDetail { purchase_order, items })
}

pub async fn list_purchase_orders(State(s): State<AppState>, user: AuthUser, Query(p): Query<ListParams>) -> ApiResult<Json<PaginatedResponse<PurchaseOrderRow>>> {
    let rows = sqlx::query_as::<_, PurchaseOrderRow>("SELECT * FROM purchase_orders WHERE user_id = $1 AND ($2::text IS NULL OR status = $2) ORDER BY created_at DESC LIMIT $3 OFFSET $4")
        .bind(user.id).bind(&p.status).bind(p.limit()).bind(p.offset()).fetch_all(&s.db).await?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM purchase_orders WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)")
        .bind(user.id).bind(&p.status).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse { data: rows, total: total.0, page: p.page() }))
}

pub async fn get_purchase_order(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<PurchaseOrderDetail>> {
    Ok(Json(fetch_purchase_order(&s, user.id, id).await?))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct PurchaseItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 2147483647))]
    pub quantity: u32,
    #[validate(custom = "valid_amount")]
    pub unit_cost: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: Uuid,
    #[validate(length(min = 1))]
    #[validate]
    pub items: Vec<PurchaseItemRequest>,
    pub expected_at: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub async fn create_purchase_order(State(s): State<AppState>, user: AuthUser, Json(r): Json<CreatePurchaseOrderRequest>) -> ApiResult<(StatusCode, Json<PurchaseOrderDetail>)> {
    r.validate()?;
    let lines: Vec<PurchaseLine> = r.items.iter().map(|i| PurchaseLine { product_id: i.product_id, quantity: i.quantity, unit_cost: i.unit_cost }).collect();
    let po = PurchaseOrder::restore(Uuid::now_v7(), r.supplier_id, PurchaseOrderStatus::Draft, lines);

    let mut tx = s.db.begin().await?;
    let supplier: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM suppliers WHERE id = $1 AND user_id = $2").bind(r.supplier_id).bind(user.id).fetch_optional(&mut *tx).await?;
    if supplier.is_none() { return Err(ApiError::NotFound("Supplier")); }
    let purchase_order = sqlx::query_as::<_, PurchaseOrderRow>("INSERT INTO purchase_orders (id, user_id, supplier_id, status, total, expected_at, notes, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) RETURNING *")
        .bind(po.id()).bind(user.id).bind(po.supplier_id()).bind(po.status().as_str()).bind(po.total()).bind(r.expected_at).bind(&r.notes)
        .fetch_one(&mut *tx).await?;
    let mut items = Vec::with_capacity(po.lines().len());
    for line in po.lines() {
        let owned: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM products WHERE id = $1 AND user_id = $2").bind(line.product_id).bind(user.id).fetch_optional(&mut *tx).await?;
        if owned.is_none() { return Err(ApiError::NotFound("Product")); }
        items.push(sqlx::query_as::<_, PurchaseOrderItemRow>("INSERT INTO purchase_order_items (id, purchase_order_id, user_id, product_id, quantity, unit_cost) VALUES ($1, $2, $3, $4, $5, $6) RETURNING *")
            .bind(Uuid::now_v7()).bind(po.id()).bind(user.id).bind(line.product_id).bind(line.quantity as i32).bind(line.unit_cost)
            .fetch_one(&mut *tx).await?);
    }
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(PurchaseOrderDetail { purchase_order, items })))
}

async fn save_status(s: &AppState, user_id: Uuid, detail: &mut PurchaseOrderDetail, previous: PurchaseOrderStatus, status: PurchaseOrderStatus) -> ApiResult<()> {
    let row = sqlx::query_as::<_, PurchaseOrderRow>("UPDATE purchase_orders SET status = $3, updated_at = NOW() WHERE id = $1 AND user_id = $2 AND status = $4 RETURNING *")
        .bind(detail.purchase_order.id).bind(user_id).bind(status.as_str()).bind(previous.as_str()).fetch_optional(&s.db).await?;
    detail.purchase_order = transitioned(row, "Purchase order")?;
    Ok(())
}

pub async fn send_purchase_order(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<PurchaseOrderDetail>> {
    let mut detail = fetch_purchase_order(&s, user.id, id).await?;
    let mut po = detail.to_aggregate()?;
    let previous = po.status();
    po.send().map_err(UnistockError::from)?;
    save_status(&s, user.id, &mut detail, previous, po.status()).await?;
    Ok(Json(detail))
}

pub async fn cancel_purchase_order(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<PurchaseOrderDetail>> {
    let mut detail = fetch_purchase_order(&s, user.id, id).await?;
    let mut po = detail.to_aggregate()?;
    let previous = po.status();
    po.cancel().map_err(UnistockError::from)?;
    save_status(&s, user.id, &mut detail, previous, po.status()).await?;
    Ok(Json(detail))
}

/// Books the delivered units into stock and records the cost of each line as the product's latest cost.
pub async fn receive_purchase_order(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<Json<PurchaseOrderDetail>> {
    let mut detail = fetch_purchase_order(&s, user.id, id).await?;
    let mut po = detail.to_aggregate()?;
    let previous = po.status();
    let increments = po.receive().map_err(UnistockError::from)?;

    let mut tx = s.db.begin().await?;
    let row = sqlx::query_as::<_, PurchaseOrderRow>("UPDATE purchase_orders SET status = $3, received_at = NOW(), updated_at = NOW() WHERE id = $1 AND user_id = $2 AND status = $4 RETURNING *")
        .bind(id).bind(user.id).bind(po.status().as_str()).bind(previous.as_str()).fetch_optional(&mut *tx).await?;
    detail.purchase_order = transitioned(row, "Purchase order")?;
    for (product_id, quantity) in &increments {
        let quantity = i32::try_from(*quantity).map_err(|_| ApiError::BadRequest("Received quantity is out of range".to_string()))?;
        let unit_cost = po.lines().iter().rev().find(|l| l.product_id == *product_id).map(|l| l.unit_cost);
        sqlx::query("UPDATE products SET stock = stock + $3, cost_price = COALESCE($4, cost_price), updated_at = NOW() WHERE id = $1 AND user_id = $2")
            .bind(product_id).bind(user.id).bind(quantity).bind(unit_cost).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    crate::events::dispatch(&s.db, &s.events, user.id, po.take_events()).await?;
    tracing::info!(purchase_order_id = %id, products = increments.len(), "purchase order received");
    Ok(Json(detail))
}

// ===== Expenses =====

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExpenseRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub incurred_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub category: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn list_expenses(State(s): State<AppState>, user: AuthUser, Query(p): Query<ExpenseListParams>) -> ApiResult<Json<PaginatedResponse<ExpenseRow>>> {
    let w = ListParams::window(p.page, p.per_page);
    let filter = "user_id = $1 AND ($2::text IS NULL OR category = $2) AND ($3::date IS NULL OR incurred_on >= $3) AND ($4::date IS NULL OR incurred_on <= $4)";
    let expenses = sqlx::query_as::<_, ExpenseRow>(&format!("SELECT * FROM expenses WHERE {} ORDER BY incurred_on DESC LIMIT $5 OFFSET $6", filter))
        .bind(user.id).bind(&p.category).bind(p.from).bind(p.to).bind(w.limit()).bind(w.offset()).fetch_all(&s.db).await?;
    let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM expenses WHERE {}", filter))
        .bind(user.id).bind(&p.category).bind(p.from).bind(p.to).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse { data: expenses, total: total.0, page: w.page() }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateExpenseRequest {
    #[validate(length(min = 1, max = 50))]
    pub category: String,
    pub description: Option<String>,
    #[validate(custom = "valid_amount")]
    pub amount: Decimal,
    pub incurred_on: Option<NaiveDate>,
}

pub async fn create_expense(State(s): State<AppState>, user: AuthUser, Json(r): Json<CreateExpenseRequest>) -> ApiResult<(StatusCode, Json<ExpenseRow>)> {
    r.validate()?;
    let expense = sqlx::query_as::<_, ExpenseRow>("INSERT INTO expenses (id, user_id, category, description, amount, incurred_on, created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(user.id).bind(r.category.trim().to_lowercase()).bind(&r.description).bind(r.amount)
        .bind(r.incurred_on.unwrap_or_else(|| Utc::now().date_naive()))
        .fetch_one(&s.db).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn delete_expense(State(s): State<AppState>, user: AuthUser, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let done = sqlx::query("DELETE FROM expenses WHERE id = $1 AND user_id = $2").bind(id).bind(user.id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(ApiError::NotFound("Expense")); }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::call;
    use serde_json::json;

    #[test]
    fn test_purchase_order_detail_restores_lines() {
        let now = Utc::now();
        let (id, user_id, product_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let detail = PurchaseOrderDetail {
            purchase_order: PurchaseOrderRow { id, user_id, supplier_id: Uuid::new_v4(), status: "sent".into(), total: Decimal::new(300, 0), expected_at: None, notes: None, received_at: None, created_at: now, updated_at: now },
            items: vec![
                PurchaseOrderItemRow { id: Uuid::new_v4(), purchase_order_id: id, user_id, product_id, quantity: 10, unit_cost: Decimal::new(20, 0) },
                PurchaseOrderItemRow { id: Uuid::new_v4(), purchase_order_id: id, user_id, product_id, quantity: 5, unit_cost: Decimal::new(20, 0) },
            ],
        };
        let mut po = detail.to_aggregate().unwrap();
        assert_eq!(po.total(), Decimal::new(300, 0));
        assert_eq!(po.receive().unwrap(), vec![(product_id, 15)]);
        assert_eq!(po.status(), PurchaseOrderStatus::Received);
        assert!(po.receive().is_err());
        assert!(matches!(transitioned(None::<PurchaseOrderRow>, "Purchase order"), Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_purchase_quantity_must_fit_stock_column() {
        let body = json!({ "supplier_id": Uuid::new_v4(), "items": [{ "product_id": Uuid::new_v4(), "quantity": 3_000_000_000u64, "unit_cost": "1.00" }] });
        let (status, _) = call("POST", "/api/v1/purchase-orders", Some(body), true).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_supplier_email_is_validated() {
        let (status, _) = call("POST", "/api/v1/suppliers", Some(json!({ "name": "Distribuidora", "email": "not-an-email" })), true).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_expense_amount_must_not_be_negative() {
        let (status, _) = call("POST", "/api/v1/expenses", Some(json!({ "category": "ads", "amount": "-10.00" })), true).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
