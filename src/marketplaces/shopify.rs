//! Shopify Admin REST API.
//!
//! Offline access tokens do not expire, so there is nothing to refresh.
//! Price lives on the variant, stock on the variant's inventory item at a
//! location, and title/status on the product.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{check, Credentials, Marketplace, MarketplaceClient, SyncError, TrackingInfo};
use crate::domain::aggregates::{ListingStatus, ListingUpdate, ProductListing};

pub const DEFAULT_API_VERSION: &str = "2024-01";
const TOKEN_HEADER: &str = "X-Shopify-Access-Token";

pub struct ShopifyClient {
    http: reqwest::Client,
    api_version: String,
    base_override: Option<String>,
}

#[derive(Deserialize)]
struct VariantEnvelope { variant: Variant }

#[derive(Deserialize)]
struct Variant { inventory_item_id: u64 }

#[derive(Deserialize)]
struct LocationsEnvelope { locations: Vec<Location> }

#[derive(Deserialize)]
struct Location {
    id: u64,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool { true }

#[derive(Deserialize)]
struct FulfillmentOrdersEnvelope { fulfillment_orders: Vec<FulfillmentOrder> }

#[derive(Deserialize)]
struct FulfillmentOrder { id: u64, status: String }

fn parse_id(raw: &str, what: &str) -> Result<u64, SyncError> {
    raw.trim().parse().map_err(|_| SyncError::InvalidListing(format!("Shopify {} id '{}' is not numeric", what, raw)))
}

fn product_status(status: ListingStatus) -> &'static str {
    match status { ListingStatus::Active => "active", ListingStatus::Paused => "draft", ListingStatus::Closed => "archived" }
}

impl ShopifyClient {
    pub fn new(http: reqwest::Client, api_version: impl Into<String>) -> Self {
        Self { http, api_version: api_version.into(), base_override: None }
    }

    /// Sends every request to `base` instead of the shop's own domain.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_override = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    fn admin_base(&self, credentials: &Credentials) -> Result<String, SyncError> {
        if let Some(base) = &self.base_override {
            return Ok(format!("{}/admin/api/{}", base, self.api_version));
        }
        let shop = credentials.shop_domain.as_deref().filter(|s| !s.is_empty()).ok_or(SyncError::NotConnected(Marketplace::Shopify))?;
        Ok(format!("https://{}/admin/api/{}", shop, self.api_version))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, credentials: &Credentials, url: &str) -> Result<T, SyncError> {
        let response = self.http.get(url).header(TOKEN_HEADER, &credentials.access_token).send().await?;
        Ok(check(Marketplace::Shopify, response).await?.json().await?)
    }

    async fn send_json(&self, method: reqwest::Method, credentials: &Credentials, url: &str, body: serde_json::Value) -> Result<(), SyncError> {
        let response = self.http.request(method, url).header(TOKEN_HEADER, &credentials.access_token).json(&body).send().await?;
        check(Marketplace::Shopify, response).await?;
        Ok(())
    }

    async fn first_location(&self, credentials: &Credentials, base: &str) -> Result<u64, SyncError> {
        let locations: LocationsEnvelope = self.get_json(credentials, &format!("{}/locations.json", base)).await?;
        locations.locations.into_iter().find(|l| l.active).map(|l| l.id)
            .ok_or_else(|| SyncError::InvalidListing("Shopify store has no active location".to_string()))
    }
}

#[async_trait]
impl MarketplaceClient for ShopifyClient {
    fn marketplace(&self) -> Marketplace { Marketplace::Shopify }

    fn needs_refresh(&self, _credentials: &Credentials, _now: DateTime<Utc>) -> bool { false }

    async fn refresh_credentials(&self, credentials: &Credentials) -> Result<Credentials, SyncError> {
        Ok(credentials.clone())
    }

    async fn push_listing_update(&self, credentials: &Credentials, listing: &ProductListing, update: &ListingUpdate) -> Result<(), SyncError> {
        let base = self.admin_base(credentials)?;
        let product_id = parse_id(&listing.external_id, "product")?;

        if update.title.is_some() || update.status.is_some() {
            let mut product = json!({ "id": product_id });
            if let Some(title) = &update.title { product["title"] = json!(title); }
            if let Some(status) = update.status { product["status"] = json!(product_status(status)); }
            self.send_json(reqwest::Method::PUT, credentials, &format!("{}/products/{}.json", base, product_id), json!({ "product": product })).await?;
        }

        if update.price.is_none() && update.stock.is_none() { return Ok(()); }
        let variant_id = listing.external_variant_id.as_deref()
            .ok_or_else(|| SyncError::InvalidListing("Shopify listing has no variant id".to_string()))
            .and_then(|v| parse_id(v, "variant"))?;

        if let Some(price) = update.price {
            let body = json!({ "variant": { "id": variant_id, "price": price.round_dp(2).to_string() } });
            self.send_json(reqwest::Method::PUT, credentials, &format!("{}/variants/{}.json", base, variant_id), body).await?;
        }

        if let Some(stock) = update.stock {
            let variant: VariantEnvelope = self.get_json(credentials, &format!("{}/variants/{}.json", base, variant_id)).await?;
            let location_id = self.first_location(credentials, &base).await?;
            let body = json!({ "location_id": location_id, "inventory_item_id": variant.variant.inventory_item_id, "available": stock });
            self.send_json(reqwest::Method::POST, credentials, &format!("{}/inventory_levels/set.json", base), body).await?;
        }
        tracing::info!(product_id, variant_id, "updated Shopify listing");
        Ok(())
    }

    async fn update_tracking(&self, credentials: &Credentials, order_external_id: &str, tracking: &TrackingInfo) -> Result<(), SyncError> {
        let base = self.admin_base(credentials)?;
        let order_id = parse_id(order_external_id, "order")?;
        let orders: FulfillmentOrdersEnvelope = self.get_json(credentials, &format!("{}/orders/{}/fulfillment_orders.json", base, order_id)).await?;
        let open = orders.fulfillment_orders.into_iter()
            .find(|f| f.status == "open" || f.status == "in_progress")
            .ok_or_else(|| SyncError::InvalidListing("Order has no open fulfillment order".to_string()))?;
        let body = json!({
            "fulfillment": {
                "line_items_by_fulfillment_order": [{ "fulfillment_order_id": open.id }],
                "tracking_info": { "number": tracking.tracking_code, "company": tracking.carrier, "url": tracking.tracking_url },
                "notify_customer": true
            }
        });
        self.send_json(reqwest::Method::POST, credentials, &format!("{}/fulfillments.json", base), body).await?;
        tracing::info!(order_id, "created Shopify fulfillment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::listing::tests::listing;
    use crate::marketplaces::tests::{credentials, serve};
    use axum::{extract::State, routing::{get, post, put}, Json, Router};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    fn fake_shop(calls: Calls) -> Router {
        Router::new()
            .route("/admin/api/2024-01/products/555.json", put(|State(c): State<Calls>, Json(b): Json<Value>| async move {
                c.lock().unwrap().push(("product".into(), b));
                Json(json!({}))
            }))
            .route("/admin/api/2024-01/variants/777.json",
                get(|| async { Json(json!({"variant": {"id": 777, "inventory_item_id": 999}})) })
                .put(|State(c): State<Calls>, Json(b): Json<Value>| async move {
                    c.lock().unwrap().push(("variant".into(), b));
                    Json(json!({}))
                }))
            .route("/admin/api/2024-01/locations.json", get(|| async {
                Json(json!({"locations": [{"id": 1, "active": false}, {"id": 2, "active": true}]}))
            }))
            .route("/admin/api/2024-01/inventory_levels/set.json", post(|State(c): State<Calls>, Json(b): Json<Value>| async move {
                c.lock().unwrap().push(("inventory".into(), b));
                Json(json!({}))
            }))
            .route("/admin/api/2024-01/orders/321/fulfillment_orders.json", get(|| async {
                Json(json!({"fulfillment_orders": [{"id": 10, "status": "closed"}, {"id": 11, "status": "open"}]}))
            }))
            .route("/admin/api/2024-01/fulfillments.json", post(|State(c): State<Calls>, Json(b): Json<Value>| async move {
                c.lock().unwrap().push(("fulfillment".into(), b));
                Json(json!({}))
            }))
            .with_state(calls)
    }

    fn shopify_listing() -> ProductListing {
        let mut l = listing(Marketplace::Shopify);
        l.external_id = "555".into();
        l.external_variant_id = Some("777".into());
        l
    }

    #[tokio::test]
    async fn test_push_updates_product_variant_and_inventory() {
        let calls: Calls = Arc::default();
        let client = ShopifyClient::new(reqwest::Client::new(), DEFAULT_API_VERSION).with_base_url(serve(fake_shop(calls.clone())).await);
        let update = ListingUpdate { price: Some(Decimal::new(12990, 2)), stock: Some(6), title: Some("Camiseta".into()), status: Some(ListingStatus::Paused) };
        client.push_listing_update(&credentials(0), &shopify_listing(), &update).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], ("product".to_string(), json!({"product": {"id": 555, "title": "Camiseta", "status": "draft"}})));
        assert_eq!(calls[1], ("variant".to_string(), json!({"variant": {"id": 777, "price": "129.90"}})));
        assert_eq!(calls[2], ("inventory".to_string(), json!({"location_id": 2, "inventory_item_id": 999, "available": 6})));
    }

    #[tokio::test]
    async fn test_tracking_uses_open_fulfillment_order() {
        let calls: Calls = Arc::default();
        let client = ShopifyClient::new(reqwest::Client::new(), DEFAULT_API_VERSION).with_base_url(serve(fake_shop(calls.clone())).await);
        let tracking = TrackingInfo { tracking_code: "BR1".into(), carrier: Some("Correios".into()), tracking_url: None };
        client.update_tracking(&credentials(0), "321", &tracking).await.unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].1["fulfillment"]["line_items_by_fulfillment_order"][0]["fulfillment_order_id"], 11);
        assert_eq!(calls[0].1["fulfillment"]["tracking_info"]["number"], "BR1");
    }

    #[tokio::test]
    async fn test_price_without_variant_is_invalid() {
        let client = ShopifyClient::new(reqwest::Client::new(), DEFAULT_API_VERSION).with_base_url("http://127.0.0.1:9");
        let mut l = shopify_listing();
        l.external_variant_id = None;
        let err = client.push_listing_update(&credentials(0), &l, &ListingUpdate { price: Some(Decimal::ONE), ..Default::default() }).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidListing(_)));
    }

    #[test]
    fn test_tokens_never_need_refresh() {
        let client = ShopifyClient::new(reqwest::Client::new(), DEFAULT_API_VERSION);
        assert!(!client.needs_refresh(&credentials(-60), Utc::now()));
        let no_shop = Credentials { shop_domain: None, ..credentials(0) };
        assert!(matches!(client.admin_base(&no_shop), Err(SyncError::NotConnected(Marketplace::Shopify))));
    }
}
