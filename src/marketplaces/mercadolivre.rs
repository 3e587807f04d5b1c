//! Mercado Livre Items API.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{check, Credentials, Marketplace, MarketplaceClient, OAuthApp, SyncError, TokenResponse};
use crate::domain::aggregates::{ListingUpdate, ProductListing};
use crate::pricing::CompetitorListing;

pub const DEFAULT_BASE_URL: &str = "https://api.mercadolibre.com";
const SITE_ID: &str = "MLB";

pub struct MercadoLivreClient {
    http: reqwest::Client,
    base_url: String,
    app: Option<OAuthApp>,
}

impl MercadoLivreClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, app: Option<OAuthApp>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), app }
    }

    /// Body for `PUT /items/{id}`. Listings with variations carry price and stock per variation.
    pub fn item_payload(listing: &ProductListing, update: &ListingUpdate) -> Value {
        let mut body = Map::new();
        let mut priced = Map::new();
        if let Some(price) = update.price {
            priced.insert("price".into(), json!(price.to_f64()));
        }
        if let Some(stock) = update.stock {
            priced.insert("available_quantity".into(), json!(stock));
        }
        match &listing.external_variant_id {
            Some(variation_id) if !priced.is_empty() => {
                let mut variation = Map::new();
                variation.insert("id".into(), variation_id.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(variation_id)));
                variation.extend(priced);
                body.insert("variations".into(), json!([variation]));
            }
            _ => body.extend(priced),
        }
        if let Some(title) = &update.title {
            body.insert("title".into(), json!(title));
        }
        if let Some(status) = update.status {
            body.insert("status".into(), json!(status.as_str()));
        }
        Value::Object(body)
    }

    /// Public catalogue search on the Brazilian site, used for competitor prices.
    pub async fn search_listings(&self, query: &str, limit: u32, access_token: Option<&str>) -> Result<Vec<CompetitorListing>, SyncError> {
        let url = format!("{}/sites/{}/search", self.base_url, SITE_ID);
        let mut request = self.http.get(&url).query(&[("q", query.to_string()), ("limit", limit.min(50).to_string())]);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        let response = check(Marketplace::MercadoLivre, request.send().await?).await?;
        let page: SearchPage = response.json().await?;
        Ok(page.results.into_iter().map(|r| CompetitorListing {
            title: r.title,
            price: r.price,
            seller: r.seller.and_then(|s| s.nickname),
            marketplace: Some(Marketplace::MercadoLivre),
            url: r.permalink,
            sold_quantity: r.sold_quantity,
        }).collect())
    }
}

#[derive(Deserialize)]
struct SearchPage { results: Vec<SearchResult> }

#[derive(Deserialize)]
struct SearchResult {
    title: String,
    price: Decimal,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    sold_quantity: Option<u32>,
    #[serde(default)]
    seller: Option<SearchSeller>,
}

#[derive(Deserialize)]
struct SearchSeller { #[serde(default)] nickname: Option<String> }

#[async_trait]
impl MarketplaceClient for MercadoLivreClient {
    fn marketplace(&self) -> Marketplace { Marketplace::MercadoLivre }

    async fn refresh_credentials(&self, credentials: &Credentials) -> Result<Credentials, SyncError> {
        let app = self.app.as_ref().ok_or(SyncError::NotConnected(Marketplace::MercadoLivre))?;
        let refresh_token = credentials.refresh_token.as_deref().ok_or(SyncError::Unauthorized(Marketplace::MercadoLivre))?;
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self.http.post(format!("{}/oauth/token", self.base_url)).form(&form).send().await?;
        let token: TokenResponse = check(Marketplace::MercadoLivre, response).await?.json().await?;
        tracing::info!(expires_in = token.expires_in, "refreshed Mercado Livre token");
        Ok(token.into_credentials(credentials, Utc::now()))
    }

    async fn push_listing_update(&self, credentials: &Credentials, listing: &ProductListing, update: &ListingUpdate) -> Result<(), SyncError> {
        if listing.external_id.trim().is_empty() {
            return Err(SyncError::InvalidListing("Mercado Livre listing has no item id".to_string()));
        }
        let url = format!("{}/items/{}", self.base_url, listing.external_id);
        let response = self.http.put(&url)
            .bearer_auth(&credentials.access_token)
            .json(&Self::item_payload(listing, update))
            .send()
            .await?;
        check(Marketplace::MercadoLivre, response).await?;
        tracing::info!(item = %listing.external_id, "updated Mercado Livre item");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::listing::tests::listing;
    use crate::domain::aggregates::ListingStatus;
    use crate::marketplaces::tests::{credentials, serve};
    use axum::{extract::Path, http::{HeaderMap, StatusCode}, routing::{get, post, put}, Form, Json, Router};
    use std::collections::HashMap;

    #[test]
    fn test_payload_for_plain_item() {
        let l = listing(Marketplace::MercadoLivre);
        let update = ListingUpdate { price: Some(Decimal::new(8990, 2)), stock: Some(3), title: None, status: Some(ListingStatus::Paused) };
        assert_eq!(MercadoLivreClient::item_payload(&l, &update), json!({"price": 89.9, "available_quantity": 3, "status": "paused"}));
    }

    #[test]
    fn test_payload_for_variation() {
        let mut l = listing(Marketplace::MercadoLivre);
        l.external_variant_id = Some("180001".into());
        let update = ListingUpdate { stock: Some(9), title: Some("Novo título".into()), ..Default::default() };
        assert_eq!(
            MercadoLivreClient::item_payload(&l, &update),
            json!({"variations": [{"id": 180001, "available_quantity": 9}], "title": "Novo título"})
        );
    }

    #[tokio::test]
    async fn test_refresh_and_update_item() {
        let app = Router::new()
            .route("/oauth/token", post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form["grant_type"], "refresh_token");
                assert_eq!(form["refresh_token"], "refresh");
                Json(json!({"access_token": "new-token", "refresh_token": "refresh-2", "expires_in": 21600}))
            }))
            .route("/items/:id", put(|Path(id): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                if headers["authorization"] != "Bearer new-token" { return StatusCode::UNAUTHORIZED; }
                assert_eq!(id, "MLB123");
                assert_eq!(body["available_quantity"], 4);
                StatusCode::OK
            }));
        let base = serve(app).await;
        let client = MercadoLivreClient::new(reqwest::Client::new(), base, Some(OAuthApp { client_id: "app".into(), client_secret: "secret".into() }));

        let creds = client.refresh_credentials(&credentials(1)).await.unwrap();
        assert_eq!(creds.access_token, "new-token");
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh-2"));
        assert!(!creds.needs_refresh(Utc::now()));

        let update = ListingUpdate { stock: Some(4), ..Default::default() };
        client.push_listing_update(&creds, &listing(Marketplace::MercadoLivre), &update).await.unwrap();
        let err = client.push_listing_update(&credentials(60), &listing(Marketplace::MercadoLivre), &update).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_search_listings() {
        let app = Router::new().route("/sites/MLB/search", get(|| async {
            Json(json!({"results": [
                {"title": "Fone JBL Tune 510BT", "price": 229.9, "permalink": "https://produto.mercadolivre.com.br/MLB-1", "sold_quantity": 120, "seller": {"nickname": "LOJA_X"}},
                {"title": "Fone Genérico", "price": 39}
            ]}))
        }));
        let client = MercadoLivreClient::new(reqwest::Client::new(), serve(app).await, None);
        let results = client.search_listings("fone jbl", 10, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].price, Decimal::new(2299, 1));
        assert_eq!(results[0].seller.as_deref(), Some("LOJA_X"));
        assert_eq!(results[1].sold_quantity, None);
    }

    #[tokio::test]
    async fn test_refresh_without_app_is_not_connected() {
        let client = MercadoLivreClient::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
        let err = client.refresh_credentials(&credentials(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected(Marketplace::MercadoLivre)));
    }
}
