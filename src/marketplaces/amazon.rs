//! Amazon Selling Partner API: Listings Items 2021-08-01 and the LWA token endpoint.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check, Credentials, Marketplace, MarketplaceClient, OAuthApp, SyncError, TokenResponse};
use crate::domain::aggregates::{ListingStatus, ListingUpdate, ProductListing};

pub const DEFAULT_API_URL: &str = "https://sellingpartnerapi-na.amazon.com";
pub const DEFAULT_LWA_URL: &str = "https://api.amazon.com";
/// amazon.com.br
pub const BRAZIL_MARKETPLACE_ID: &str = "A2Q3Y263D00KWC";

pub struct AmazonClient {
    http: reqwest::Client,
    api_url: String,
    lwa_url: String,
    app: Option<OAuthApp>,
}

#[derive(Deserialize)]
struct SubmissionResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    issues: Vec<Value>,
}

impl AmazonClient {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, lwa_url: impl Into<String>, app: Option<OAuthApp>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            lwa_url: lwa_url.into().trim_end_matches('/').to_string(),
            app,
        }
    }

    /// JSON-patch operations for a listing update. Paused or closed listings are offered with zero quantity.
    pub fn patches(marketplace_id: &str, update: &ListingUpdate) -> Vec<Value> {
        let mut patches = Vec::new();
        if let Some(price) = update.price {
            patches.push(json!({
                "op": "replace",
                "path": "/attributes/purchasable_offer",
                "value": [{
                    "marketplace_id": marketplace_id,
                    "currency": "BRL",
                    "our_price": [{ "schedule": [{ "value_with_tax": price.round_dp(2).to_string() }] }]
                }]
            }));
        }
        let quantity = match update.status {
            Some(ListingStatus::Paused) | Some(ListingStatus::Closed) => Some(0),
            _ => update.stock,
        };
        if let Some(quantity) = quantity {
            patches.push(json!({
                "op": "replace",
                "path": "/attributes/fulfillment_availability",
                "value": [{ "fulfillment_channel_code": "DEFAULT", "quantity": quantity }]
            }));
        }
        if let Some(title) = &update.title {
            patches.push(json!({
                "op": "replace",
                "path": "/attributes/item_name",
                "value": [{ "value": title, "language_tag": "pt_BR", "marketplace_id": marketplace_id }]
            }));
        }
        patches
    }

    fn listing_url(&self, seller_id: &str, sku: &str, marketplace_id: &str) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.api_url).map_err(|e| SyncError::InvalidListing(format!("Invalid SP-API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidListing("SP-API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["listings", "2021-08-01", "items", seller_id, sku]);
        url.query_pairs_mut().append_pair("marketplaceIds", marketplace_id);
        Ok(url)
    }
}

#[async_trait]
impl MarketplaceClient for AmazonClient {
    fn marketplace(&self) -> Marketplace { Marketplace::Amazon }

    async fn refresh_credentials(&self, credentials: &Credentials) -> Result<Credentials, SyncError> {
        let app = self.app.as_ref().ok_or(SyncError::NotConnected(Marketplace::Amazon))?;
        let refresh_token = credentials.refresh_token.as_deref().ok_or(SyncError::Unauthorized(Marketplace::Amazon))?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
        ];
        let response = self.http.post(format!("{}/auth/o2/token", self.lwa_url)).form(&form).send().await?;
        let token: TokenResponse = check(Marketplace::Amazon, response).await?.json().await?;
        tracing::info!(expires_in = token.expires_in, "refreshed Amazon LWA token");
        Ok(token.into_credentials(credentials, Utc::now()))
    }

    async fn push_listing_update(&self, credentials: &Credentials, listing: &ProductListing, update: &ListingUpdate) -> Result<(), SyncError> {
        let seller_id = credentials.seller_id.as_deref().ok_or(SyncError::NotConnected(Marketplace::Amazon))?;
        if listing.external_id.trim().is_empty() {
            return Err(SyncError::InvalidListing("Amazon listing has no seller SKU".to_string()));
        }
        let marketplace_id = credentials.marketplace_id.as_deref().unwrap_or(BRAZIL_MARKETPLACE_ID);
        let url = self.listing_url(seller_id, &listing.external_id, marketplace_id)?;
        let body = json!({ "productType": "PRODUCT", "patches": Self::patches(marketplace_id, update) });

        let response = self.http.patch(url)
            .header("x-amz-access-token", &credentials.access_token)
            .json(&body)
            .send()
            .await?;
        let submission: SubmissionResponse = check(Marketplace::Amazon, response).await?.json().await?;
        if submission.status.as_deref() == Some("INVALID") {
            let body = serde_json::to_string(&submission.issues).unwrap_or_default();
            return Err(SyncError::Api { marketplace: Marketplace::Amazon, status: 400, body });
        }
        tracing::info!(sku = %listing.external_id, status = ?submission.status, "submitted Amazon listing patch");
        Ok(())
    }
}
