//! Marketplace REST clients.
//!
//! Each client speaks one vendor API: token refresh plus the few write
//! calls needed to keep a listing in line with local stock and price.
//! Clients never retry; the caller records the outcome on the listing.

pub mod amazon;
pub mod mercadolivre;
pub mod shopify;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aggregates::{ListingUpdate, ProductListing};

pub use amazon::AmazonClient;
pub use mercadolivre::MercadoLivreClient;
pub use shopify::ShopifyClient;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace { MercadoLivre, Shopee, Amazon, Shopify, Magalu }

impl Marketplace {
    pub const ALL: [Marketplace; 5] = [Self::MercadoLivre, Self::Shopee, Self::Amazon, Self::Shopify, Self::Magalu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MercadoLivre => "mercadolivre", Self::Shopee => "shopee", Self::Amazon => "amazon",
            Self::Shopify => "shopify", Self::Magalu => "magalu",
        }
    }

    pub fn parse(s: &str) -> Option<Self> { Self::ALL.into_iter().find(|m| m.as_str() == s) }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MercadoLivre => "Mercado Livre", Self::Shopee => "Shopee", Self::Amazon => "Amazon",
            Self::Shopify => "Shopify", Self::Magalu => "Magalu",
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.display_name()) }
}

/// OAuth application registered with a marketplace.
#[derive(Debug, Clone)]
pub struct OAuthApp { pub client_id: String, pub client_secret: String }

/// Stored account credentials for one marketplace integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub shop_domain: Option<String>,
    #[serde(default)]
    pub marketplace_id: Option<String>,
}

impl Credentials {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp - now < Duration::minutes(REFRESH_MARGIN_MINUTES))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingInfo {
    pub tracking_code: String,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0} rejected the access token")]
    Unauthorized(Marketplace),

    #[error("{0} denied access to the resource")]
    Forbidden(Marketplace),

    #[error("{0} could not find the resource")]
    NotFound(Marketplace),

    #[error("{0} rate limit exceeded")]
    RateLimited(Marketplace),

    #[error("{marketplace} API error ({status}): {body}")]
    Api { marketplace: Marketplace, status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0} account is not connected")]
    NotConnected(Marketplace),

    #[error("{0} does not support {1}")]
    Unsupported(Marketplace, &'static str),

    #[error("Invalid listing: {0}")]
    InvalidListing(String),
}

impl SyncError {
    pub fn from_status(marketplace: Marketplace, status: u16, body: String) -> Self {
        match status {
            401 => Self::Unauthorized(marketplace),
            403 => Self::Forbidden(marketplace),
            404 => Self::NotFound(marketplace),
            429 => Self::RateLimited(marketplace),
            _ => Self::Api { marketplace, status, body },
        }
    }

    /// Message stored on the listing and shown to the seller.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized(m) => format!("Your {} session has expired. Reconnect your account in Integrations.", m),
            Self::Forbidden(m) => format!("Your {} account does not have permission for this operation.", m),
            Self::NotFound(m) => format!("Listing not found on {}. It may have been removed.", m),
            Self::RateLimited(m) => format!("{} is limiting requests. Try again in a few minutes.", m),
            Self::Api { marketplace, status, body } => {
                let detail: String = body.chars().take(200).collect();
                format!("{} returned an error ({}): {}", marketplace, status, detail)
            }
            Self::Transport(e) => format!("Could not reach the marketplace: {}", e),
            Self::NotConnected(m) => format!("Connect your {} account before syncing.", m),
            Self::Unsupported(m, what) => format!("{} does not support {} yet.", m, what),
            Self::InvalidListing(msg) => msg.clone(),
        }
    }
}

/// Passes successful responses through and maps failures by status code.
pub(crate) async fn check(marketplace: Marketplace, response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() { return Ok(response); }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%marketplace, status = status.as_u16(), %body, "marketplace request failed");
    Err(SyncError::from_status(marketplace, status.as_u16(), body))
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl TokenResponse {
    /// An `expires_in` too large to represent leaves the expiry unknown.
    pub(crate) fn into_credentials(self, previous: &Credentials, now: DateTime<Utc>) -> Credentials {
        Credentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at: Duration::try_seconds(self.expires_in.max(0)).and_then(|ttl| now.checked_add_signed(ttl)),
            ..previous.clone()
        }
    }
}

#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    fn marketplace(&self) -> Marketplace;

    fn needs_refresh(&self, credentials: &Credentials, now: DateTime<Utc>) -> bool { credentials.needs_refresh(now) }

    async fn refresh_credentials(&self, credentials: &Credentials) -> Result<Credentials, SyncError>;

    async fn push_listing_update(&self, credentials: &Credentials, listing: &ProductListing, update: &ListingUpdate) -> Result<(), SyncError>;

    async fn update_tracking(&self, _credentials: &Credentials, _order_external_id: &str, _tracking: &TrackingInfo) -> Result<(), SyncError> {
        Err(SyncError::Unsupported(self.marketplace(), "tracking updates"))
    }
}

#[derive(Default, Clone)]
pub struct MarketplaceRegistry {
    clients: HashMap<Marketplace, Arc<dyn MarketplaceClient>>,
}

impl MarketplaceRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, client: Arc<dyn MarketplaceClient>) -> Self {
        self.clients.insert(client.marketplace(), client);
        self
    }

    pub fn get(&self, marketplace: Marketplace) -> Result<Arc<dyn MarketplaceClient>, SyncError> {
        self.clients.get(&marketplace).cloned().ok_or(SyncError::Unsupported(marketplace, "listing sync"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Serves `app` on an ephemeral local port and returns its base URL.
    pub(crate) async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    pub(crate) fn credentials(expires_in_minutes: i64) -> Credentials {
        Credentials {
            access_token: "old-token".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Some(Utc::now() + Duration::minutes(expires_in_minutes)),
            seller_id: Some("A1SELLER".into()),
            shop_domain: Some("loja.myshopify.com".into()),
            marketplace_id: None,
        }
    }

    #[test]
    fn test_needs_refresh_window() {
        let now = Utc::now();
        assert!(credentials(-1).needs_refresh(now));
        assert!(credentials(4).needs_refresh(now));
        assert!(!credentials(30).needs_refresh(now));
        assert!(!Credentials { expires_at: None, ..credentials(0) }.needs_refresh(now));
    }

    #[test]
    fn test_token_expiry_out_of_range() {
        let now = Utc::now();
        let token = |expires_in| TokenResponse { access_token: "new".into(), refresh_token: None, expires_in };
        let previous = credentials(60);
        assert_eq!(token(21600).into_credentials(&previous, now).expires_at, Some(now + Duration::hours(6)));
        assert_eq!(token(i64::MAX).into_credentials(&previous, now).expires_at, None);
        let expired = token(-30).into_credentials(&previous, now);
        assert_eq!(expired.expires_at, Some(now));
        assert!(expired.needs_refresh(now));
        assert_eq!(expired.refresh_token, previous.refresh_token);
    }

    #[test]
    fn test_status_mapping_and_messages() {
        let e = SyncError::from_status(Marketplace::MercadoLivre, 401, String::new());
        assert!(matches!(e, SyncError::Unauthorized(Marketplace::MercadoLivre)));
        assert!(e.user_message().contains("Reconnect your account"));
        let e = SyncError::from_status(Marketplace::Amazon, 403, String::new());
        assert!(e.user_message().contains("does not have permission"));
        let e = SyncError::from_status(Marketplace::Shopify, 500, "boom".into());
        assert_eq!(e.user_message(), "Shopify returned an error (500): boom");
    }

    #[test]
    fn test_marketplace_names_round_trip() {
        for m in Marketplace::ALL {
            assert_eq!(Marketplace::parse(m.as_str()), Some(m));
        }
        assert_eq!(serde_json::to_value(Marketplace::MercadoLivre).unwrap(), "mercadolivre");
        assert_eq!(Marketplace::parse("ebay"), None);
    }

    #[test]
    fn test_registry_reports_unsupported_marketplace() {
        let registry = MarketplaceRegistry::new();
        assert!(matches!(registry.get(Marketplace::Magalu), Err(SyncError::Unsupported(Marketplace::Magalu, _))));
    }
}
