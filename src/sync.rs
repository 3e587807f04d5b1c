//! Listing sync: push local price/stock/title/status changes to the marketplace that hosts the listing.
//!
//! Flow per listing: load credentials, refresh them when close to expiry,
//! send one partial update and write the outcome back to the listing row.
//! Marketplace failures are recorded on the listing and reported in the
//! outcome; they never surface as errors to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{ListingStatus, ListingUpdate, ProductListing, SyncStatus};
use crate::domain::events::EventNotice;
use crate::events::EventPublisher;
use crate::marketplaces::{Credentials, MarketplaceRegistry, SyncError, TrackingInfo};
use crate::{Marketplace, Result, UnistockError};

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ListingRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub marketplace: String,
    pub external_id: String,
    pub external_variant_id: Option<String>,
    pub title: String,
    pub price: Decimal,
    pub stock: i32,
    pub status: String,
    pub sync_status: String,
    pub sync_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListingRow {
    /// None for rows whose marketplace this build does not know.
    pub fn into_listing(self) -> Option<ProductListing> {
        Some(ProductListing::restore(
            self.id, self.product_id, Marketplace::parse(&self.marketplace)?, self.external_id, self.external_variant_id, self.title,
            self.price, self.stock.max(0) as u32, ListingStatus::parse(&self.status).unwrap_or_default(),
            SyncStatus::parse(&self.sync_status), self.sync_error, self.last_synced_at,
        ))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IntegrationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub marketplace: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seller_id: Option<String>,
    pub shop_domain: Option<String>,
    pub marketplace_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationRow {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
            seller_id: self.seller_id.clone(),
            shop_domain: self.shop_domain.clone(),
            marketplace_id: self.marketplace_id.clone(),
        }
    }
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn listing(&self, user_id: Uuid, listing_id: Uuid) -> Result<Option<ProductListing>>;
    async fn listings_for_product(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<ProductListing>>;
    async fn credentials(&self, user_id: Uuid, marketplace: Marketplace) -> Result<Option<Credentials>>;
    async fn save_credentials(&self, user_id: Uuid, marketplace: Marketplace, credentials: &Credentials) -> Result<()>;
    async fn save_listing(&self, user_id: Uuid, listing: &ProductListing) -> Result<()>;
    async fn insert_notification(&self, user_id: Uuid, notice: &EventNotice) -> Result<()>;
}

pub struct PgStore { db: PgPool }

impl PgStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl SyncStore for PgStore {
    async fn listing(&self, user_id: Uuid, listing_id: Uuid) -> Result<Option<ProductListing>> {
        let row = sqlx::query_as::<_, ListingRow>("SELECT * FROM product_listings WHERE id = $1 AND user_id = $2")
            .bind(listing_id).bind(user_id).fetch_optional(&self.db).await?;
        Ok(row.and_then(ListingRow::into_listing))
    }

    async fn listings_for_product(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<ProductListing>> {
        let rows = sqlx::query_as::<_, ListingRow>("SELECT * FROM product_listings WHERE product_id = $1 AND user_id = $2 AND status <> 'closed' ORDER BY created_at")
            .bind(product_id).bind(user_id).fetch_all(&self.db).await?;
        Ok(rows.into_iter().filter_map(ListingRow::into_listing).collect())
    }

    async fn credentials(&self, user_id: Uuid, marketplace: Marketplace) -> Result<Option<Credentials>> {
        let row = sqlx::query_as::<_, IntegrationRow>("SELECT * FROM integrations WHERE user_id = $1 AND marketplace = $2 AND status = 'connected'")
            .bind(user_id).bind(marketplace.as_str()).fetch_optional(&self.db).await?;
        Ok(row.map(|r| r.credentials()))
    }

    async fn save_credentials(&self, user_id: Uuid, marketplace: Marketplace, c: &Credentials) -> Result<()> {
        sqlx::query("UPDATE integrations SET access_token = $3, refresh_token = $4, expires_at = $5, updated_at = NOW() WHERE user_id = $1 AND marketplace = $2")
            .bind(user_id).bind(marketplace.as_str()).bind(&c.access_token).bind(&c.refresh_token).bind(c.expires_at)
            .execute(&self.db).await?;
        Ok(())
    }

    async fn save_listing(&self, user_id: Uuid, l: &ProductListing) -> Result<()> {
        let stock = i32::try_from(l.stock).map_err(|_| UnistockError::Validation("Stock is out of range".to_string()))?;
        sqlx::query("UPDATE product_listings SET title = $3, price = $4, stock = $5, status = $6, sync_status = $7, sync_error = $8, last_synced_at = $9, updated_at = NOW() WHERE id = $1 AND user_id = $2")
            .bind(l.id).bind(user_id).bind(&l.title).bind(l.price).bind(stock).bind(l.status.as_str())
            .bind(l.sync_status.as_str()).bind(&l.sync_error).bind(l.last_synced_at)
            .execute(&self.db).await?;
        Ok(())
    }

    async fn insert_notification(&self, user_id: Uuid, notice: &EventNotice) -> Result<()> {
        Ok(crate::events::insert_notification(&self.db, user_id, notice).await?)
    }
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub listing_id: Uuid,
    pub marketplace: Option<Marketplace>,
    pub message: String,
    pub error: Option<String>,
}

impl SyncOutcome {
    fn ok(listing: &ProductListing) -> Self {
        Self { success: true, listing_id: listing.id, marketplace: Some(listing.marketplace), message: format!("Listing synced with {}", listing.marketplace), error: None }
    }

    fn failed(listing_id: Uuid, marketplace: Option<Marketplace>, error: String) -> Self {
        Self { success: false, listing_id, marketplace, message: "Sync failed".to_string(), error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingOutcome {
    pub pushed: bool,
    pub marketplace: Option<Marketplace>,
    pub message: String,
}

#[derive(Clone)]
pub struct ListingSyncService {
    store: Arc<dyn SyncStore>,
    registry: MarketplaceRegistry,
    publisher: EventPublisher,
}

impl ListingSyncService {
    pub fn new(store: Arc<dyn SyncStore>, registry: MarketplaceRegistry, publisher: EventPublisher) -> Self {
        Self { store, registry, publisher }
    }

    /// Applies `update` to the listing and pushes it. An empty update re-sends the current price and stock.
    pub async fn sync_listing(&self, user_id: Uuid, listing_id: Uuid, update: ListingUpdate) -> SyncOutcome {
        match self.store.listing(user_id, listing_id).await {
            Ok(Some(listing)) => self.sync_loaded(user_id, listing, update).await,
            Ok(None) => SyncOutcome::failed(listing_id, None, "Listing not found".to_string()),
            Err(e) => {
                tracing::error!(%listing_id, error = %e, "failed to load listing");
                SyncOutcome::failed(listing_id, None, e.to_string())
            }
        }
    }

    /// Syncs every open listing of a product whose price or stock differs from the given values.
    pub async fn sync_product(&self, user_id: Uuid, product_id: Uuid, price: Option<Decimal>, stock: Option<u32>) -> Result<Vec<SyncOutcome>> {
        let listings = self.store.listings_for_product(user_id, product_id).await?;
        let mut outcomes = Vec::new();
        for listing in listings {
            let update = listing.changes_towards(price, stock, None);
            if update.is_empty() { continue; }
            outcomes.push(self.sync_loaded(user_id, listing, update).await);
        }
        tracing::info!(%product_id, synced = outcomes.len(), "product listings synced");
        Ok(outcomes)
    }

    /// Sends tracking for a marketplace order. Manual orders and unsupported marketplaces are reported, not raised.
    pub async fn push_tracking(&self, user_id: Uuid, marketplace: Option<Marketplace>, external_order_id: Option<&str>, tracking: &TrackingInfo) -> TrackingOutcome {
        let (Some(m), Some(order_ref)) = (marketplace, external_order_id) else {
            return TrackingOutcome { pushed: false, marketplace, message: "Order has no marketplace reference".to_string() };
        };
        match self.try_push_tracking(user_id, m, order_ref, tracking).await {
            Ok(()) => TrackingOutcome { pushed: true, marketplace, message: format!("Tracking sent to {}", m) },
            Err(e) => {
                tracing::warn!(marketplace = %m, error = %e, "tracking push failed");
                TrackingOutcome { pushed: false, marketplace, message: e.user_message() }
            }
        }
    }

    async fn try_push_tracking(&self, user_id: Uuid, marketplace: Marketplace, order_ref: &str, tracking: &TrackingInfo) -> std::result::Result<(), SyncError> {
        let client = self.registry.get(marketplace)?;
        let credentials = self.fresh_credentials(user_id, marketplace, client.as_ref()).await?;
        client.update_tracking(&credentials, order_ref, tracking).await
    }

    async fn sync_loaded(&self, user_id: Uuid, mut listing: ProductListing, update: ListingUpdate) -> SyncOutcome {
        let update = if update.is_empty() {
            ListingUpdate { price: Some(listing.price), stock: Some(listing.stock), ..Default::default() }
        } else {
            update
        };
        if let Err(e) = listing.apply(&update) {
            return SyncOutcome::failed(listing.id, Some(listing.marketplace), e.to_string());
        }

        let result = self.push(user_id, &listing, &update).await;
        let outcome = match &result {
            Ok(()) => {
                listing.mark_synced(Utc::now());
                tracing::info!(listing_id = %listing.id, marketplace = %listing.marketplace, "listing synced");
                SyncOutcome::ok(&listing)
            }
            Err(e) => {
                let message = e.user_message();
                listing.mark_failed(message.clone());
                tracing::warn!(listing_id = %listing.id, marketplace = %listing.marketplace, error = %e, "listing sync failed");
                SyncOutcome::failed(listing.id, Some(listing.marketplace), message)
            }
        };

        if let Err(e) = self.store.save_listing(user_id, &listing).await {
            tracing::error!(listing_id = %listing.id, error = %e, "failed to store sync status");
        }
        let events = listing.take_events();
        for notice in events.iter().filter_map(|e| e.notification()) {
            if let Err(e) = self.store.insert_notification(user_id, &notice).await {
                tracing::error!(error = %e, "failed to store notification");
            }
        }
        self.publisher.publish(user_id, &events).await;
        outcome
    }

    async fn push(&self, user_id: Uuid, listing: &ProductListing, update: &ListingUpdate) -> std::result::Result<(), SyncError> {
        let client = self.registry.get(listing.marketplace)?;
        let credentials = self.fresh_credentials(user_id, listing.marketplace, client.as_ref()).await?;
        client.push_listing_update(&credentials, listing, update).await
    }

    async fn fresh_credentials(&self, user_id: Uuid, marketplace: Marketplace, client: &dyn crate::marketplaces::MarketplaceClient) -> std::result::Result<Credentials, SyncError> {
        let stored = self.store.credentials(user_id, marketplace).await
            .map_err(|e| { tracing::error!(error = %e, "failed to load credentials"); SyncError::NotConnected(marketplace) })?
            .ok_or(SyncError::NotConnected(marketplace))?;
        if !client.needs_refresh(&stored, Utc::now()) { return Ok(stored); }

        let refreshed = client.refresh_credentials(&stored).await?;
        if let Err(e) = self.store.save_credentials(user_id, marketplace, &refreshed).await {
            tracing::error!(%marketplace, error = %e, "failed to store refreshed credentials");
        }
        Ok(refreshed)
    }
}
