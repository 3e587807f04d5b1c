//! Product listing on a marketplace

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::events::{DomainEvent, ListingEvent};
use crate::domain::value_objects::MAX_STOCK;
use crate::Marketplace;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus { #[default] Active, Paused, Closed }

impl ListingStatus {
    pub fn as_str(&self) -> &'static str { match self { Self::Active => "active", Self::Paused => "paused", Self::Closed => "closed" } }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "active" => Some(Self::Active), "paused" => Some(Self::Paused), "closed" => Some(Self::Closed), _ => None }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus { #[default] Pending, Synced, Error }

impl SyncStatus {
    pub fn as_str(&self) -> &'static str { match self { Self::Pending => "pending", Self::Synced => "synced", Self::Error => "error" } }
    pub fn parse(s: &str) -> Self { match s { "synced" => Self::Synced, "error" => Self::Error, _ => Self::Pending } }
}

/// Partial update pushed to a marketplace. Absent fields are left untouched remotely.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ListingStatus>,
}

impl ListingUpdate {
    pub fn is_empty(&self) -> bool { self.price.is_none() && self.stock.is_none() && self.title.is_none() && self.status.is_none() }

    pub fn check(&self) -> Result<(), ListingError> {
        if self.price.is_some_and(|p| p.is_sign_negative() && !p.is_zero()) { return Err(ListingError::NegativePrice); }
        if self.stock.is_some_and(|s| s > MAX_STOCK) { return Err(ListingError::StockOutOfRange); }
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) { return Err(ListingError::BlankTitle); }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ProductListing {
    pub id: Uuid,
    pub product_id: Uuid,
    pub marketplace: Marketplace,
    pub external_id: String,
    pub external_variant_id: Option<String>,
    pub title: String,
    pub price: Decimal,
    pub stock: u32,
    pub status: ListingStatus,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl ProductListing {
    #[allow(clippy::too_many_arguments)]
    pub fn restore(id: Uuid, product_id: Uuid, marketplace: Marketplace, external_id: String, external_variant_id: Option<String>, title: String, price: Decimal, stock: u32, status: ListingStatus, sync_status: SyncStatus, sync_error: Option<String>, last_synced_at: Option<DateTime<Utc>>) -> Self {
        Self { id, product_id, marketplace, external_id, external_variant_id, title, price, stock, status, sync_status, sync_error, last_synced_at, events: vec![] }
    }

    /// Fields that differ between this listing and the desired state.
    pub fn changes_towards(&self, price: Option<Decimal>, stock: Option<u32>, title: Option<&str>) -> ListingUpdate {
        ListingUpdate {
            price: price.filter(|p| *p != self.price),
            stock: stock.filter(|s| *s != self.stock),
            title: title.filter(|t| *t != self.title).map(str::to_string),
            status: None,
        }
    }

    /// Applies the update locally and flags the listing for sync. An invalid update leaves the listing untouched.
    pub fn apply(&mut self, update: &ListingUpdate) -> Result<(), ListingError> {
        update.check()?;
        if let Some(price) = update.price { self.price = price; }
        if let Some(stock) = update.stock { self.stock = stock; }
        if let Some(title) = &update.title { self.title = title.trim().to_string(); }
        if let Some(status) = update.status { self.status = status; }
        self.sync_status = SyncStatus::Pending;
        Ok(())
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.sync_status = SyncStatus::Synced;
        self.sync_error = None;
        self.last_synced_at = Some(at);
        self.events.push(DomainEvent::Listing(ListingEvent::Synced { listing_id: self.id, marketplace: self.marketplace }));
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.sync_status = SyncStatus::Error;
        self.sync_error = Some(error.clone());
        self.events.push(DomainEvent::Listing(ListingEvent::SyncFailed { listing_id: self.id, marketplace: self.marketplace, error }));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ListingError { NegativePrice, StockOutOfRange, BlankTitle }
impl std::error::Error for ListingError {}
impl std::fmt::Display for ListingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativePrice => write!(f, "Price cannot be negative"),
            Self::StockOutOfRange => write!(f, "Stock is out of range"),
            Self::BlankTitle => write!(f, "Title cannot be blank"),
        }
    }
}
