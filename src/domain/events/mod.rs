//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::Sku;
use crate::Marketplace;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Listing(ListingEvent),
    PurchaseOrder(PurchaseOrderEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    StockAdjusted { product_id: Uuid, sku: Sku, delta: i64, stock: u32, reason: String },
    LowStock { product_id: Uuid, sku: Sku, stock: u32, min_stock: u32 },
    OutOfStock { product_id: Uuid, sku: Sku },
    PriceChanged { product_id: Uuid, old_price: Decimal, new_price: Decimal },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Paid { order_id: Uuid },
    Shipped { order_id: Uuid, tracking_code: String, carrier: Option<String> },
    Delivered { order_id: Uuid },
    Cancelled { order_id: Uuid, restock: Vec<(Uuid, u32)> },
    Returned { order_id: Uuid },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListingEvent {
    Synced { listing_id: Uuid, marketplace: Marketplace },
    SyncFailed { listing_id: Uuid, marketplace: Marketplace, error: String },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PurchaseOrderEvent {
    Received { purchase_order_id: Uuid, total: Decimal },
}

/// Notification derived from an event that matters to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventNotice {
    pub kind: &'static str,
    pub title: String,
    pub message: String,
}

impl DomainEvent {
    /// Subject suffix under `unistock.events.`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::StockAdjusted { .. }) => "product.stock_adjusted",
            Self::Product(ProductEvent::LowStock { .. }) => "product.low_stock",
            Self::Product(ProductEvent::OutOfStock { .. }) => "product.out_of_stock",
            Self::Product(ProductEvent::PriceChanged { .. }) => "product.price_changed",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Order(OrderEvent::Shipped { .. }) => "order.shipped",
            Self::Order(OrderEvent::Delivered { .. }) => "order.delivered",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Order(OrderEvent::Returned { .. }) => "order.returned",
            Self::Listing(ListingEvent::Synced { .. }) => "listing.synced",
            Self::Listing(ListingEvent::SyncFailed { .. }) => "listing.sync_failed",
            Self::PurchaseOrder(PurchaseOrderEvent::Received { .. }) => "purchase_order.received",
        }
    }

    pub fn notification(&self) -> Option<EventNotice> {
        match self {
            Self::Product(ProductEvent::LowStock { sku, stock, min_stock, .. }) => Some(EventNotice {
                kind: "low_stock",
                title: format!("Low stock: {}", sku),
                message: format!("{} units left (minimum {})", stock, min_stock),
            }),
            Self::Product(ProductEvent::OutOfStock { sku, .. }) => Some(EventNotice {
                kind: "out_of_stock",
                title: format!("Out of stock: {}", sku),
                message: "Stock reached zero. Listings may need to be paused.".to_string(),
            }),
            Self::Listing(ListingEvent::SyncFailed { marketplace, error, .. }) => Some(EventNotice {
                kind: "sync_error",
                title: format!("{} sync failed", marketplace.display_name()),
                message: error.clone(),
            }),
            Self::PurchaseOrder(PurchaseOrderEvent::Received { total, .. }) => Some(EventNotice {
                kind: "purchase_order",
                title: "Purchase order received".to_string(),
                message: format!("Stock updated, order total {}", total),
            }),
            _ => None,
        }
    }
}
