//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;
use crate::Marketplace;

#[derive(Clone, Debug)]
pub struct Order {
    id: Uuid,
    marketplace: Option<Marketplace>,
    external_id: Option<String>,
    status: OrderStatus,
    items: Vec<LineItem>,
    shipping_charged: Decimal,
    shipping_cost: Decimal,
    marketplace_fee: Decimal,
    tracking_code: Option<String>,
    carrier: Option<String>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem { pub product_id: Uuid, pub sku: String, pub quantity: u32, pub unit_price: Decimal }

impl LineItem {
    pub fn line_total(&self) -> Money { Money::brl(self.unit_price).times(self.quantity) }
    pub fn total(&self) -> Decimal { self.line_total().amount() }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Paid, Shipped, Delivered, Cancelled, Returned }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Paid => "paid", Self::Shipped => "shipped",
            Self::Delivered => "delivered", Self::Cancelled => "cancelled", Self::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending, "paid" => Self::Paid, "shipped" => Self::Shipped,
            "delivered" => Self::Delivered, "cancelled" => Self::Cancelled, "returned" => Self::Returned,
            _ => return None,
        })
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!((self, next),
            (Pending, Paid) | (Paid, Shipped) | (Shipped, Delivered)
            | (Pending, Cancelled) | (Paid, Cancelled)
            | (Shipped, Returned) | (Delivered, Returned))
    }

    /// Cancelled and returned orders do not count as revenue.
    pub fn counts_as_sale(&self) -> bool { !matches!(self, Self::Cancelled | Self::Returned) }
}

impl Order {
    pub fn create(marketplace: Option<Marketplace>, external_id: Option<String>) -> Self {
        Self::restore(Uuid::now_v7(), marketplace, external_id, OrderStatus::Pending, vec![])
    }

    pub fn restore(id: Uuid, marketplace: Option<Marketplace>, external_id: Option<String>, status: OrderStatus, items: Vec<LineItem>) -> Self {
        Self {
            id, marketplace, external_id, status, items,
            shipping_charged: Decimal::ZERO, shipping_cost: Decimal::ZERO, marketplace_fee: Decimal::ZERO,
            tracking_code: None, carrier: None, updated_at: Utc::now(), events: vec![],
        }
    }

    pub fn with_charges(mut self, shipping_charged: Decimal, shipping_cost: Decimal, marketplace_fee: Decimal) -> Self {
        self.shipping_charged = shipping_charged;
        self.shipping_cost = shipping_cost;
        self.marketplace_fee = marketplace_fee;
        self
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn marketplace(&self) -> Option<Marketplace> { self.marketplace }
    pub fn external_id(&self) -> Option<&str> { self.external_id.as_deref() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn tracking_code(&self) -> Option<&str> { self.tracking_code.as_deref() }
    pub fn carrier(&self) -> Option<&str> { self.carrier.as_deref() }

    pub fn add_item(&mut self, item: LineItem) -> Result<(), OrderError> {
        if item.quantity == 0 { return Err(OrderError::InvalidQuantity); }
        if self.status != OrderStatus::Pending { return Err(OrderError::InvalidTransition(self.status, self.status)); }
        self.items.push(item);
        self.touch();
        Ok(())
    }

    fn subtotal_money(&self) -> Money { self.items.iter().map(LineItem::line_total).sum() }
    pub fn subtotal(&self) -> Decimal { self.subtotal_money().amount() }
    pub fn total(&self) -> Decimal { self.subtotal_money().plus(Money::brl(self.shipping_charged)).amount() }
    /// What the seller keeps after marketplace fee and shipping.
    pub fn net(&self) -> Decimal {
        Money::brl(self.total()).minus(Money::brl(self.marketplace_fee)).minus(Money::brl(self.shipping_cost)).amount()
    }

    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) { return Err(OrderError::InvalidTransition(self.status, next)); }
        self.status = next;
        self.touch();
        let event = match next {
            OrderStatus::Paid => Some(OrderEvent::Paid { order_id: self.id }),
            OrderStatus::Delivered => Some(OrderEvent::Delivered { order_id: self.id }),
            OrderStatus::Returned => Some(OrderEvent::Returned { order_id: self.id }),
            OrderStatus::Cancelled => Some(OrderEvent::Cancelled {
                order_id: self.id,
                restock: self.items.iter().map(|i| (i.product_id, i.quantity)).collect(),
            }),
            OrderStatus::Shipped => Some(OrderEvent::Shipped { order_id: self.id, tracking_code: self.tracking_code.clone().unwrap_or_default(), carrier: self.carrier.clone() }),
            OrderStatus::Pending => None,
        };
        if let Some(e) = event { self.raise_event(DomainEvent::Order(e)); }
        Ok(())
    }

    pub fn ship(&mut self, tracking_code: impl Into<String>, carrier: Option<String>) -> Result<(), OrderError> {
        let tracking_code = tracking_code.into();
        if tracking_code.trim().is_empty() { return Err(OrderError::MissingTracking); }
        if self.status != OrderStatus::Paid { return Err(OrderError::InvalidTransition(self.status, OrderStatus::Shipped)); }
        self.tracking_code = Some(tracking_code);
        self.carrier = carrier;
        self.transition(OrderStatus::Shipped)
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> { self.transition(OrderStatus::Cancelled) }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { InvalidQuantity, InvalidTransition(OrderStatus, OrderStatus), MissingTracking }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuantity => write!(f, "Quantity must be positive"),
            Self::InvalidTransition(from, to) => write!(f, "Cannot move order from {} to {}", from.as_str(), to.as_str()),
            Self::MissingTracking => write!(f, "Tracking code is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: u32, price: i64) -> LineItem {
        LineItem { product_id: Uuid::new_v4(), sku: "W001".into(), quantity: qty, unit_price: Decimal::new(price, 0) }
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::create(Some(Marketplace::MercadoLivre), Some("2000001".into()));
        order.add_item(item(2, 10)).unwrap();
        order.transition(OrderStatus::Paid).unwrap();
        order.ship("BR123456789", Some("Correios".into())).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.tracking_code(), Some("BR123456789"));
        order.transition(OrderStatus::Delivered).unwrap();
        assert_eq!(order.take_events().len(), 3);
    }

    #[test]
    fn test_totals() {
        let mut order = Order::create(None, None).with_charges(Decimal::new(15, 0), Decimal::new(20, 0), Decimal::new(12, 0));
        order.add_item(item(2, 50)).unwrap();
        order.add_item(item(1, 30)).unwrap();
        assert_eq!(order.subtotal(), Decimal::new(130, 0));
        assert_eq!(order.total(), Decimal::new(145, 0));
        assert_eq!(order.net(), Decimal::new(113, 0));
    }

    #[test]
    fn test_totals_saturate_on_extreme_prices() {
        let mut order = Order::create(None, None);
        order.add_item(LineItem { product_id: Uuid::new_v4(), sku: "W001".into(), quantity: 3, unit_price: Decimal::MAX }).unwrap();
        assert_eq!(order.subtotal(), Decimal::MAX);
        assert_eq!(order.total(), Decimal::MAX);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut order = Order::create(None, None);
        order.add_item(item(1, 10)).unwrap();
        assert_eq!(order.ship("X", None), Err(OrderError::InvalidTransition(OrderStatus::Pending, OrderStatus::Shipped)));
        order.transition(OrderStatus::Paid).unwrap();
        assert_eq!(order.ship("  ", None), Err(OrderError::MissingTracking));
        order.ship("BR1", None).unwrap();
        assert!(order.cancel().is_err());
        order.transition(OrderStatus::Returned).unwrap();
        assert!(!order.status().counts_as_sale());
    }

    #[test]
    fn test_cancel_carries_restock_lines() {
        let mut order = Order::create(None, None);
        let line = item(3, 10);
        let product_id = line.product_id;
        order.add_item(line).unwrap();
        order.cancel().unwrap();
        let events = order.take_events();
        match &events[0] {
            DomainEvent::Order(OrderEvent::Cancelled { restock, .. }) => assert_eq!(restock, &vec![(product_id, 3)]),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
