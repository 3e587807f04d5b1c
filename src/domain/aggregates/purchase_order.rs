//! Purchase Order Aggregate

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::events::{DomainEvent, PurchaseOrderEvent};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug)]
pub struct PurchaseOrder {
    id: Uuid,
    supplier_id: Uuid,
    status: PurchaseOrderStatus,
    lines: Vec<PurchaseLine>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseLine { pub product_id: Uuid, pub quantity: u32, pub unit_cost: Decimal }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus { #[default] Draft, Sent, Received, Cancelled }

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "draft", Self::Sent => "sent", Self::Received => "received", Self::Cancelled => "cancelled" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "draft" => Some(Self::Draft), "sent" => Some(Self::Sent), "received" => Some(Self::Received), "cancelled" => Some(Self::Cancelled), _ => None }
    }
}

impl PurchaseOrder {
    pub fn restore(id: Uuid, supplier_id: Uuid, status: PurchaseOrderStatus, lines: Vec<PurchaseLine>) -> Self {
        Self { id, supplier_id, status, lines, events: vec![] }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn supplier_id(&self) -> Uuid { self.supplier_id }
    pub fn status(&self) -> PurchaseOrderStatus { self.status }
    pub fn lines(&self) -> &[PurchaseLine] { &self.lines }
    pub fn total(&self) -> Decimal { self.lines.iter().map(|l| Money::brl(l.unit_cost).times(l.quantity)).sum::<Money>().amount() }

    pub fn send(&mut self) -> Result<(), PurchaseOrderError> {
        if self.status != PurchaseOrderStatus::Draft { return Err(PurchaseOrderError::InvalidStatus(self.status)); }
        if self.lines.is_empty() { return Err(PurchaseOrderError::NoLines); }
        self.status = PurchaseOrderStatus::Sent;
        Ok(())
    }

    /// Marks the order received and returns the stock to add per product.
    pub fn receive(&mut self) -> Result<Vec<(Uuid, u32)>, PurchaseOrderError> {
        if !matches!(self.status, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent) { return Err(PurchaseOrderError::InvalidStatus(self.status)); }
        if self.lines.is_empty() { return Err(PurchaseOrderError::NoLines); }
        self.status = PurchaseOrderStatus::Received;
        let mut increments: Vec<(Uuid, u32)> = Vec::new();
        for line in &self.lines {
            match increments.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, qty)) => *qty = qty.saturating_add(line.quantity),
                None => increments.push((line.product_id, line.quantity)),
            }
        }
        self.events.push(DomainEvent::PurchaseOrder(PurchaseOrderEvent::Received { purchase_order_id: self.id, total: self.total() }));
        Ok(increments)
    }

    pub fn cancel(&mut self) -> Result<(), PurchaseOrderError> {
        if !matches!(self.status, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent) { return Err(PurchaseOrderError::InvalidStatus(self.status)); }
        self.status = PurchaseOrderStatus::Cancelled;
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PurchaseOrderError { NoLines, InvalidStatus(PurchaseOrderStatus) }
impl std::error::Error for PurchaseOrderError {}
impl std::fmt::Display for PurchaseOrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLines => write!(f, "Purchase order has no lines"),
            Self::InvalidStatus(s) => write!(f, "Purchase order is {}", s.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_merges_lines_per_product() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut po = PurchaseOrder::restore(Uuid::new_v4(), Uuid::new_v4(), PurchaseOrderStatus::Draft, vec![
            PurchaseLine { product_id: a, quantity: 10, unit_cost: Decimal::new(5, 0) },
            PurchaseLine { product_id: b, quantity: 2, unit_cost: Decimal::new(20, 0) },
            PurchaseLine { product_id: a, quantity: 5, unit_cost: Decimal::new(5, 0) },
        ]);
        assert_eq!(po.total(), Decimal::new(115, 0));
        po.send().unwrap();
        let increments = po.receive().unwrap();
        assert_eq!(increments, vec![(a, 15), (b, 2)]);
        assert_eq!(po.take_events().len(), 1);
        assert_eq!(po.receive(), Err(PurchaseOrderError::InvalidStatus(PurchaseOrderStatus::Received)));
        assert!(po.cancel().is_err());
    }

    #[test]
    fn test_empty_order_cannot_be_sent() {
        let mut po = PurchaseOrder::restore(Uuid::new_v4(), Uuid::new_v4(), PurchaseOrderStatus::Draft, vec![]);
        assert_eq!(po.send(), Err(PurchaseOrderError::NoLines));
        po.cancel().unwrap();
        assert_eq!(po.status(), PurchaseOrderStatus::Cancelled);
    }
}
