//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use crate::domain::value_objects::{Ean13, Money, Quantity, Sku};
use crate::domain::events::{DomainEvent, ProductEvent};

#[derive(Clone, Debug)]
pub struct Product {
    id: Uuid,
    sku: Sku,
    name: String,
    ean: Option<Ean13>,
    cost_price: Money,
    sale_price: Money,
    stock: Quantity,
    min_stock: u32,
    status: ProductStatus,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)] pub enum ProductStatus { #[default] Active, Inactive }

impl ProductStatus {
    pub fn parse(s: &str) -> Self { if s == "inactive" { Self::Inactive } else { Self::Active } }
    pub fn as_str(&self) -> &'static str { match self { Self::Active => "active", Self::Inactive => "inactive" } }
}

impl Product {
    /// Rebuilds the aggregate from persisted state.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(id: Uuid, sku: Sku, name: impl Into<String>, ean: Option<Ean13>, cost_price: Money, sale_price: Money, stock: u32, min_stock: u32, status: ProductStatus) -> Self {
        Self {
            id, sku, name: name.into(), ean, cost_price, sale_price, stock: Quantity::new(stock),
            min_stock, status, updated_at: Utc::now(), events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn ean(&self) -> Option<&Ean13> { self.ean.as_ref() }
    pub fn sale_price(&self) -> &Money { &self.sale_price }
    pub fn cost_price(&self) -> &Money { &self.cost_price }
    pub fn stock(&self) -> u32 { self.stock.value() }
    pub fn min_stock(&self) -> u32 { self.min_stock }
    pub fn status(&self) -> ProductStatus { self.status }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_low_stock(&self) -> bool { self.stock.value() <= self.min_stock }

    pub fn unit_margin(&self) -> Decimal { self.sale_price.minus(self.cost_price).amount() }

    /// Margin as a percentage of the sale price; zero when the product is free.
    pub fn margin_percent(&self) -> Decimal {
        if self.sale_price.amount().is_zero() { return Decimal::ZERO; }
        (self.unit_margin() / self.sale_price.amount() * Decimal::ONE_HUNDRED).round_dp(2)
    }

    pub fn adjust_stock(&mut self, delta: i64, reason: impl Into<String>) -> Result<(), ProductError> {
        let before = self.stock;
        let magnitude = u32::try_from(delta.unsigned_abs());
        self.stock = if delta >= 0 {
            magnitude.ok().and_then(|m| self.stock.checked_add(m)).ok_or(ProductError::StockOverflow)?
        } else {
            magnitude.ok().and_then(|m| self.stock.checked_sub(m)).ok_or(ProductError::InsufficientStock)?
        };
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::StockAdjusted {
            product_id: self.id, sku: self.sku.clone(), delta, stock: self.stock.value(), reason: reason.into(),
        }));
        if self.stock.is_zero() && !before.is_zero() {
            self.raise_event(DomainEvent::Product(ProductEvent::OutOfStock { product_id: self.id, sku: self.sku.clone() }));
        } else if self.is_low_stock() && before.value() > self.min_stock {
            self.raise_event(DomainEvent::Product(ProductEvent::LowStock {
                product_id: self.id, sku: self.sku.clone(), stock: self.stock.value(), min_stock: self.min_stock,
            }));
        }
        Ok(())
    }

    pub fn change_price(&mut self, new_price: Money) -> Result<(), ProductError> {
        if new_price.is_negative() { return Err(ProductError::NegativePrice); }
        let old = self.sale_price.amount();
        self.sale_price = new_price;
        self.touch();
        if old != self.sale_price.amount() {
            self.raise_event(DomainEvent::Product(ProductEvent::PriceChanged { product_id: self.id, old_price: old, new_price: self.sale_price.amount() }));
        }
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { InsufficientStock, StockOverflow, NegativePrice }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientStock => write!(f, "Insufficient stock"),
            Self::StockOverflow => write!(f, "Stock would exceed {} units", crate::domain::value_objects::MAX_STOCK),
            Self::NegativePrice => write!(f, "Price cannot be negative"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: u32, min_stock: u32) -> Product {
        Product::restore(Uuid::new_v4(), Sku::new("TEST-001").unwrap(), "Fone Bluetooth", None,
            Money::brl(Decimal::new(40, 0)), Money::brl(Decimal::new(100, 0)), stock, min_stock, ProductStatus::Active)
    }

    #[test]
    fn test_stock_adjustment() {
        let mut p = product(10, 2);
        p.adjust_stock(5, "purchase").unwrap();
        assert_eq!(p.stock(), 15);
        p.adjust_stock(-15, "sale").unwrap();
        assert_eq!(p.stock(), 0);
        assert_eq!(p.adjust_stock(-1, "sale"), Err(ProductError::InsufficientStock));
    }

    #[test]
    fn test_stock_cannot_pass_column_range() {
        let mut p = product(crate::domain::value_objects::MAX_STOCK - 5, 0);
        assert_eq!(p.adjust_stock(6, "inventory"), Err(ProductError::StockOverflow));
        assert_eq!(p.adjust_stock(i64::MAX, "inventory"), Err(ProductError::StockOverflow));
        assert_eq!(p.adjust_stock(i64::MIN, "inventory"), Err(ProductError::InsufficientStock));
        p.adjust_stock(5, "inventory").unwrap();
        assert_eq!(p.stock(), crate::domain::value_objects::MAX_STOCK);
    }

    #[test]
    fn test_low_stock_raised_once_when_crossing() {
        let mut p = product(10, 5);
        p.adjust_stock(-4, "sale").unwrap();
        assert!(!p.take_events().iter().any(|e| matches!(e, DomainEvent::Product(ProductEvent::LowStock { .. }))));
        p.adjust_stock(-2, "sale").unwrap();
        assert!(p.take_events().iter().any(|e| matches!(e, DomainEvent::Product(ProductEvent::LowStock { stock: 4, .. }))));
        p.adjust_stock(-1, "sale").unwrap();
        assert!(!p.take_events().iter().any(|e| matches!(e, DomainEvent::Product(ProductEvent::LowStock { .. }))));
    }

    #[test]
    fn test_out_of_stock_event() {
        let mut p = product(3, 1);
        p.adjust_stock(-3, "sale").unwrap();
        let events = p.take_events();
        assert!(events.iter().any(|e| matches!(e, DomainEvent::Product(ProductEvent::OutOfStock { .. }))));
    }

    #[test]
    fn test_margin_and_price_change() {
        let mut p = product(1, 0);
        assert_eq!(p.unit_margin(), Decimal::new(60, 0));
        assert_eq!(p.margin_percent(), Decimal::new(60, 0));
        assert_eq!(p.change_price(Money::brl(Decimal::new(-1, 0))), Err(ProductError::NegativePrice));
        p.change_price(Money::brl(Decimal::new(80, 0))).unwrap();
        assert_eq!(p.margin_percent(), Decimal::new(50, 0));
        assert_eq!(p.take_events().len(), 1);
    }
}
