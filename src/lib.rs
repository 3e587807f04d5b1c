//! UNISTOCK
//!
//! Multi-tenant inventory and order management for sellers on Brazilian
//! marketplaces.
//!
//! ## Features
//! - Product, supplier, purchase order and expense management
//! - Orders from Mercado Livre, Shopee, Amazon, Shopify and Magalu
//! - Listing sync (price, stock, title, status) through marketplace APIs
//! - Competitor pricing, stock forecasts and AI insights
//! - Profit calculators, automation rules and scheduled email reports

pub mod api;
pub mod auth;
pub mod automation;
pub mod config;
pub mod demo;
pub mod domain;
pub mod events;
pub mod finance;
pub mod forecast;
pub mod insights;
pub mod llm;
pub mod marketplaces;
pub mod pricing;
pub mod reports;
pub mod sync;

use thiserror::Error;

pub use marketplaces::Marketplace;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum UnistockError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Sync(#[from] marketplaces::SyncError),
}

impl From<domain::aggregates::ProductError> for UnistockError {
    fn from(e: domain::aggregates::ProductError) -> Self { Self::InvalidState(e.to_string()) }
}

impl From<domain::aggregates::OrderError> for UnistockError {
    fn from(e: domain::aggregates::OrderError) -> Self { Self::InvalidState(e.to_string()) }
}

impl From<domain::aggregates::ListingError> for UnistockError {
    fn from(e: domain::aggregates::ListingError) -> Self { Self::Validation(e.to_string()) }
}

impl From<domain::aggregates::PurchaseOrderError> for UnistockError {
    fn from(e: domain::aggregates::PurchaseOrderError) -> Self { Self::InvalidState(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, UnistockError>;
