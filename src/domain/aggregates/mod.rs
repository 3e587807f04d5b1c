//! Aggregates module
pub mod product;
pub mod order;
pub mod listing;
pub mod purchase_order;

pub use product::{Product, ProductError, ProductStatus};
pub use order::{Order, OrderError, OrderStatus, LineItem};
pub use listing::{ListingError, ListingStatus, ListingUpdate, ProductListing, SyncStatus};
pub use purchase_order::{PurchaseLine, PurchaseOrder, PurchaseOrderError, PurchaseOrderStatus};
