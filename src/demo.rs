//! Demo store generator. The same seed always yields the same data.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::Ean13;
use crate::{Marketplace, Result};

pub const DEMO_DAYS: i64 = 30;

/// (name, category, cost in cents, markup percent)
const CATALOGUE: &[(&str, &str, i64, i64)] = &[
    ("Fone Bluetooth TWS Pro", "Eletrônicos", 4500, 120),
    ("Carregador Turbo USB-C 20W", "Eletrônicos", 1800, 150),
    ("Garrafa Térmica Inox 500ml", "Casa", 2900, 110),
    ("Camiseta Dry Fit Masculina", "Moda", 1500, 160),
    ("Tapete de Yoga Antiderrapante", "Esporte", 3800, 95),
    ("Luminária LED de Mesa", "Casa", 4200, 90),
    ("Mochila Notebook 15.6", "Acessórios", 5600, 100),
    ("Kit Pincéis de Maquiagem 12 peças", "Beleza", 2200, 140),
];

const SUPPLIERS: &[(&str, &str, i32)] = &[
    ("Distribuidora Paulista", "compras@paulista.com.br", 5),
    ("Importadora Sul", "vendas@importadorasul.com.br", 20),
    ("Atacado Central", "contato@atacadocentral.com.br", 10),
];

const LISTED_ON: [Marketplace; 3] = [Marketplace::MercadoLivre, Marketplace::Shopee, Marketplace::Amazon];

fn commission_percent(m: Marketplace) -> i64 {
    match m { Marketplace::MercadoLivre | Marketplace::Magalu => 16, Marketplace::Shopee => 14, Marketplace::Amazon => 15, Marketplace::Shopify => 0 }
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoSupplier { pub id: Uuid, pub name: String, pub email: String, pub lead_time_days: i32 }

#[derive(Debug, Clone, Serialize)]
pub struct DemoProduct {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub sku: String,
    pub name: String,
    pub category: String,
    pub ean: Ean13,
    pub cost_price: Decimal,
    pub sale_price: Decimal,
    pub stock: i32,
    pub min_stock: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoListing { pub id: Uuid, pub product_id: Uuid, pub marketplace: Marketplace, pub external_id: String, pub title: String, pub price: Decimal, pub stock: i32 }

#[derive(Debug, Clone, Serialize)]
pub struct DemoOrderItem { pub product_id: Uuid, pub sku: String, pub name: String, pub quantity: i32, pub unit_price: Decimal }

#[derive(Debug, Clone, Serialize)]
pub struct DemoOrder {
    pub id: Uuid,
    pub order_number: String,
    pub marketplace: Marketplace,
    pub external_order_id: String,
    pub status: OrderStatus,
    pub items: Vec<DemoOrderItem>,
    pub shipping_charged: Decimal,
    pub shipping_cost: Decimal,
    pub marketplace_fee: Decimal,
    pub ordered_at: DateTime<Utc>,
}

impl DemoOrder {
    pub fn subtotal(&self) -> Decimal { self.items.iter().map(|i| i.unit_price * Decimal::from(i.quantity)).sum() }
    pub fn total(&self) -> Decimal { self.subtotal() + self.shipping_charged }
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoExpense { pub id: Uuid, pub category: String, pub description: String, pub amount: Decimal, pub incurred_on: NaiveDate }

#[derive(Debug, Clone, Serialize)]
pub struct DemoData {
    pub suppliers: Vec<DemoSupplier>,
    pub products: Vec<DemoProduct>,
    pub listings: Vec<DemoListing>,
    pub orders: Vec<DemoOrder>,
    pub expenses: Vec<DemoExpense>,
}

fn uuid(rng: &mut StdRng) -> Uuid { uuid::Builder::from_random_bytes(rng.gen()).into_uuid() }

pub fn generate(seed: u64, now: DateTime<Utc>) -> DemoData {
    let mut rng = StdRng::seed_from_u64(seed);

    let suppliers: Vec<DemoSupplier> = SUPPLIERS.iter().map(|(name, email, lead)| DemoSupplier {
        id: uuid(&mut rng), name: name.to_string(), email: email.to_string(), lead_time_days: *lead,
    }).collect();

    let products: Vec<DemoProduct> = CATALOGUE.iter().enumerate().map(|(i, (name, category, cost, markup))| {
        let cost_price = Decimal::new(*cost, 2);
        let sale_price = (cost_price * Decimal::new(100 + markup, 2)).round_dp(0) - Decimal::new(10, 2);
        DemoProduct {
            id: uuid(&mut rng),
            supplier_id: suppliers[i % suppliers.len()].id,
            sku: format!("DEMO-{:03}", i + 1),
            name: name.to_string(),
            category: category.to_string(),
            ean: Ean13::generate_internal(&mut rng),
            cost_price,
            sale_price,
            stock: rng.gen_range(0..80),
            min_stock: 5,
        }
    }).collect();

    let mut listings = Vec::new();
    for p in &products {
        for m in LISTED_ON {
            if !rng.gen_bool(0.75) { continue; }
            let external_id = match m {
                Marketplace::MercadoLivre => format!("MLB{}", rng.gen_range(3_000_000_000u64..4_000_000_000)),
                Marketplace::Amazon => p.sku.clone(),
                _ => rng.gen_range(20_000_000_000u64..30_000_000_000).to_string(),
            };
            listings.push(DemoListing { id: uuid(&mut rng), product_id: p.id, marketplace: m, external_id, title: p.name.clone(), price: p.sale_price, stock: p.stock });
        }
    }

    let mut orders = Vec::new();
    for day in (0..DEMO_DAYS).rev() {
        if listings.is_empty() { break; }
        for _ in 0..rng.gen_range(0..5) {
            let listing = &listings[rng.gen_range(0..listings.len())];
            let Some(product) = products.iter().find(|p| p.id == listing.product_id) else { continue };
            let status = match rng.gen_range(0..20) {
                0 => OrderStatus::Cancelled,
                1 => OrderStatus::Returned,
                2..=4 if day < 3 => OrderStatus::Paid,
                2..=6 => OrderStatus::Shipped,
                _ => OrderStatus::Delivered,
            };
            let quantity = rng.gen_range(1..=3);
            let items = vec![DemoOrderItem { product_id: product.id, sku: product.sku.clone(), name: product.name.clone(), quantity, unit_price: listing.price }];
            let subtotal = listing.price * Decimal::from(quantity);
            let ordered_at = now - Duration::days(day) - Duration::minutes(rng.gen_range(0..1440));
            orders.push(DemoOrder {
                id: uuid(&mut rng),
                order_number: format!("UNI-{:06}", orders.len() + 1),
                marketplace: listing.marketplace,
                external_order_id: rng.gen_range(2_000_000_000u64..3_000_000_000).to_string(),
                status,
                items,
                shipping_charged: Decimal::ZERO,
                shipping_cost: Decimal::new(rng.gen_range(1200..2500), 2),
                marketplace_fee: (subtotal * Decimal::from(commission_percent(listing.marketplace)) / Decimal::ONE_HUNDRED).round_dp(2),
                ordered_at,
            });
        }
    }

    let today = now.date_naive();
    let expenses = vec![
        DemoExpense { id: uuid(&mut rng), category: "rent".into(), description: "Aluguel do galpão".into(), amount: Decimal::new(180000, 2), incurred_on: today - Duration::days(20) },
        DemoExpense { id: uuid(&mut rng), category: "software".into(), description: "ERP e emissor de notas".into(), amount: Decimal::new(14990, 2), incurred_on: today - Duration::days(15) },
        DemoExpense { id: uuid(&mut rng), category: crate::finance::AD_EXPENSE_CATEGORY.into(), description: "Mercado Ads".into(), amount: Decimal::new(rng.gen_range(30000..90000), 2), incurred_on: today - Duration::days(7) },
        DemoExpense { id: uuid(&mut rng), category: "packaging".into(), description: "Caixas e plástico bolha".into(), amount: Decimal::new(32050, 2), incurred_on: today - Duration::days(3) },
    ];

    DemoData { suppliers, products, listings, orders, expenses }
}

#[derive(Debug, Serialize)]
pub struct SeedSummary { pub suppliers: usize, pub products: usize, pub listings: usize, pub orders: usize, pub expenses: usize }

/// Inserts a generated store for the user in one transaction.
pub async fn seed(db: &PgPool, user_id: Uuid, seed: u64, now: DateTime<Utc>) -> Result<SeedSummary> {
    let data = generate(seed, now);
    let mut tx = db.begin().await?;

    for s in &data.suppliers {
        sqlx::query("INSERT INTO suppliers (id, user_id, name, email, lead_time_days, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, NOW(), NOW())")
            .bind(s.id).bind(user_id).bind(&s.name).bind(&s.email).bind(s.lead_time_days).execute(&mut *tx).await?;
    }
    for p in &data.products {
        sqlx::query("INSERT INTO products (id, user_id, supplier_id, sku, name, category, ean, cost_price, sale_price, stock, min_stock, status, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'active', NOW(), NOW())")
            .bind(p.id).bind(user_id).bind(p.supplier_id).bind(&p.sku).bind(&p.name).bind(&p.category).bind(p.ean.as_str())
            .bind(p.cost_price).bind(p.sale_price).bind(p.stock).bind(p.min_stock).execute(&mut *tx).await?;
    }
    for l in &data.listings {
        sqlx::query("INSERT INTO product_listings (id, user_id, product_id, marketplace, external_id, title, price, stock, status, sync_status, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', 'synced', NOW(), NOW())")
            .bind(l.id).bind(user_id).bind(l.product_id).bind(l.marketplace.as_str()).bind(&l.external_id).bind(&l.title).bind(l.price).bind(l.stock)
            .execute(&mut *tx).await?;
    }
    for o in &data.orders {
        sqlx::query("INSERT INTO orders (id, user_id, order_number, marketplace, external_order_id, status, subtotal, shipping_charged, shipping_cost, marketplace_fee, total, ordered_at, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $12)")
            .bind(o.id).bind(user_id).bind(&o.order_number).bind(o.marketplace.as_str()).bind(&o.external_order_id).bind(o.status.as_str())
            .bind(o.subtotal()).bind(o.shipping_charged).bind(o.shipping_cost).bind(o.marketplace_fee).bind(o.total()).bind(o.ordered_at)
            .execute(&mut *tx).await?;
        for i in &o.items {
            sqlx::query("INSERT INTO order_items (id, order_id, user_id, product_id, sku, name, quantity, unit_price, total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
                .bind(Uuid::now_v7()).bind(o.id).bind(user_id).bind(i.product_id).bind(&i.sku).bind(&i.name).bind(i.quantity).bind(i.unit_price)
                .bind(i.unit_price * Decimal::from(i.quantity)).execute(&mut *tx).await?;
        }
    }
    for e in &data.expenses {
        sqlx::query("INSERT INTO expenses (id, user_id, category, description, amount, incurred_on, created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW())")
            .bind(e.id).bind(user_id).bind(&e.category).bind(&e.description).bind(e.amount).bind(e.incurred_on).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    tracing::info!(%user_id, products = data.products.len(), orders = data.orders.len(), "seeded demo store");
    Ok(SeedSummary {
        suppliers: data.suppliers.len(), products: data.products.len(), listings: data.listings.len(),
        orders: data.orders.len(), expenses: data.expenses.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::validate_ean13;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() }

    #[test]
    fn test_same_seed_same_store() {
        let a = generate(42, now());
        let b = generate(42, now());
        assert_eq!(a.products.iter().map(|p| p.id).collect::<Vec<_>>(), b.products.iter().map(|p| p.id).collect::<Vec<_>>());
        assert_eq!(a.orders.len(), b.orders.len());
        assert_ne!(generate(43, now()).products[0].id, a.products[0].id);
    }

    #[test]
    fn test_products_are_valid() {
        let data = generate(7, now());
        assert_eq!(data.products.len(), CATALOGUE.len());
        for p in &data.products {
            assert!(validate_ean13(p.ean.as_str()));
            assert!(p.ean.as_str().starts_with("789"));
            assert!(p.cost_price < p.sale_price, "{} cost {} price {}", p.name, p.cost_price, p.sale_price);
            assert!(data.suppliers.iter().any(|s| s.id == p.supplier_id));
        }
    }

    #[test]
    fn test_orders_stay_in_window_and_reference_listings() {
        let data = generate(7, now());
        assert!(!data.listings.is_empty());
        for o in &data.orders {
            assert!(o.ordered_at <= now() && o.ordered_at > now() - Duration::days(DEMO_DAYS + 1));
            assert!(data.listings.iter().any(|l| l.product_id == o.items[0].product_id && l.marketplace == o.marketplace));
            assert!(o.total() > Decimal::ZERO);
        }
        assert!(data.expenses.iter().any(|e| e.category == crate::finance::AD_EXPENSE_CATEGORY));
    }
}
