//! Delivery of domain events: notification rows for the seller and NATS messages for other services.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::events::{DomainEvent, EventNotice};

pub const SUBJECT_PREFIX: &str = "unistock.events";

#[derive(Serialize)]
struct Envelope<'a> {
    user_id: Uuid,
    #[serde(flatten)]
    event: &'a DomainEvent,
}

pub fn subject_for(event: &DomainEvent) -> String { format!("{}.{}", SUBJECT_PREFIX, event.subject()) }

/// Publishes events to NATS when a connection is configured; otherwise a no-op.
#[derive(Clone, Default)]
pub struct EventPublisher { nats: Option<async_nats::Client> }

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub fn is_enabled(&self) -> bool { self.nats.is_some() }

    pub async fn publish(&self, user_id: Uuid, events: &[DomainEvent]) {
        let Some(nats) = &self.nats else { return };
        for event in events {
            let payload = match serde_json::to_vec(&Envelope { user_id, event }) {
                Ok(p) => p,
                Err(e) => { tracing::warn!(error = %e, "failed to encode event"); continue; }
            };
            if let Err(e) = nats.publish(subject_for(event), payload.into()).await {
                tracing::warn!(error = %e, subject = event.subject(), "failed to publish event");
            }
        }
    }
}

pub async fn insert_notification(db: &PgPool, user_id: Uuid, notice: &EventNotice) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO notifications (id, user_id, kind, title, message, read, created_at) VALUES ($1, $2, $3, $4, $5, false, NOW())")
        .bind(Uuid::now_v7()).bind(user_id).bind(notice.kind).bind(&notice.title).bind(&notice.message)
        .execute(db).await?;
    Ok(())
}

/// Stores a notification for every user-facing event, then publishes all of them.
pub async fn dispatch(db: &PgPool, publisher: &EventPublisher, user_id: Uuid, events: Vec<DomainEvent>) -> Result<(), sqlx::Error> {
    if events.is_empty() { return Ok(()); }
    for notice in events.iter().filter_map(DomainEvent::notification) {
        insert_notification(db, user_id, &notice).await?;
    }
    publisher.publish(user_id, &events).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{ListingEvent, OrderEvent};
    use crate::Marketplace;

    #[test]
    fn test_subject_and_envelope() {
        let e = DomainEvent::Order(OrderEvent::Shipped { order_id: Uuid::nil(), tracking_code: "BR123".into(), carrier: None });
        assert_eq!(subject_for(&e), "unistock.events.order.shipped");
        let json = serde_json::to_value(Envelope { user_id: Uuid::nil(), event: &e }).unwrap();
        assert_eq!(json["aggregate"], "order");
        assert_eq!(json["event"]["tracking_code"], "BR123");
        assert_eq!(json["user_id"], Uuid::nil().to_string());
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_a_no_op() {
        let publisher = EventPublisher::default();
        assert!(!publisher.is_enabled());
        let e = DomainEvent::Listing(ListingEvent::Synced { listing_id: Uuid::nil(), marketplace: Marketplace::Amazon });
        publisher.publish(Uuid::nil(), &[e]).await;
    }
}
