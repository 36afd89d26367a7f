//! Example handlers wired into the binary's registry. Real deployments
//! register their own; these exist to give the process something to run
//! and to demonstrate the handler contract end to end.

use async_trait::async_trait;
use eventline_core::prelude::*;
use mongodb::{bson::doc, Database};
use tracing::info;

/// Persists `account.*` / `payment.*` events into the `accounts` collection.
pub struct AccountEventHandler;

#[async_trait]
impl EventHandler for AccountEventHandler {
    async fn handle(&self, db: &Database, event: &ParsedEvent) -> Result<()> {
        let ParsedEvent::Account(account) = event else {
            return Err(EngineError::Handler(
                "account handler invoked with a non-account event".to_string(),
            ));
        };

        db.collection::<mongodb::bson::Document>("accounts")
            .insert_one(doc! {
                "event_type": &account.event_type,
                "correlation_id": &account.correlation_id,
                "c_seq": account.c_seq,
                "payload": mongodb::bson::to_bson(&account.payload)
                    .map_err(|e| EngineError::Handler(e.to_string()))?,
            })
            .await
            .map_err(|e| EngineError::Handler(e.to_string()))?;

        info!(event_type = %account.event_type, correlation_id = %account.correlation_id, "account event persisted");
        Ok(())
    }
}

/// Persists `customer.*` / `application.*` events into the
/// `conversations` collection, keyed by conversation id.
pub struct CustomerEventHandler;

#[async_trait]
impl EventHandler for CustomerEventHandler {
    async fn handle(&self, db: &Database, event: &ParsedEvent) -> Result<()> {
        let ParsedEvent::Customer {
            event_type,
            conversation_id,
            sequence,
            payload,
        } = event
        else {
            return Err(EngineError::Handler(
                "customer handler invoked with a non-customer event".to_string(),
            ));
        };

        db.collection::<mongodb::bson::Document>("conversations")
            .insert_one(doc! {
                "event_type": event_type,
                "conversation_id": conversation_id,
                "sequence": sequence,
                "payload": mongodb::bson::to_bson(payload)
                    .map_err(|e| EngineError::Handler(e.to_string()))?,
            })
            .await
            .map_err(|e| EngineError::Handler(e.to_string()))?;

        info!(%event_type, %conversation_id, "customer event persisted");
        Ok(())
    }
}

/// Registers the demonstration handlers onto `registry`.
pub fn register_demo_handlers(registry: &mut HandlerRegistry) {
    registry.register("account.created", std::sync::Arc::new(AccountEventHandler));
    registry.register("account.closed", std::sync::Arc::new(AccountEventHandler));
    registry.register("payment.settled", std::sync::Arc::new(AccountEventHandler));
    registry.register("customer.updated", std::sync::Arc::new(CustomerEventHandler));
    registry.register("application.submitted", std::sync::Arc::new(CustomerEventHandler));
}
