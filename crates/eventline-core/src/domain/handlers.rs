//! The handler registry + dispatcher collaborator: maps event-type
//! strings to handler objects, by exact string match. Registration
//! happens only before `Supervisor::run` is called; after startup the
//! registry is read-only.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use mongodb::Database;

use super::events::ParsedEvent;
use crate::error::Result;

/// A handler for one event type. Invoked with a document-store handle and
/// the parsed event; signature is uniform across all event families.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one parsed event, persisting whatever side effect it
    /// implies into `db`. The dispatcher awaits this before marking the
    /// dedup key or acking.
    async fn handle(&self, db: &Database, event: &ParsedEvent) -> Result<()>;
}

/// Event-type → handler mapping. Last registration for a given type wins.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. Last registration for a given
    /// type wins.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Look up the handler for `event_type` by exact string match. Prefix
    /// matching is never used here — that's the parser-selection step's
    /// job, not handler lookup.
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _db: &Database, _event: &ParsedEvent) -> Result<()> {
            Ok(())
        }
    }

    struct OtherHandler;

    #[async_trait]
    impl EventHandler for OtherHandler {
        async fn handle(&self, _db: &Database, _event: &ParsedEvent) -> Result<()> {
            Err(crate::error::EngineError::Handler("boom".into()))
        }
    }

    #[test]
    fn register_then_lookup_returns_the_same_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("account.created", Arc::new(NoopHandler));
        assert!(registry.get("account.created").is_some());
        assert!(registry.get("account.other").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register("account.created", Arc::new(NoopHandler));
        registry.register("account.created", Arc::new(OtherHandler));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn prefix_is_never_used_for_handler_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("account.created", Arc::new(NoopHandler));
        assert!(registry.get("account.").is_none());
        assert!(registry.get("account").is_none());
    }
}
