//! # eventline-core
//!
//! A transactional stream-consumer engine: pulls events off Redis Streams
//! (consumer-group semantics), dispatches each to a registered handler that
//! writes into MongoDB, and enforces at-least-once delivery with idempotent
//! deduplication and a dead-letter path for poison messages.
//!
//! The hard part is the failure-recovery and acknowledgement protocol: an
//! event is acknowledged to the broker only after its side effect is
//! durably committed. See [`application::supervisor`] for the reconnection
//! state machine and [`application::dispatcher`] for the per-message
//! dispatch algorithm.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use eventline_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> eventline_core::Result<()> {
//!     let config = Config::from_env();
//!     let mut registry = HandlerRegistry::new();
//!     // registry.register("account.created", Arc::new(MyHandler));
//!     let _ = (config, registry);
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

/// Process configuration loaded from the environment.
pub mod config;
/// Domain types: the envelope sanitizer, parsed-event variants, and the
/// handler registry.
pub mod domain;
/// Crate-wide error taxonomy.
pub mod error;
/// Health-check infrastructure (dependency probes + HTTP server).
pub mod health;
/// Graceful shutdown primitives.
pub mod shutdown;

/// The delivery-protocol dispatcher and the reconnection supervisor.
pub mod application;
/// Collaborators for the broker, document store, dedup gate, and health
/// reporting.
pub mod infrastructure;

pub use error::{EngineError, Result};

/// Convenient re-exports for constructing and running the engine.
pub mod prelude {
    pub use crate::application::{
        dispatcher::Dispatcher,
        supervisor::{Supervisor, SupervisorConfig},
    };
    pub use crate::config::Config;
    pub use crate::domain::{
        envelope::{sanitize_envelope, Envelope},
        events::ParsedEvent,
        handlers::{EventHandler, HandlerRegistry},
    };
    pub use crate::error::{EngineError, Result};
    pub use crate::infrastructure::{
        broker::{Message, RedisBroker},
        dedup::{DedupGate, RedisDedupGate},
        health::{MongoDependency, RedisDependency},
        store::DocumentStore,
    };
    pub use crate::shutdown::{GracefulShutdown, ShutdownToken};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_eventline_core_exists() {
        // This test verifies the crate compiles.
    }
}
