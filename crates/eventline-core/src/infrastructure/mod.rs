//! Collaborators the application layer drives: the broker, the document
//! store, the dedup gate, and the health probes wired on top of them.

/// Redis Streams broker client (consumer groups, pending-entry claim,
/// acknowledgement, DLQ transfer).
pub mod broker;
/// Idempotency gate backed by short-lived Redis keys.
pub mod dedup;
/// Health-check [`crate::health::Dependency`] implementations for the
/// broker and document store.
pub mod health;
/// MongoDB document-store handle.
pub mod store;
