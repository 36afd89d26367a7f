//! The delivery protocol (per-message dispatch) and the reconnection
//! supervisor (process-level start sequence + steady-state fault handling)
//! that drives it.

/// Per-message dispatch algorithm: decode, dedup-check, sanitize, parse,
/// handle, mark, ack.
pub mod dispatcher;
/// The four-layer reconnection state machine and process start sequence.
pub mod supervisor;
