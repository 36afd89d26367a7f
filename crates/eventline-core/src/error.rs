//! Crate-wide error taxonomy.
//!
//! Every fault the engine can encounter is classified into one of the
//! variants below. The supervisor never inspects a raw `redis`/`mongodb`
//! error more than once: it wraps at the boundary, then dispatches purely
//! on [`EngineError::is_connection_class`] / [`EngineError::is_fatal_config`]
//! / [`EngineError::is_missing_group`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The full fault taxonomy for the consumer engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport disconnect, timeout, or OS-level socket error against the
    /// broker. Triggers Layer-2 reconnect with exponential backoff.
    #[error("broker connection error: {0}")]
    BrokerConnection(#[source] redis::RedisError),

    /// The broker reported "no such group" for a read. Triggers Layer-1
    /// recovery (re-ensure groups, replay backlog).
    #[error("broker reports missing consumer group: {0}")]
    MissingGroup(String),

    /// Any other broker response error (bad args, permissions, ...). Fatal;
    /// propagates out of the supervisor loop to Layer 4 / the caller.
    #[error("broker error: {0}")]
    BrokerOther(#[source] redis::RedisError),

    /// Bad URI / bad options for the document store. Fatal at connect time,
    /// never retried.
    #[error("document store configuration error: {0}")]
    StoreConfiguration(String),

    /// Transient document-store connectivity error at connect time. Retried
    /// with the same backoff policy as the broker.
    #[error("document store connection error: {0}")]
    StoreConnection(#[source] mongodb::error::Error),

    /// A handler or event parser raised. Caught by the dispatcher and
    /// routed to the retry/DLQ policy in `error.rs` §7.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The DLQ append itself failed with a connection-class error while
    /// quarantining a poison message.
    #[error("dlq append failed: {0}")]
    DlqAppend(#[source] redis::RedisError),

    /// Cooperative shutdown was requested.
    #[error("shutdown requested")]
    Cancelled,

    /// Anything that doesn't fit the above — logged with a 1s pause, loop
    /// continues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl EngineError {
    /// Transport-layer fault against the broker: disconnect, timeout, or
    /// socket error. Classified once here, never re-derived from the
    /// wrapped driver error downstream.
    pub fn is_connection_class(&self) -> bool {
        match self {
            EngineError::BrokerConnection(_) => true,
            EngineError::BrokerOther(e) => is_redis_connection_error(e),
            _ => false,
        }
    }

    /// The broker reported a missing consumer group (`NOGROUP`).
    pub fn is_missing_group(&self) -> bool {
        matches!(self, EngineError::MissingGroup(_))
    }

    /// A fatal, non-retryable configuration error (bad Mongo URI/options).
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, EngineError::StoreConfiguration(_))
    }

    /// True for the document-store connectivity errors that should be
    /// retried with backoff rather than treated as fatal.
    pub fn is_store_transient(&self) -> bool {
        matches!(self, EngineError::StoreConnection(_))
    }

    /// Cooperative cancellation, propagated cleanly (Layer 3).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// The generic catch-all: logged with a 1s pause, loop continues
    /// (Layer 4). Every other variant — including [`EngineError::BrokerOther`]
    /// — is fatal and must propagate out of the supervisor loop instead.
    pub fn is_other(&self) -> bool {
        matches!(self, EngineError::Other(_))
    }

    /// Classify a raw `redis::RedisError` returned from a broker call,
    /// distinguishing `NOGROUP` from transport faults from everything else.
    pub fn from_redis(err: redis::RedisError) -> Self {
        let msg = err.to_string();
        if msg.contains("NOGROUP") {
            EngineError::MissingGroup(msg)
        } else if is_redis_connection_error(&err) {
            EngineError::BrokerConnection(err)
        } else {
            EngineError::BrokerOther(err)
        }
    }

    /// Classify a raw `mongodb::error::Error` returned from a connect
    /// attempt into the fatal-configuration vs transient-connectivity
    /// split required by the start sequence.
    pub fn from_mongo_connect(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::InvalidArgument { .. } | ErrorKind::InvalidTlsConfig { .. } => {
                EngineError::StoreConfiguration(err.to_string())
            }
            ErrorKind::Authentication { .. } => EngineError::StoreConfiguration(err.to_string()),
            _ => EngineError::StoreConnection(err),
        }
    }
}

fn is_redis_connection_error(err: &redis::RedisError) -> bool {
    use redis::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::IoError | ErrorKind::ClusterConnectionNotFound
    ) || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_group_is_not_connection_class() {
        let err = EngineError::MissingGroup("NOGROUP no such key".into());
        assert!(err.is_missing_group());
        assert!(!err.is_connection_class());
        assert!(!err.is_fatal_config());
    }

    #[test]
    fn cancelled_is_cancelled_only() {
        let err = EngineError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_connection_class());
        assert!(!err.is_fatal_config());
    }

    #[test]
    fn store_configuration_is_fatal() {
        let err = EngineError::StoreConfiguration("bad uri".into());
        assert!(err.is_fatal_config());
        assert!(!err.is_connection_class());
    }

    #[test]
    fn broker_other_is_fatal_not_catch_all() {
        let err = EngineError::BrokerOther(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "WRONGTYPE",
        )));
        assert!(!err.is_other());
        assert!(!err.is_connection_class());
        assert!(!err.is_missing_group());
    }

    #[test]
    fn other_is_the_catch_all() {
        let err = EngineError::Other("unexpected".into());
        assert!(err.is_other());
        assert!(!err.is_connection_class());
        assert!(!err.is_missing_group());
    }
}
