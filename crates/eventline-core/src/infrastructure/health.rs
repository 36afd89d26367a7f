//! Dependency health probes for the broker and document store, plugged
//! into the generic [`crate::health`] reporting infrastructure.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::Mutex;

use super::{broker::RedisBroker, store::DocumentStore};
use crate::health::{Dependency, DependencyStatus};

/// Reports Redis broker connectivity via `PING`.
pub struct RedisDependency {
    broker: Arc<Mutex<RedisBroker>>,
}

impl RedisDependency {
    /// Wrap a shared broker handle.
    pub fn new(broker: Arc<Mutex<RedisBroker>>) -> Self {
        Self { broker }
    }
}

impl Dependency for RedisDependency {
    fn name(&self) -> &str {
        "redis"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = DependencyStatus> + Send + '_>> {
        Box::pin(async move {
            match self.broker.lock().await.ping().await {
                Ok(()) => DependencyStatus::Healthy,
                Err(e) => DependencyStatus::Unhealthy(e.to_string()),
            }
        })
    }
}

/// Reports MongoDB document-store connectivity via `{ping: 1}`.
pub struct MongoDependency {
    store: Arc<DocumentStore>,
}

impl MongoDependency {
    /// Wrap a shared document-store handle.
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

impl Dependency for MongoDependency {
    fn name(&self) -> &str {
        "mongodb"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = DependencyStatus> + Send + '_>> {
        Box::pin(async move {
            match self.store.ping().await {
                Ok(()) => DependencyStatus::Healthy,
                Err(e) => DependencyStatus::Unhealthy(e.to_string()),
            }
        })
    }
}
