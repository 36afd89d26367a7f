//! The reconnection supervisor (§4.4): owns the broker and document-store
//! clients exclusively, runs the start sequence once, then drives the
//! steady-state loop through its fault layers until cancelled.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::application::dispatcher::Dispatcher;
use crate::config::Config;
use crate::domain::handlers::HandlerRegistry;
use crate::error::{EngineError, Result};
use crate::infrastructure::broker::RedisBroker;
use crate::infrastructure::dedup::RedisDedupGate;
use crate::infrastructure::store::DocumentStore;
use crate::shutdown::ShutdownToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Everything the supervisor needs to connect and run, derived from the
/// process-wide [`Config`] plus a process-unique consumer identity.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Broker connection URL.
    pub redis_url: String,
    /// Document-store connection URI.
    pub database_uri: String,
    /// Document-store database name.
    pub db_name: String,
    /// Primary inbox stream.
    pub inbox_stream: String,
    /// Internal/secondary stream.
    pub internal_stream: String,
    /// Dead-letter stream.
    pub dlq_stream: String,
    /// Shared consumer group name.
    pub consumer_group: String,
    /// This process's consumer identity within the group.
    pub consumer_name: String,
    /// Entries requested per read/claim batch.
    pub batch_size: usize,
    /// Blocking read timeout, milliseconds.
    pub block_timeout_ms: u64,
    /// Dedup marker TTL, seconds.
    pub dedup_ttl_seconds: u64,
    /// Delivery count at which a poison message is quarantined.
    pub max_retries: u64,
    /// Broker socket-connect timeout.
    pub broker_connect_timeout: Duration,
    /// Broker socket-read timeout (also what surfaces a dead connection
    /// as an error rather than a hang).
    pub broker_read_timeout: Duration,
    /// Document-store server-selection timeout.
    pub store_selection_timeout: Duration,
}

impl SupervisorConfig {
    /// Derive a supervisor configuration from the process [`Config`].
    pub fn from_config(config: &Config, consumer_name: impl Into<String>) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            database_uri: config.database_uri.clone(),
            db_name: config.db_name.clone(),
            inbox_stream: config.inbox_stream.clone(),
            internal_stream: config.internal_stream.clone(),
            dlq_stream: config.dlq_stream.clone(),
            consumer_group: config.consumer_group.clone(),
            consumer_name: consumer_name.into(),
            batch_size: config.batch_size,
            block_timeout_ms: config.block_timeout_ms,
            dedup_ttl_seconds: config.dedup_ttl_seconds,
            max_retries: config.max_retries,
            broker_connect_timeout: config.broker_connect_timeout,
            broker_read_timeout: config.broker_read_timeout,
            store_selection_timeout: config.store_selection_timeout,
        }
    }

    fn managed_streams(&self) -> [String; 2] {
        [self.inbox_stream.clone(), self.internal_stream.clone()]
    }
}

/// Owns the broker and document-store clients and drives the delivery
/// loop for the lifetime of the process.
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Arc<HandlerRegistry>,
    shutdown: ShutdownToken,
}

impl Supervisor {
    /// Build a supervisor bound to `config`, dispatching to `registry`,
    /// cancellable via `shutdown`.
    pub fn new(config: SupervisorConfig, registry: HandlerRegistry, shutdown: ShutdownToken) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            shutdown,
        }
    }

    /// Run the start sequence, then the steady-state loop, to completion.
    /// Returns `Ok(())` on clean cancellation, `Err` on a fatal
    /// configuration error or an unrecoverable broker response error.
    pub async fn run(mut self) -> Result<()> {
        let broker = self.connect_broker().await?;
        let broker = Arc::new(Mutex::new(broker));

        let store = self.connect_store().await?;

        self.ensure_groups(&broker).await?;
        self.replay_pending(&broker, &store).await?;

        self.steady_state(broker, store).await
    }

    async fn connect_broker(&mut self) -> Result<RedisBroker> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.shutdown.is_shutdown() {
                return Err(EngineError::Cancelled);
            }
            let attempt = RedisBroker::connect(
                &self.config.redis_url,
                self.config.consumer_name.clone(),
                self.config.broker_connect_timeout,
                self.config.broker_read_timeout,
            )
            .await;
            match attempt {
                Ok(mut broker) => match broker.ping().await {
                    Ok(()) => return Ok(broker),
                    Err(e) if e.is_connection_class() => {
                        warn!(error = %e, backoff_secs = backoff.as_secs(), "broker ping failed, retrying");
                        drop(broker);
                        self.sleep_cancellable(backoff).await?;
                        backoff = next_backoff(backoff);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_connection_class() => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "broker connect failed, retrying");
                    self.sleep_cancellable(backoff).await?;
                    backoff = next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn connect_store(&mut self) -> Result<DocumentStore> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.shutdown.is_shutdown() {
                return Err(EngineError::Cancelled);
            }
            match DocumentStore::connect(
                &self.config.database_uri,
                &self.config.db_name,
                self.config.store_selection_timeout,
            )
            .await
            {
                Ok(store) => match store.ping().await {
                    Ok(()) => return Ok(store),
                    Err(e) if e.is_fatal_config() => return Err(e),
                    Err(e) if e.is_store_transient() => {
                        warn!(error = %e, backoff_secs = backoff.as_secs(), "store ping failed, retrying");
                        store.close().await;
                        self.sleep_cancellable(backoff).await?;
                        backoff = next_backoff(backoff);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_fatal_config() => return Err(e),
                Err(e) if e.is_store_transient() => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "store connect failed, retrying");
                    self.sleep_cancellable(backoff).await?;
                    backoff = next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn ensure_groups(&self, broker: &Arc<Mutex<RedisBroker>>) -> Result<()> {
        let mut guard = broker.lock().await;
        for stream in self.config.managed_streams() {
            guard.ensure_group(&stream, &self.config.consumer_group).await?;
        }
        Ok(())
    }

    async fn replay_pending(&self, broker: &Arc<Mutex<RedisBroker>>, store: &DocumentStore) -> Result<()> {
        let dispatcher = self.dispatcher(broker.clone(), store);
        for stream in self.config.managed_streams() {
            let pending = {
                let mut guard = broker.lock().await;
                guard
                    .pending_entries(&stream, &self.config.consumer_group, self.config.batch_size)
                    .await?
            };
            if !pending.is_empty() {
                info!(%stream, count = pending.len(), "replaying pending entries");
            }
            for message in pending {
                dispatcher.dispatch(&stream, message).await?;
            }
        }
        Ok(())
    }

    fn dispatcher(&self, broker: Arc<Mutex<RedisBroker>>, store: &DocumentStore) -> Dispatcher {
        let dedup = Arc::new(RedisDedupGate::new(broker.clone()));
        Dispatcher::new(
            broker,
            dedup,
            self.registry.clone(),
            store.database().clone(),
            self.config.dlq_stream.clone(),
            self.config.consumer_group.clone(),
            self.config.dedup_ttl_seconds,
            self.config.max_retries,
        )
    }

    async fn steady_state(mut self, broker: Arc<Mutex<RedisBroker>>, store: DocumentStore) -> Result<()> {
        let dispatcher = self.dispatcher(broker.clone(), &store);
        let streams = self.config.managed_streams();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if self.shutdown.is_shutdown() {
                info!("shutdown requested, stopping delivery loop");
                return Ok(());
            }

            let read_result = {
                let mut guard = broker.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        info!("shutdown requested mid-read, stopping delivery loop");
                        return Ok(());
                    }
                    result = guard.read_new(
                        &streams,
                        &self.config.consumer_group,
                        self.config.batch_size,
                        self.config.block_timeout_ms,
                    ) => result,
                }
            };

            match read_result {
                Ok(messages) => {
                    let mut faulted = false;
                    for message in messages {
                        let stream = message.stream.clone();
                        if let Err(e) = dispatcher.dispatch(&stream, message).await {
                            self.handle_fault(&broker, &store, e, &mut backoff).await?;
                            faulted = true;
                            break;
                        }
                    }
                    if !faulted {
                        backoff = INITIAL_BACKOFF;
                    }
                }
                Err(e) => {
                    self.handle_fault(&broker, &store, e, &mut backoff).await?;
                }
            }
        }
    }

    /// Route a fault raised out of the read/dispatch path to the matching
    /// recovery layer. Layer 1 (missing group) and Layer 2 (connection
    /// loss) are handled here; [`EngineError::Other`] falls through to
    /// the Layer-4 catch-all pause. Everything else — a fatal broker
    /// response error such as [`EngineError::BrokerOther`] — is not
    /// recoverable in-loop and propagates to the caller.
    async fn handle_fault(
        &mut self,
        broker: &Arc<Mutex<RedisBroker>>,
        store: &DocumentStore,
        error: EngineError,
        backoff: &mut Duration,
    ) -> Result<()> {
        if error.is_missing_group() {
            warn!(error = %error, "missing consumer group, re-ensuring and replaying from start");
            match self.ensure_groups(broker).await {
                Ok(()) => self.replay_pending(broker, store).await,
                Err(e) if e.is_connection_class() => self.recover_connection(broker, store, backoff).await,
                Err(e) => Err(e),
            }
        } else if error.is_connection_class() {
            self.recover_connection(broker, store, backoff).await
        } else if error.is_other() {
            error!(error = %error, "unexpected error in delivery loop, pausing");
            self.sleep_cancellable(Duration::from_secs(1)).await
        } else {
            error!(error = %error, "fatal broker response error, stopping");
            Err(error)
        }
    }

    /// Layer 2's full recovery sequence: close and re-create the broker
    /// connection, ping, re-ensure groups, replay pending on both streams.
    async fn recover_connection(
        &mut self,
        broker: &Arc<Mutex<RedisBroker>>,
        store: &DocumentStore,
        backoff: &mut Duration,
    ) -> Result<()> {
        warn!(backoff_secs = backoff.as_secs(), "broker connection lost, reconnecting");
        self.sleep_cancellable(*backoff).await?;
        *backoff = next_backoff(*backoff);

        {
            let mut guard = broker.lock().await;
            guard.reconnect().await?;
            guard.ping().await?;
        }
        self.ensure_groups(broker).await?;
        self.replay_pending(broker, store).await?;
        *backoff = INITIAL_BACKOFF;
        Ok(())
    }

    async fn sleep_cancellable(&mut self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_BACKOFF)
}
