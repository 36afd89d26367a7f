//! Process entrypoint: load configuration, connect collaborators, spawn
//! the health server, and run the supervisor until cancelled.

mod handlers;

use std::sync::Arc;

use eventline_core::health::{HealthServer, SimpleHealthCheck};
use eventline_core::prelude::*;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use handlers::register_demo_handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env();
    let consumer_name = format!("eventline-{}-{}", std::process::id(), uuid::Uuid::new_v4());
    info!(%consumer_name, "starting eventline");

    // Health-check connections are independent of the supervisor's own
    // broker/store clients (it dials in during its start sequence with its
    // own retry policy); a failure here only degrades the health endpoint,
    // it never aborts startup.
    let mut health_check = SimpleHealthCheck::new();
    match RedisBroker::connect(
        &config.redis_url,
        format!("{consumer_name}-health"),
        config.broker_connect_timeout,
        config.broker_read_timeout,
    )
    .await
    {
        Ok(broker) => {
            health_check = health_check.add_dependency(RedisDependency::new(Arc::new(Mutex::new(broker))));
        }
        Err(e) => error!(error = %e, "health probe could not connect to broker at startup"),
    }
    match DocumentStore::connect(&config.database_uri, &config.db_name, config.store_selection_timeout).await {
        Ok(store) => {
            health_check = health_check.add_dependency(MongoDependency::new(Arc::new(store)));
        }
        Err(e) => error!(error = %e, "health probe could not connect to document store at startup"),
    }
    let health_server = HealthServer::new(health_check).port(config.health_port);

    let shutdown = Arc::new(GracefulShutdown::new());
    let shutdown_token = shutdown.token();

    let mut health_token = shutdown.token();
    tokio::spawn(async move {
        if let Err(e) = health_server
            .serve_with_shutdown(async move {
                health_token.cancelled().await;
            })
            .await
        {
            error!(error = %e, "health server exited with an error");
        }
    });

    let mut registry = HandlerRegistry::new();
    register_demo_handlers(&mut registry);

    let supervisor_config = SupervisorConfig::from_config(&config, consumer_name);
    let supervisor = Supervisor::new(supervisor_config, registry, shutdown_token);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown.wait().await;
        }
    });

    match supervisor.run().await {
        Ok(()) => {
            info!("eventline shut down cleanly");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            info!("eventline cancelled");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "eventline exited with a fatal error");
            Err(e.into())
        }
    }
}
