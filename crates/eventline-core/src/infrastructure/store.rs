//! The document-store collaborator: a MongoDB client the dispatcher holds
//! opaquely and passes to handlers. The engine itself only pings it; all
//! writes are handler-initiated.

use std::time::Duration;

use mongodb::{options::ClientOptions, Client, Database};

use crate::error::{EngineError, Result};

/// A connected MongoDB client + database handle.
pub struct DocumentStore {
    client: Client,
    db: Database,
}

impl DocumentStore {
    /// Connect to `uri` and select `db_name`, without pinging yet.
    /// `selection_timeout` bounds how long the driver will wait for a
    /// suitable server before giving up — without it a partitioned
    /// replica set hangs the start sequence instead of erroring. Bad
    /// URIs / bad options surface immediately as a fatal configuration
    /// error (§4.4 step 2) — never retried.
    pub async fn connect(uri: &str, db_name: &str, selection_timeout: Duration) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(EngineError::from_mongo_connect)?;
        options.server_selection_timeout = Some(selection_timeout);
        let client = Client::with_options(options).map_err(EngineError::from_mongo_connect)?;
        let db = client.database(db_name);
        Ok(Self { client, db })
    }

    /// Probe connectivity via `{ping: 1}`. Distinguishes a fatal
    /// configuration error (bad auth / bad options) from a transient
    /// connectivity error the caller should retry with backoff.
    pub async fn ping(&self) -> Result<()> {
        self.db
            .run_command(mongodb::bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(EngineError::from_mongo_connect)
    }

    /// The database handle passed opaquely to handlers.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Shut down the underlying client. Called between connect attempts
    /// when the document-store start sequence retries after a transient
    /// error.
    pub async fn close(self) {
        // `mongodb::Client` has no async close; dropping releases the
        // connection pool.
        drop(self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_uri_is_a_fatal_configuration_error() {
        let result = DocumentStore::connect("not-a-mongo-uri", "eventline", Duration::from_secs(10)).await;
        let err = result.expect_err("malformed URI must be rejected");
        assert!(err.is_fatal_config(), "expected fatal config error, got {err:?}");
    }
}
