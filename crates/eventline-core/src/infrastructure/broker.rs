//! The delivery protocol: consumer-group creation, pending-message replay,
//! new-message polling, acknowledgement, and DLQ transfer, against Redis
//! Streams via a multiplexed async connection manager.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    streams::{StreamClaimOptions, StreamReadOptions, StreamReadReply},
    AsyncCommands, RedisError,
};

use crate::error::{EngineError, Result};

/// One message read off (or claimed from) a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Broker-assigned entry id, unique and monotonically ordered within
    /// `stream`.
    pub entry_id: String,
    /// Decoded field map.
    pub fields: HashMap<String, String>,
    /// Originating stream name.
    pub stream: String,
    /// How many times the broker has delivered this entry without an ack.
    /// `1` for live reads (the broker does not report this on a fresh
    /// delivery); the broker-reported `times_delivered` for replayed
    /// pending entries.
    pub delivery_count: u64,
}

/// Redis Streams broker client, owned exclusively by the supervisor.
pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
    consumer: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl RedisBroker {
    /// Connect to `redis_url`, returning a broker bound to `consumer`'s
    /// identity. `connect_timeout` bounds the initial socket connect,
    /// `read_timeout` bounds how long a request may wait for a response
    /// (this is what actually surfaces Layer-2 connection loss — without
    /// it a dead socket blocks forever instead of erroring). Both are
    /// re-applied on [`RedisBroker::reconnect`]. Classifies the initial
    /// connection attempt's failure as a broker connection-class error.
    pub async fn connect(
        redis_url: &str,
        consumer: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(EngineError::from_redis)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(connect_timeout)
            .set_response_timeout(read_timeout);
        let conn = ConnectionManager::new_with_config(client.clone(), config)
            .await
            .map_err(EngineError::from_redis)?;
        Ok(Self {
            client,
            conn,
            consumer: consumer.into(),
            connect_timeout,
            read_timeout,
        })
    }

    /// Health-check the connection.
    pub async fn ping(&mut self) -> Result<()> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await
            .map_err(EngineError::from_redis)?;
        Ok(())
    }

    /// Create the consumer group on `stream` at start-id `"0"`,
    /// auto-creating the stream if absent. `BUSYGROUP` (group already
    /// exists) is treated as success; any other error propagates.
    pub async fn ensure_group(&mut self, stream: &str, group: &str) -> Result<()> {
        let result: std::result::Result<(), RedisError> = self
            .conn
            .xgroup_create_mkstream(stream, group, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(EngineError::from_redis(e)),
        }
    }

    /// Drain the group's pending-entries list for `stream`, claiming each
    /// page to this consumer with idle-time threshold 0 (steal
    /// unconditionally), and return the claimed messages.
    ///
    /// `xclaim` reassigns ownership of an entry but does not remove it
    /// from the pending list, so re-querying `XPENDING - +` would return
    /// the same page forever. Instead the start cursor is advanced past
    /// the last id claimed on each page (an exclusive `(id` range), so
    /// every iteration examines a strictly later slice of the pending
    /// list and the loop is guaranteed to terminate. Acking the claimed
    /// entries — which is what actually shrinks the pending list — is the
    /// caller's job once each one has been dispatched.
    pub async fn pending_entries(
        &mut self,
        stream: &str,
        group: &str,
        batch: usize,
    ) -> Result<Vec<Message>> {
        let mut claimed = Vec::new();
        let mut start = "-".to_string();
        loop {
            let pending: redis::streams::StreamPendingCountReply = self
                .conn
                .xpending_count(stream, group, &start, "+", batch)
                .await
                .map_err(EngineError::from_redis)?;

            if pending.ids.is_empty() {
                break;
            }

            let ids: Vec<String> = pending.ids.iter().map(|p| p.id.clone()).collect();
            let delivery_counts: HashMap<String, u64> = pending
                .ids
                .iter()
                .map(|p| (p.id.clone(), p.times_delivered as u64))
                .collect();
            let page_count = ids.len();
            let last_id = ids.last().cloned().unwrap_or_default();

            let options = StreamClaimOptions::default();
            let reply: redis::streams::StreamClaimReply = self
                .conn
                .xclaim_options(stream, group, &self.consumer, 0, &ids, options)
                .await
                .map_err(EngineError::from_redis)?;

            for claimed_id in reply.ids {
                let fields = decode_stream_fields(&claimed_id.map);
                let delivery_count = delivery_counts.get(&claimed_id.id).copied().unwrap_or(1);
                claimed.push(Message {
                    entry_id: claimed_id.id,
                    fields,
                    stream: stream.to_string(),
                    delivery_count,
                });
            }

            if page_count < batch {
                break;
            }
            start = exclusive_start_after(&last_id);
        }
        Ok(claimed)
    }

    /// Issue a single blocking group-read across `streams`, requesting
    /// only new (`">"`) entries. Returns `(stream, message)` pairs in
    /// whatever order the broker returned them.
    pub async fn read_new(
        &mut self,
        streams: &[String],
        group: &str,
        batch: usize,
        block_ms: u64,
    ) -> Result<Vec<Message>> {
        let options = StreamReadOptions::default()
            .group(group, &self.consumer)
            .count(batch)
            .block(block_ms as usize);
        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();

        let reply: StreamReadReply = self
            .conn
            .xread_options(streams, &ids, &options)
            .await
            .map_err(EngineError::from_redis)?;

        let mut messages = Vec::new();
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                let fields = decode_stream_fields(&stream_id.map);
                messages.push(Message {
                    entry_id: stream_id.id,
                    fields,
                    stream: stream_key.key.clone(),
                    delivery_count: 1,
                });
            }
        }
        Ok(messages)
    }

    /// Acknowledge `entry_id` on `stream`, removing it from the group's
    /// pending list.
    pub async fn ack(&mut self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        self.conn
            .xack(stream, group, &[entry_id])
            .await
            .map_err(EngineError::from_redis)
    }

    /// Append a DLQ entry to `dlq_stream`: original fields verbatim plus
    /// `original_message_id`, `error`, and `moved_at` (ISO-8601 UTC).
    pub async fn move_to_dlq(
        &mut self,
        dlq_stream: &str,
        original_message_id: &str,
        fields: &HashMap<String, String>,
        error: &str,
    ) -> Result<String> {
        let mut items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        items.push(("original_message_id", original_message_id));
        items.push(("error", error));
        let moved_at = Utc::now().to_rfc3339();
        items.push(("moved_at", &moved_at));

        self.conn
            .xadd(dlq_stream, "*", &items)
            .await
            .map_err(EngineError::from_redis)
    }

    /// Set the dedup marker `key` with `ttl` seconds expiry.
    pub async fn set_dedup_marker(&mut self, key: &str, ttl_seconds: u64) -> Result<()> {
        self.conn
            .set_ex(key, "1", ttl_seconds)
            .await
            .map_err(EngineError::from_redis)
    }

    /// Check whether the dedup marker `key` exists.
    pub async fn dedup_marker_exists(&mut self, key: &str) -> Result<bool> {
        self.conn.exists(key).await.map_err(EngineError::from_redis)
    }

    /// Close and re-create the underlying connection, used by Layer 2's
    /// full recovery sequence. Re-applies the same connect/read timeouts
    /// the broker was originally constructed with.
    pub async fn reconnect(&mut self) -> Result<()> {
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.read_timeout);
        let conn = ConnectionManager::new_with_config(self.client.clone(), config)
            .await
            .map_err(EngineError::from_redis)?;
        self.conn = conn;
        Ok(())
    }
}

fn decode_stream_fields(map: &HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| redis::from_redis_value::<String>(v).ok().map(|s| (k.clone(), s)))
        .collect()
}

/// The next `XPENDING` start cursor after having claimed `last_id`: an
/// exclusive range start, so the next page can never include an id
/// already claimed in this drain.
fn exclusive_start_after(last_id: &str) -> String {
    format!("({last_id}")
}
