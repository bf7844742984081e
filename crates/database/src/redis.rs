//! Redis-backed work log (consumer-group stream) and pub/sub bus.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;

use services::realtime::{BrokerError, MessageBus, Subscription, WorkEntry, WorkItem, WorkLog};

/// Shared Redis handle. Blocking stream reads get their own connections;
/// everything else multiplexes over one managed connection.
pub struct RedisBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroker {
    /// Connect and verify the connection with a ping.
    pub async fn connect(cfg: &config::RedisConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(cfg.url.as_str())
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let _pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Redis connected");
        Ok(Self { client, manager })
    }

    pub fn work_log(&self, stream: &str, group: &str) -> RedisWorkLog {
        RedisWorkLog {
            client: self.client.clone(),
            manager: self.manager.clone(),
            stream: stream.to_string(),
            group: group.to_string(),
            blocking: Mutex::new(HashMap::new()),
        }
    }

    pub fn message_bus(&self) -> RedisMessageBus {
        RedisMessageBus {
            client: self.client.clone(),
            manager: self.manager.clone(),
        }
    }
}

pub struct RedisWorkLog {
    client: redis::Client,
    manager: ConnectionManager,
    stream: String,
    group: String,
    /// One dedicated connection per consumer: blocking XREADGROUP must not
    /// stall the shared multiplexed connection.
    blocking: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisWorkLog {
    async fn blocking_connection(
        &self,
        consumer: &str,
    ) -> Result<MultiplexedConnection, BrokerError> {
        let mut connections = self.blocking.lock().await;
        if let Some(con) = connections.get(consumer) {
            return Ok(con.clone());
        }
        let con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        connections.insert(consumer.to_string(), con.clone());
        Ok(con)
    }
}

#[async_trait]
impl WorkLog for RedisWorkLog {
    async fn ensure_group(&self) -> Result<(), BrokerError> {
        let mut con = self.manager.clone();
        let result: redis::RedisResult<String> = con
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;
        match result {
            Ok(_) => Ok(()),
            // The group surviving a restart is the normal case.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(BrokerError::OperationError(e.into())),
        }
    }

    async fn append(&self, item: &WorkItem) -> Result<String, BrokerError> {
        let mut con = self.manager.clone();
        let fields = item.fields();
        let id: String = con
            .xadd(&self.stream, "*", &fields)
            .await
            .map_err(|e| BrokerError::OperationError(e.into()))?;
        Ok(id)
    }

    async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<WorkEntry>, BrokerError> {
        let mut con = self.blocking_connection(consumer).await?;

        let options = StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        // ">" asks for entries never delivered to this group.
        let reply: Option<StreamReadReply> = con
            .xread_options(&[&self.stream], &[">"], &options)
            .await
            .map_err(|e| BrokerError::OperationError(e.into()))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let mut fields = HashMap::new();
                for (field, value) in &id.map {
                    if let Ok(value) = redis::from_redis_value::<String>(value) {
                        fields.insert(field.clone(), value);
                    }
                }
                entries.push(WorkEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), BrokerError> {
        let mut con = self.manager.clone();
        let _: i64 = con
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(|e| BrokerError::OperationError(e.into()))?;
        Ok(())
    }
}

pub struct RedisMessageBus {
    client: redis::Client,
    manager: ConnectionManager,
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut con = self.manager.clone();
        let _: i64 = con
            .publish(channel, payload)
            .await
            .map_err(|e| BrokerError::OperationError(e.into()))?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        for channel in channels {
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| BrokerError::OperationError(e.into()))?;
        }

        // Dropping the stream drops the pub/sub connection, which releases
        // the subscription server-side.
        let payloads = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(Box::pin(payloads))
    }
}
