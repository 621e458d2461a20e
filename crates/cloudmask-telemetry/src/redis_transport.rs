//! Redis pub/sub transport
//!
//! Commands (PING, PUBLISH) go through a multiplexed [`ConnectionManager`]
//! that reconnects on its own; each subscription opens a dedicated pub/sub
//! connection, since a connection in subscriber mode cannot issue commands.

use crate::buffer::InboundMessage;
use crate::config::TransportConfig;
use crate::transport::{MessageStream, Transport};
use async_trait::async_trait;
use cloudmask_core::{Channel, Error, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Event bus backed by Redis pub/sub
pub struct RedisTransport {
    config: TransportConfig,
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = redis::Client::open(connection_info(&config))
            .map_err(|e| Error::transport(format!("Invalid Redis target: {}", e)))?;

        Ok(Self {
            config,
            client,
            connection: Mutex::new(None),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| Error::transport("Redis transport is not connected"))
    }
}

fn connection_info(config: &TransportConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            password: config.password.clone(),
            ..Default::default()
        },
    }
}

/// Run a Redis operation under a deadline, mapping both failure kinds
async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::transport(e.to_string())),
        Err(_) => Err(Error::Timeout),
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let manager = with_timeout(
            self.config.connect_timeout(),
            ConnectionManager::new(self.client.clone()),
        )
        .await?;

        *self.connection.lock() = Some(manager);
        info!(endpoint = %self.config.display_target(), "Connected to Redis");
        Ok(())
    }

    async fn subscribe(&self, channels: &[Channel]) -> Result<MessageStream> {
        let mut pubsub =
            with_timeout(self.config.connect_timeout(), self.client.get_async_pubsub()).await?;

        for channel in channels {
            with_timeout(self.config.command_timeout(), pubsub.subscribe(channel.as_str())).await?;
            debug!(channel = %channel, "Subscribed to Redis channel");
        }

        let stream = pubsub.into_on_message().map(|message| {
            let channel = message.get_channel_name().to_string();
            message
                .get_payload::<String>()
                .map(|payload| InboundMessage { channel, payload })
                .map_err(|e| Error::transport(format!("Unreadable pub/sub payload: {}", e)))
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection()?;
        let reply: String = with_timeout(
            self.config.command_timeout(),
            redis::cmd("PING").query_async(&mut connection),
        )
        .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::transport(format!("Unexpected PING reply: {}", reply)))
        }
    }

    async fn publish(&self, channel: Channel, payload: &str) -> Result<()> {
        let mut connection = self.connection()?;
        let mut last_error = Error::transport("publish was not attempted");

        for attempt in 0..=self.config.max_retries {
            let result: Result<i64> = with_timeout(
                self.config.command_timeout(),
                redis::cmd("PUBLISH")
                    .arg(channel.as_str())
                    .arg(payload)
                    .query_async(&mut connection),
            )
            .await;

            match result {
                Ok(receivers) => {
                    debug!(channel = %channel, receivers, "Published event");
                    return Ok(());
                }
                Err(e) => {
                    warn!(channel = %channel, attempt, error = %e, "Publish failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn close(&self) -> Result<()> {
        if self.connection.lock().take().is_some() {
            info!(endpoint = %self.config.display_target(), "Closed Redis connection");
        }
        Ok(())
    }
}
