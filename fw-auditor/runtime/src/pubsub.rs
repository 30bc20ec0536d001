//! Redis transport for trigger events.

use crate::core::{trigger, AuditMetrics, DispatchTable, Publisher};
use anyhow::{Context, Result};
use futures::prelude::*;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tokio::time;
use tracing::{debug, info, warn};

const RESUBSCRIBE_BACKOFF: time::Duration = time::Duration::from_secs(5);

/// Publishes trigger payloads to Redis.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: MultiplexedConnection,
}

// === impl RedisPublisher ===

impl RedisPublisher {
    pub async fn connect(client: &redis::Client) -> Result<Self> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        debug!(%topic, receivers, "Published");
        Ok(())
    }
}

/// Receives triggers from Redis and dispatches them until shutdown.
///
/// The subscription is reestablished after a fixed back-off when it fails or
/// closes.
pub(crate) async fn subscribe(
    client: redis::Client,
    table: DispatchTable,
    metrics: AuditMetrics,
    drain: drain::Watch,
) {
    let receive = async move {
        loop {
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => match pubsub.subscribe(trigger::TOPIC).await {
                    Ok(()) => {
                        info!(topic = trigger::TOPIC, "Subscribed");
                        let messages = pubsub
                            .into_on_message()
                            .map(|msg| msg.get_payload_bytes().to_vec());
                        trigger::receive(messages, table.clone(), metrics.clone()).await;
                        warn!("Subscription closed");
                    }
                    Err(error) => warn!(%error, "Failed to subscribe"),
                },
                Err(error) => warn!(%error, "Failed to connect to redis"),
            }
            time::sleep(RESUBSCRIBE_BACKOFF).await;
        }
    };

    tokio::select! {
        _ = receive => {}
        release = drain.signaled() => {
            debug!("Unsubscribing");
            drop(release);
        }
    }
}
