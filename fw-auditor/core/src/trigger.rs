//! Delivery of trigger events over a publish/subscribe topic.
//!
//! Delivery is at-most-once: publishers are not told whether any subscriber
//! received or handled an event.

use crate::{dispatch::DispatchTable, event::Event, metrics::AuditMetrics, rule::RuleId};
use anyhow::{Context, Result};
use futures::prelude::*;
use tracing::{debug, error, info, warn};

/// The topic shared by trigger publishers and subscribers.
pub const TOPIC: &str = "rule_triggers";

/// Publishes raw payloads to a topic.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Publishes scan triggers.
#[derive(Clone, Debug)]
pub struct Trigger<P> {
    publisher: P,
    topic: String,
}

// === impl Trigger ===

impl<P: Publisher> Trigger<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            topic: TOPIC.to_string(),
        }
    }

    pub async fn trigger_all(&self) -> Result<()> {
        self.publish(Event::TriggerAll).await
    }

    pub async fn trigger_by_rule_ids(&self, ids: Vec<RuleId>) -> Result<()> {
        self.publish(Event::TriggerByRuleIds(ids)).await
    }

    async fn publish(&self, event: Event) -> Result<()> {
        let payload = event.encode().context("failed to encode trigger")?;
        self.publisher
            .publish(&self.topic, payload)
            .await
            .with_context(|| format!("failed to publish {} to {}", event.event_type(), self.topic))?;
        info!(event_type = %event.event_type(), topic = %self.topic, "Published trigger");
        Ok(())
    }
}

/// Decodes each message from a subscription and dispatches it.
///
/// Malformed messages and handler failures are logged and do not stop the
/// loop, which runs until the subscription ends.
pub async fn receive<S>(messages: S, table: DispatchTable, metrics: AuditMetrics)
where
    S: Stream<Item = Vec<u8>>,
{
    tokio::pin!(messages);
    while let Some(payload) = messages.next().await {
        let event = match Event::decode(&payload) {
            Ok(event) => event,
            Err(error) => {
                metrics.trigger_malformed();
                warn!(
                    %error,
                    payload = %String::from_utf8_lossy(&payload),
                    "Skipping malformed trigger message"
                );
                continue;
            }
        };

        let event_type = event.event_type();
        metrics.trigger_received(&event_type);
        debug!(%event_type, "Received trigger");
        if let Err(error) = table.dispatch(event).await {
            error!(%event_type, error = %format_args!("{error:#}"), "Failed to handle trigger");
        }
    }
    debug!("Trigger subscription closed");
}
