use crate::event::{Event, EventType};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Handles a single kind of event.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

/// Routes each event to the handler registered for its type.
///
/// At most one handler is registered per type; registering again replaces the
/// prior handler.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: Arc<RwLock<HashMap<EventType, Arc<dyn Handler>>>>,
}

impl DispatchTable {
    pub fn register(&self, event_type: EventType, handler: impl Handler + 'static) {
        self.register_shared(event_type, Arc::new(handler));
    }

    pub fn register_shared(&self, event_type: EventType, handler: Arc<dyn Handler>) {
        if self.handlers.write().insert(event_type.clone(), handler).is_some() {
            info!(%event_type, "Replaced handler");
        }
    }

    /// Invokes the handler for `event`'s type, returning its result.
    ///
    /// Events without a registered handler are ignored.
    pub async fn dispatch(&self, event: Event) -> Result<()> {
        let event_type = event.event_type();
        let handler = self.handlers.read().get(&event_type).cloned();
        match handler {
            Some(handler) => handler.handle(event).await,
            None => {
                info!(%event_type, "No handler found for event type");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("event_types", &self.handlers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
