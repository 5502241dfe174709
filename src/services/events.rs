//! Event system for strategy mutations
//!
//! Events are emitted after a mutation commits. Useful for:
//! - Audit logging
//! - Cache invalidation in downstream readers

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Strategy events emitted by services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyEvent {
    GroupBootstrapped {
        group_code: i64,
        materials: Vec<i64>,
    },
    GroupUpdated {
        group_code: i64,
        cascaded: usize,
        only_matching: bool,
    },
    MaterialUpdated {
        group_code: i64,
        material_code: i64,
    },
    GroupItemsReset {
        group_code: i64,
        count: usize,
    },
    ItemReset {
        group_code: i64,
        material_code: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &StrategyEvent);
}

/// Event bus for broadcasting strategy events
pub struct EventBus {
    sender: broadcast::Sender<StrategyEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: StrategyEvent) {
        trace!(event = ?event, "Emitting strategy event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StrategyEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &StrategyEvent) {
        match event {
            StrategyEvent::GroupBootstrapped { group_code, materials } => {
                info!(group = group_code, materials = materials.len(), "Group strategy bootstrapped");
            }
            StrategyEvent::GroupUpdated { group_code, cascaded, only_matching } => {
                info!(group = group_code, cascaded, only_matching, "Group strategy updated");
            }
            StrategyEvent::GroupItemsReset { group_code, count } => {
                info!(group = group_code, count, "Group items reset");
            }
            _ => {
                debug!(event = ?event, "Strategy event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(StrategyEvent::ItemReset {
            group_code: 1,
            material_code: 10,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(
            event,
            StrategyEvent::ItemReset {
                group_code: 1,
                material_code: 10
            }
        );
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::with_capacity(0);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(StrategyEvent::GroupItemsReset {
            group_code: 2,
            count: 0,
        });
    }
}
