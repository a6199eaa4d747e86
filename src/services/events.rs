//! Event system for registry mutations
//!
//! Services emit one event per committed unit of work. Nothing is emitted
//! for a mutation that rolled back, so listeners only ever observe state
//! that is durable.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::models::{IncomeTier, MemberPosition};

/// Registry events emitted by services after commit
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    // Resident events
    ResidentCreated {
        id: String,
        barangay_code: String,
        household_id: Option<String>,
    },
    ResidentUpdated {
        id: String,
    },
    ResidentDeactivated {
        id: String,
    },
    ResidentsReclassified {
        jurisdiction: String,
        changed: usize,
    },

    // Household events
    HouseholdCreated {
        id: String,
        household_code: String,
    },
    HouseholdUpdated {
        id: String,
        household_code: String,
    },
    HouseholdDeactivated {
        id: String,
    },
    HouseholdRecomputed {
        id: String,
        member_count: i64,
        income_tier: IncomeTier,
    },

    // Membership events
    MembershipAdded {
        id: String,
        household_id: String,
        resident_id: String,
        position: MemberPosition,
    },
    MembershipUpdated {
        id: String,
        position: MemberPosition,
    },
    MembershipRemoved {
        id: String,
        household_id: String,
        resident_id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &RegistryEvent);
}

/// Event bus for broadcasting registry events
pub struct EventBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: RegistryEvent) {
        trace!(event = ?event, "Emitting registry event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every event at debug level, household tier moves at info
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::ResidentCreated { id, barangay_code, .. } => {
                debug!(id = %id, barangay = %barangay_code, "Resident created");
            }
            RegistryEvent::ResidentDeactivated { id } => {
                debug!(id = %id, "Resident deactivated");
            }
            RegistryEvent::ResidentsReclassified { jurisdiction, changed } => {
                info!(jurisdiction = %jurisdiction, changed, "Residents reclassified");
            }
            RegistryEvent::HouseholdCreated { id, household_code } => {
                debug!(id = %id, code = %household_code, "Household created");
            }
            RegistryEvent::HouseholdRecomputed { id, member_count, income_tier } => {
                debug!(id = %id, member_count, tier = %income_tier, "Household aggregates changed");
            }
            RegistryEvent::MembershipAdded { household_id, resident_id, position, .. } => {
                debug!(
                    household = %household_id,
                    resident = %resident_id,
                    position = %position,
                    "Membership added"
                );
            }
            _ => {
                trace!(event = ?event, "Registry event");
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

        bus.emit(RegistryEvent::HouseholdCreated {
            id: "h1".into(),
            household_code: "042114014-0000-0000-0001".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            RegistryEvent::HouseholdCreated { id, household_code } => {
                assert_eq!(id, "h1");
                assert_eq!(household_code, "042114014-0000-0000-0001");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_logging_listener_stops_when_bus_is_dropped() {
        let bus = Arc::new(EventBus::new());
        let listener = spawn_logging_listener(bus.clone());
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(RegistryEvent::ResidentUpdated { id: "r1".into() });
        bus.emit(RegistryEvent::ResidentsReclassified {
            jurisdiction: "042114014".into(),
            changed: 1,
        });
        drop(bus);

        timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not stop")
            .expect("listener panicked");
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        // Should not panic even with no subscribers
        bus.emit(RegistryEvent::ResidentDeactivated {
            id: "test".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
