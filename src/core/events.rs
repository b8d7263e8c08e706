//! # Deployment events
//!
//! Every observable step of a run is published here: group markers, per-service
//! outcomes and the final plan outcome. The recorded history is the ordering
//! contract callers and tests inspect.

use crate::domain::outcome::Outcome;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeploymentEvent {
    PlanStarted { plan: String, groups: usize },
    GroupStarted { name: String, index: usize },
    ServiceCreated { name: String },
    ServiceHealthy { name: String },
    ServiceFailed { name: String, reason: String },
    GroupCompleted { name: String, outcome: Outcome },
    PlanCompleted { outcome: Outcome },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DeploymentEvent,
}

#[derive(Debug, Default)]
struct History {
    next_sequence: u64,
    records: Vec<EventRecord>,
}

/// Records every event in order and rebroadcasts it to live subscribers.
///
/// Cloning is cheap; all clones share the same history.
#[derive(Debug, Clone)]
pub struct EventBus {
    history: Arc<Mutex<History>>,
    sender: broadcast::Sender<EventRecord>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        // Slow subscribers lag; the history is still complete.
        let (sender, _) = broadcast::channel(256);
        Self {
            history: Arc::new(Mutex::new(History::default())),
            sender,
        }
    }

    pub fn publish(&self, event: DeploymentEvent) {
        // Sequence assignment and append happen under one lock so history order is emission order.
        let record = {
            let mut history = match self.history.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let record = EventRecord {
                sequence: history.next_sequence,
                at: Utc::now(),
                event,
            };
            history.next_sequence += 1;
            history.records.push(record.clone());
            record
        };
        tracing::trace!(sequence = record.sequence, event = ?record.event, "event published");
        // No subscribers is fine.
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        match self.history.lock() {
            Ok(guard) => guard.records.clone(),
            Err(poisoned) => poisoned.into_inner().records.clone(),
        }
    }

    pub fn events(&self) -> Vec<DeploymentEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.records())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_follow_publish_order() {
        let bus = EventBus::new();
        bus.publish(DeploymentEvent::GroupStarted {
            name: "Foundation".to_string(),
            index: 0,
        });
        bus.publish(DeploymentEvent::GroupCompleted {
            name: "Foundation".to_string(),
            outcome: Outcome::Succeeded,
        });

        let records = bus.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[1].sequence, 1);
        assert!(records[0].at <= records[1].at);
    }

    #[test]
    fn test_clones_share_history() {
        let bus = EventBus::new();
        let clone = bus.clone();
        clone.publish(DeploymentEvent::ServiceHealthy {
            name: "db".to_string(),
        });
        assert_eq!(bus.events().len(), 1);
    }

    #[test]
    fn test_json_export_is_tagged() {
        let bus = EventBus::new();
        bus.publish(DeploymentEvent::ServiceFailed {
            name: "app".to_string(),
            reason: "create failed: exit 125".to_string(),
        });

        let json = bus.to_json().unwrap();
        assert!(json.contains("\"type\": \"ServiceFailed\""));
        assert!(json.contains("\"sequence\": 0"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_live_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(DeploymentEvent::PlanStarted {
            plan: "demo".to_string(),
            groups: 2,
        });

        let record = rx.recv().await.unwrap();
        assert_eq!(
            record.event,
            DeploymentEvent::PlanStarted {
                plan: "demo".to_string(),
                groups: 2
            }
        );
    }
}
