//! Event types and EventBus for consolidation notifications
//!
//! The cache/version-invalidation layer subscribes here to learn about
//! applied merges. The bus is also the default [`ConsolidationSink`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{ConsolidationRecord, ConsolidationType};

/// Consolidation event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConsolidationEvent {
    /// A proposal was applied; downstream views of these brands are stale
    BrandsConsolidated {
        record: ConsolidationRecord,
    },

    /// Pending proposals lost a member to a competing merge
    ProposalsInvalidated {
        proposal_ids: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The learning loop moved a type's thresholds
    ThresholdsAdjusted {
        consolidation_type: ConsolidationType,
        auto_approve: f64,
        review_floor: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Receiver of successful merges
///
/// Invoked exactly once per committed consolidation, after commit.
pub trait ConsolidationSink: Send + Sync {
    fn consolidation_applied(&self, record: &ConsolidationRecord);
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsolidationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ConsolidationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ConsolidationEvent,
    ) -> Result<usize, broadcast::error::SendError<ConsolidationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ConsolidationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ConsolidationSink for EventBus {
    fn consolidation_applied(&self, record: &ConsolidationRecord) {
        if self
            .emit(ConsolidationEvent::BrandsConsolidated {
                record: record.clone(),
            })
            .is_err()
        {
            tracing::debug!(record_id = %record.id, "No subscribers for consolidation event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergedBrand;
    use uuid::Uuid;

    fn sample_record() -> ConsolidationRecord {
        ConsolidationRecord {
            id: Uuid::new_v4(),
            proposal_id: "cp-test".to_string(),
            consolidation_type: ConsolidationType::CaseVariant,
            survivor_id: Uuid::new_v4(),
            survivor_name: "Acme".to_string(),
            merged_brands: vec![MergedBrand {
                id: Uuid::new_v4(),
                name: "ACME".to_string(),
                sku_count: 3,
            }],
            skus_moved: 3,
            importer_links_moved: 0,
            notes: Vec::new(),
            actor: "tester".to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sink_broadcasts_record() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let record = sample_record();

        bus.consolidation_applied(&record);

        match rx.recv().await.unwrap() {
            ConsolidationEvent::BrandsConsolidated { record: received } => {
                assert_eq!(received.id, record.id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_sink_without_subscribers_does_not_fail() {
        let bus = EventBus::new(10);
        bus.consolidation_applied(&sample_record());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ConsolidationEvent::ProposalsInvalidated {
            proposal_ids: vec!["cp-1".to_string()],
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ProposalsInvalidated");
    }
}
