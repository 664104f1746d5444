use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{ContentError, Result};
use crate::model::{EventPayload, EventTopic, Id, MigrationEventModel};

const DEFAULT_CAPACITY: usize = 256;

/// Named pub/sub topics with structured payloads.
///
/// `subscribe` hands out a receiver; dropping it unsubscribes. Events published
/// while nobody listens are discarded.
#[derive(Debug, Clone)]
pub struct EventBus {
    channels: Arc<Mutex<HashMap<EventTopic, broadcast::Sender<EventPayload>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: EventTopic) -> broadcast::Sender<EventPayload> {
        self.channels
            .lock()
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish to a topic, returning how many subscribers received it
    pub fn publish(&self, topic: EventTopic, payload: EventPayload) -> usize {
        match self.sender(topic).send(payload) {
            Ok(receivers) => receivers,
            Err(_) => {
                log::debug!("No subscribers for {}", topic);
                0
            }
        }
    }

    pub fn subscribe(&self, topic: EventTopic) -> broadcast::Receiver<EventPayload> {
        self.sender(topic).subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the migration event of one job on a subscribed topic
pub async fn next_job_event(
    receiver: &mut broadcast::Receiver<EventPayload>,
    job_uuid: &Id,
) -> Result<MigrationEventModel> {
    loop {
        match receiver.recv().await {
            Ok(EventPayload::Migration(model)) if &model.job == job_uuid => return Ok(model),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Event subscriber lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(ContentError::Store {
                    message: "event channel closed".into(),
                    transient: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_topic_subscribers_only() {
        let bus = EventBus::new();
        let mut cleared = bus.subscribe(EventTopic::ClearPermissionStore);
        let mut finished = bus.subscribe(EventTopic::SchemaMigrationFinished);

        let delivered = bus.publish(
            EventTopic::ClearPermissionStore,
            EventPayload::PermissionStoreCleared {
                origin: "node-a".into(),
            },
        );
        assert_eq!(delivered, 1);
        assert!(matches!(
            cleared.recv().await.unwrap(),
            EventPayload::PermissionStoreCleared { .. }
        ));
        assert!(finished.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let receiver = bus.subscribe(EventTopic::BranchMigrationStart);
        drop(receiver);

        let delivered = bus.publish(
            EventTopic::BranchMigrationStart,
            EventPayload::PermissionStoreCleared {
                origin: "node-a".into(),
            },
        );
        assert_eq!(delivered, 0);
    }
}
