use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::domain::realtime::{ChangeEvent, Topic};
use crate::infra::db::Db;

/// Postgres channel the change triggers publish on.
pub const CHANGE_CHANNEL: &str = "hearth_changes";

const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(2);

type Senders = HashMap<Topic, broadcast::Sender<ChangeEvent>>;

/// Fans change events out to per-topic broadcast channels. A topic's sender
/// is created on first subscribe and dropped once nobody listens, either
/// when the last subscriber releases it or on the next publish.
#[derive(Clone)]
pub struct RealtimeHub {
    topics: Arc<Mutex<Senders>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    // Never held across an await.
    fn topics(&self) -> MutexGuard<'_, Senders> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<ChangeEvent> {
        self.topics()
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops the sender of `topic` if it has no receivers left. Call after
    /// dropping a receiver.
    pub fn release(&self, topic: Topic) {
        let mut topics = self.topics();
        if topics
            .get(&topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            topics.remove(&topic);
            debug!(%topic, "released idle topic");
        }
    }

    /// Delivers `event` to the subscribers of `topic` and returns how many
    /// receivers got it.
    pub fn publish(&self, topic: Topic, event: ChangeEvent) -> usize {
        let mut topics = self.topics();
        let Some(sender) = topics.get(&topic) else {
            return 0;
        };

        let delivered = sender.send(event).unwrap_or(0);
        if delivered == 0 {
            topics.remove(&topic);
            debug!(%topic, "pruned idle topic");
        }
        delivered
    }

    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics()
            .get(&topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Decodes a raw notification payload and publishes it.
    pub fn dispatch(&self, payload: &str) -> usize {
        let event: ChangeEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = ?err, "failed to decode change notification");
                return 0;
            }
        };
        let Some(topic) = event.topic() else {
            warn!(topic = %event.topic, "change notification has unknown topic");
            return 0;
        };
        self.publish(topic, event)
    }

    /// Listens for change notifications until the task is dropped,
    /// reconnecting after errors.
    pub async fn run_listener(self, db: Db) -> Result<()> {
        loop {
            let mut listener = match db.listen(CHANGE_CHANNEL).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(error = ?err, "failed to start change listener");
                    tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                    continue;
                }
            };
            info!(channel = CHANGE_CHANNEL, "change listener started");

            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let delivered = self.dispatch(notification.payload());
                        debug!(delivered, "dispatched change notification");
                    }
                    Err(err) => {
                        error!(error = ?err, "change listener failed, reconnecting");
                        break;
                    }
                }
            }

            tokio::time::sleep(LISTENER_RETRY_DELAY).await;
        }
    }
}
