use std::future::Future;

use anyhow::Result;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::chat::ChatService;
use crate::app::posts::PostService;
use crate::app::users::UserService;
use crate::domain::chat::ChatMessage;
use crate::domain::post::{Post, PostVisibility};
use crate::domain::realtime::{ChangeEvent, ChangeOp, ChangeRecord, LiveItem, Topic};
use crate::domain::user::AuthorSummary;
use crate::infra::db::Db;
use crate::infra::realtime::RealtimeHub;

/// Loads the rows behind change events. Change payloads carry keys only.
pub trait LiveRecords: Clone + Send + Sync + 'static {
    fn message(
        &self,
        message_id: Uuid,
    ) -> impl Future<Output = Result<Option<ChatMessage>>> + Send;

    /// Public, visible posts only.
    fn post(&self, post_id: Uuid) -> impl Future<Output = Result<Option<Post>>> + Send;

    fn author(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<AuthorSummary>>> + Send;
}

#[derive(Clone)]
pub struct StoredRecords {
    chat: ChatService,
    posts: PostService,
    users: UserService,
}

impl StoredRecords {
    pub fn new(db: Db) -> Self {
        Self {
            chat: ChatService::new(db.clone()),
            posts: PostService::new(db.clone()),
            users: UserService::new(db),
        }
    }
}

impl LiveRecords for StoredRecords {
    async fn message(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        self.chat.get_message(message_id).await
    }

    async fn post(&self, post_id: Uuid) -> Result<Option<Post>> {
        self.posts.get_public_post(post_id).await
    }

    async fn author(&self, user_id: Uuid) -> Result<Option<AuthorSummary>> {
        self.users.get_summary(user_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Receiving,
    Unsubscribed,
}

#[derive(Clone)]
pub struct RealtimeBridge<R = StoredRecords> {
    hub: RealtimeHub,
    records: R,
}

impl<R: LiveRecords> RealtimeBridge<R> {
    pub fn new(hub: RealtimeHub, records: R) -> Self {
        Self { hub, records }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription<R> {
        let receiver = self.hub.subscribe(topic);
        debug!(%topic, "subscribed");
        Subscription {
            topic,
            hub: self.hub.clone(),
            receiver: Some(receiver),
            records: self.records.clone(),
            state: SubscriptionState::Subscribed,
        }
    }
}

/// One consumer of a topic. Inserts are loaded and denormalized with their
/// author before being handed out; dropping the subscription unsubscribes.
pub struct Subscription<R = StoredRecords> {
    topic: Topic,
    hub: RealtimeHub,
    receiver: Option<broadcast::Receiver<ChangeEvent>>,
    records: R,
    state: SubscriptionState,
}

impl<R> Subscription<R> {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn unsubscribe(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            drop(receiver);
            self.hub.release(self.topic);
            debug!(topic = %self.topic, "unsubscribed");
        }
        self.state = SubscriptionState::Unsubscribed;
    }
}

impl<R> Drop for Subscription<R> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<R: LiveRecords> Subscription<R> {
    /// Waits for the next insert on the topic. Returns `None` once
    /// unsubscribed or when the hub goes away.
    pub async fn next(&mut self) -> Option<LiveItem> {
        loop {
            let receiver = self.receiver.as_mut()?;
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    self.unsubscribe();
                    return None;
                }
            };

            if event.op != ChangeOp::Insert {
                continue;
            }

            if let Some(item) = self.denormalize(event).await {
                self.state = SubscriptionState::Receiving;
                return Some(item);
            }
        }
    }

    async fn denormalize(&self, event: ChangeEvent) -> Option<LiveItem> {
        let record: ChangeRecord = match serde_json::from_value(event.record) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = ?err, topic = %self.topic, table = %event.table, "undecodable change record");
                return None;
            }
        };

        match event.table.as_str() {
            "chat_messages" => {
                let loaded = self.records.message(record.id).await;
                let mut message = self.loaded(loaded, "chat_messages", record.id)?;
                if message.author.is_none() {
                    message.author = self.lookup_author(message.author_id).await;
                }
                Some(LiveItem::Message(message))
            }
            "posts" => {
                if record
                    .visibility
                    .is_some_and(|visibility| visibility != PostVisibility::Public)
                {
                    return None;
                }
                let loaded = self.records.post(record.id).await;
                let mut post = self.loaded(loaded, "posts", record.id)?;
                if post.author.is_none() {
                    post.author = self.lookup_author(post.author_id).await;
                }
                Some(LiveItem::Post(post))
            }
            other => {
                debug!(table = other, "ignoring change for unrelated table");
                None
            }
        }
    }

    fn loaded<T>(&self, result: Result<Option<T>>, table: &str, id: Uuid) -> Option<T> {
        match result {
            Ok(Some(row)) => Some(row),
            Ok(None) => {
                debug!(table, row_id = %id, "changed row no longer deliverable");
                None
            }
            Err(err) => {
                warn!(error = ?err, table, row_id = %id, topic = %self.topic, "failed to load changed row");
                None
            }
        }
    }

    async fn lookup_author(&self, user_id: Uuid) -> Option<AuthorSummary> {
        match self.records.author(user_id).await {
            Ok(author) => author,
            Err(err) => {
                warn!(error = ?err, user_id = %user_id, "failed to load author for live item");
                None
            }
        }
    }
}
