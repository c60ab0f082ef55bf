use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::chat::ChatMessage;
use crate::domain::post::{Post, PostVisibility};

/// Parent key of a change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Channel(Uuid),
    Community(Uuid),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel:{}", id),
            Self::Community(id) => write!(f, "community:{}", id),
        }
    }
}

impl FromStr for Topic {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid topic: {}", value))?;
        let id = Uuid::parse_str(id)?;
        match kind {
            "channel" => Ok(Self::Channel(id)),
            "community" => Ok(Self::Community(id)),
            other => Err(anyhow::anyhow!("unknown topic kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One row change as published by the database triggers. `record` carries
/// only the row keys; subscribers load the row itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub topic: String,
    pub table: String,
    pub op: ChangeOp,
    pub record: Value,
}

impl ChangeEvent {
    pub fn topic(&self) -> Option<Topic> {
        self.topic.parse().ok()
    }
}

/// Keys of a changed row. Notification payloads are size-capped, so the
/// triggers never embed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub author_id: Uuid,
    #[serde(default)]
    pub visibility: Option<PostVisibility>,
}

/// Denormalized item delivered to a subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum LiveItem {
    Message(ChatMessage),
    Post(Post),
}

impl LiveItem {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Post(_) => "post",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_display_and_parse_agree() {
        let id = Uuid::from_u128(7);
        let topic = Topic::Channel(id);
        assert_eq!(topic.to_string(), format!("channel:{}", id));
        assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
        assert!("group:abc".parse::<Topic>().is_err());
        assert!("community".parse::<Topic>().is_err());
    }

    #[test]
    fn change_event_decodes_trigger_payload() {
        let payload = r#"{
            "topic": "community:00000000-0000-0000-0000-000000000009",
            "table": "posts",
            "op": "INSERT",
            "record": {
                "id": "00000000-0000-0000-0000-000000000001",
                "author_id": "00000000-0000-0000-0000-000000000002",
                "visibility": "friends"
            }
        }"#;
        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.topic(), Some(Topic::Community(Uuid::from_u128(9))));

        let record: ChangeRecord = serde_json::from_value(event.record).unwrap();
        assert_eq!(record.id, Uuid::from_u128(1));
        assert_eq!(record.author_id, Uuid::from_u128(2));
        assert_eq!(record.visibility, Some(PostVisibility::Friends));
    }
}
