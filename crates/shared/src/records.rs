use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    email_local_part, ApprovalStatus, ContentKind, MessageId, PostId, RoomId, UserId,
};

pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Denormalized author/sender name embedded by the backend on select.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SenderSummary {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: ContentKind,
    pub sender_id: UserId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub read_by: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderSummary>,
}

impl MessageRecord {
    pub fn is_read_by(&self, user_id: UserId) -> bool {
        self.read_by.contains(&user_id)
    }

    /// Number of distinct readers; the reader set has membership semantics.
    pub fn reader_count(&self) -> usize {
        self.read_by.iter().collect::<HashSet<_>>().len()
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|sender| sender.name.as_deref())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub content: String,
    pub content_type: ContentKind,
    pub sender_id: UserId,
    pub room_id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub read_by: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_group: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_self: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl RoomRecord {
    pub fn is_direct(&self) -> bool {
        !self.is_group && !self.is_self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRoom {
    pub name: String,
    pub is_group: bool,
    pub is_self: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub room_id: RoomId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardPostRecord {
    pub id: PostId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    pub content: String,
    pub author_id: UserId,
    pub room_id: RoomId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<SenderSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBoardPost {
    pub title: String,
    pub content: String,
    pub author_id: UserId,
    pub room_id: RoomId,
    pub is_important: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub approval_status: Option<ApprovalStatus>,
}

impl ProfileRecord {
    pub fn display_name(&self) -> String {
        display_name_for(self.name.as_deref(), self.email.as_deref())
    }
}

/// Name when present, else the email local part, else a fixed placeholder.
pub fn display_name_for(name: Option<&str>, email: Option<&str>) -> String {
    if let Some(name) = name.filter(|name| !name.trim().is_empty()) {
        return name.to_owned();
    }
    email
        .map(email_local_part)
        .filter(|local| !local.is_empty())
        .unwrap_or(UNKNOWN_DISPLAY_NAME)
        .to_owned()
}
