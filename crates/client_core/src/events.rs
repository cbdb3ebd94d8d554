//! Push events as tagged variants, one reducer per consumer.

use gateway::{ChangeEvent, ChangeKind, GatewayError, Table};
use shared::{
    domain::{MessageId, UserId},
    records::{MembershipRecord, MessageRecord},
};

#[derive(Debug, Clone, PartialEq)]
pub enum MembershipChange {
    Joined(MembershipRecord),
    Left(MembershipRecord),
}

impl MembershipChange {
    pub fn membership(&self) -> &MembershipRecord {
        match self {
            Self::Joined(membership) | Self::Left(membership) => membership,
        }
    }
}

/// Everything an open room reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Insert(MessageRecord),
    Update {
        message_id: MessageId,
        read_by: Vec<UserId>,
    },
    MembershipChange(MembershipChange),
}

impl RoomEvent {
    /// Translate a raw change. Changes a room does not act on (message
    /// deletes, other tables) give `None`.
    pub fn from_change(event: &ChangeEvent) -> Result<Option<Self>, GatewayError> {
        let translated = match (event.table, event.kind) {
            (Table::Messages, ChangeKind::Insert) => Some(Self::Insert(event.decode_row()?)),
            (Table::Messages, ChangeKind::Update) => {
                let message: MessageRecord = event.decode_row()?;
                Some(Self::Update {
                    message_id: message.id,
                    read_by: message.read_by,
                })
            }
            (Table::RoomMembers, ChangeKind::Insert | ChangeKind::Update) => Some(
                Self::MembershipChange(MembershipChange::Joined(event.decode_row()?)),
            ),
            (Table::RoomMembers, ChangeKind::Delete) => Some(Self::MembershipChange(
                MembershipChange::Left(event.decode_row()?),
            )),
            _ => None,
        };
        Ok(translated)
    }
}

/// What the room list reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterEvent {
    RoomsChanged,
    MembersChanged,
}

impl RosterEvent {
    pub fn from_change(event: &ChangeEvent) -> Option<Self> {
        match event.table {
            Table::Messages | Table::RoomMembers | Table::ChatRooms => Some(Self::RoomsChanged),
            Table::Profiles => Some(Self::MembersChanged),
            Table::BoardPosts => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::domain::RoomId;

    fn change(table: Table, kind: ChangeKind, new: Option<serde_json::Value>, old: Option<serde_json::Value>) -> ChangeEvent {
        ChangeEvent { table, kind, new, old }
    }

    #[test]
    fn message_update_carries_new_reader_set() {
        let id = MessageId::new();
        let reader = UserId::new();
        let row = json!({
            "id": id,
            "content": "hi",
            "sender_id": UserId::new(),
            "room_id": RoomId::new(),
            "created_at": "2024-05-01T10:00:00Z",
            "read_by": [reader],
        });

        let event = RoomEvent::from_change(&change(Table::Messages, ChangeKind::Update, Some(row), None))
            .expect("decode")
            .expect("room event");

        assert_eq!(event, RoomEvent::Update { message_id: id, read_by: vec![reader] });
    }

    #[test]
    fn membership_delete_uses_old_row() {
        let membership = MembershipRecord {
            room_id: RoomId::new(),
            user_id: UserId::new(),
        };
        let old = serde_json::to_value(membership).expect("encode");

        let event = RoomEvent::from_change(&change(Table::RoomMembers, ChangeKind::Delete, None, Some(old)))
            .expect("decode");

        assert_eq!(
            event,
            Some(RoomEvent::MembershipChange(MembershipChange::Left(membership)))
        );
    }

    #[test]
    fn unrelated_changes_are_skipped() {
        let event = change(Table::BoardPosts, ChangeKind::Insert, Some(json!({})), None);
        assert_eq!(RoomEvent::from_change(&event).expect("decode"), None);
        assert_eq!(RosterEvent::from_change(&event), None);
        let profile = change(Table::Profiles, ChangeKind::Update, Some(json!({})), None);
        assert_eq!(RosterEvent::from_change(&profile), Some(RosterEvent::MembersChanged));
    }
}
