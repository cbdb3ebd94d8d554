//! The main room list: self-room bootstrap, per-room summaries, ordering,
//! direct-chat resolution and room lifecycle actions.

use std::{cmp::Ordering, collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{future::try_join_all, stream::select_all, StreamExt};
use gateway::{decode_row, decode_rows, encode_record, Filter, Gateway, Order, Query, Table};
use shared::{
    domain::{ContentKind, RoomId, UserId},
    records::{
        display_name_for, MembershipRecord, MessageRecord, NewMessage, NewRoom, ProfileRecord,
        RoomRecord, UNKNOWN_DISPLAY_NAME,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, Result},
    events::RosterEvent,
    receipts::is_unread_by,
    SELF_ROOM_LABEL,
};

/// Pause between the departure notice and the membership removal.
pub const DEFAULT_LEAVE_DELAY: Duration = Duration::from_millis(300);
pub const FILE_PREVIEW: &str = "📎 File";

/// One row of the room list.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub room: RoomRecord,
    pub display_name: String,
    pub last_message: String,
    pub last_activity: DateTime<Utc>,
    pub unread_count: usize,
    pub is_pinned: bool,
}

impl RoomSummary {
    pub fn id(&self) -> RoomId {
        self.room.id
    }
}

pub fn last_message_preview(message: &MessageRecord) -> String {
    match message.content_type {
        ContentKind::File => FILE_PREVIEW.to_owned(),
        ContentKind::Text | ContentKind::System => message.content.clone(),
    }
}

/// Self-room first, then pinned rooms, then most recent activity.
pub fn compare_room_summaries(a: &RoomSummary, b: &RoomSummary) -> Ordering {
    b.room
        .is_self
        .cmp(&a.room.is_self)
        .then_with(|| b.is_pinned.cmp(&a.is_pinned))
        .then_with(|| b.last_activity.cmp(&a.last_activity))
}

pub fn sort_room_summaries(rooms: &mut [RoomSummary]) {
    rooms.sort_by(compare_room_summaries);
}

/// How [`RoomListAggregator::start_direct_chat`] found its room.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectChat {
    /// Both users were already members.
    Existing(RoomRecord),
    /// Only the target was left; the current user joined again.
    Rejoined(RoomRecord),
    Created(RoomRecord),
}

impl DirectChat {
    pub fn room(&self) -> &RoomRecord {
        match self {
            Self::Existing(room) | Self::Rejoined(room) | Self::Created(room) => room,
        }
    }
}

/// Pushed to observers of the room list.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterUpdate {
    Rooms(Vec<RoomSummary>),
    MembersChanged,
}

#[derive(Default)]
struct RosterState {
    pinned: HashSet<RoomId>,
    rooms: Vec<RoomSummary>,
}

pub struct RoomListAggregator {
    gateway: Arc<dyn Gateway>,
    user_id: UserId,
    leave_delay: Duration,
    inner: Mutex<RosterState>,
    updates: broadcast::Sender<RosterUpdate>,
}

impl RoomListAggregator {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: UserId) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            gateway,
            user_id,
            leave_delay: DEFAULT_LEAVE_DELAY,
            inner: Mutex::new(RosterState::default()),
            updates,
        }
    }

    pub fn with_leave_delay(mut self, delay: Duration) -> Self {
        self.leave_delay = delay;
        self
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<RosterUpdate> {
        self.updates.subscribe()
    }

    /// Find the current user's notes-to-self room, creating it and its
    /// single membership on first use.
    pub async fn ensure_self_room(&self) -> Result<RoomRecord> {
        let rows = self
            .gateway
            .query(
                Query::from(Table::ChatRooms)
                    .filter(Filter::eq("is_self", true))
                    .filter(Filter::eq("created_by", self.user_id))
                    .limit(1),
            )
            .await?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(decode_row(row)?);
        }

        let room = self
            .insert_room(NewRoom {
                name: SELF_ROOM_LABEL.to_owned(),
                is_group: false,
                is_self: true,
                created_by: Some(self.user_id),
            })
            .await?;
        self.add_member(room.id, self.user_id).await?;
        info!(room_id = %room.id, user_id = %self.user_id, "created self room");
        Ok(room)
    }

    /// Rebuild the room list from the backend and publish it.
    pub async fn refresh(&self) -> Result<Vec<RoomSummary>> {
        self.ensure_self_room().await?;

        let room_ids = self.membership_room_ids(self.user_id).await?;
        let rooms: Vec<RoomRecord> = if room_ids.is_empty() {
            Vec::new()
        } else {
            decode_rows(
                self.gateway
                    .query(
                        Query::from(Table::ChatRooms)
                            .filter(Filter::is_in("id", room_ids))
                            .order_by(Order::desc("created_at")),
                    )
                    .await?,
            )?
        };

        let pinned = self.inner.lock().await.pinned.clone();
        let mut summaries =
            try_join_all(rooms.into_iter().map(|room| {
                let is_pinned = pinned.contains(&room.id);
                self.summarize(room, is_pinned)
            }))
            .await?;
        sort_room_summaries(&mut summaries);

        self.inner.lock().await.rooms = summaries.clone();
        // No observers is fine.
        let _ = self.updates.send(RosterUpdate::Rooms(summaries.clone()));
        debug!(rooms = summaries.len(), "room list refreshed");
        Ok(summaries)
    }

    pub async fn rooms(&self) -> Vec<RoomSummary> {
        self.inner.lock().await.rooms.clone()
    }

    pub async fn is_pinned(&self, room_id: RoomId) -> bool {
        self.inner.lock().await.pinned.contains(&room_id)
    }

    /// Flip the client-local pin of a room and reorder the cached list.
    /// Returns the new pin state.
    pub async fn toggle_pin(&self, room_id: RoomId) -> bool {
        let mut inner = self.inner.lock().await;
        let pinned = if inner.pinned.remove(&room_id) {
            false
        } else {
            inner.pinned.insert(room_id);
            true
        };
        for summary in inner.rooms.iter_mut().filter(|s| s.room.id == room_id) {
            summary.is_pinned = pinned;
        }
        sort_room_summaries(&mut inner.rooms);
        pinned
    }

    async fn summarize(&self, room: RoomRecord, is_pinned: bool) -> Result<RoomSummary> {
        let last: Option<MessageRecord> = self
            .gateway
            .query(
                Query::from(Table::Messages)
                    .filter(Filter::eq("room_id", room.id))
                    .order_by(Order::desc("created_at"))
                    .limit(1),
            )
            .await?
            .into_iter()
            .next()
            .map(decode_row)
            .transpose()?;

        let unread_count = if room.is_self {
            0
        } else {
            let candidates: Vec<MessageRecord> = decode_rows(
                self.gateway
                    .query(
                        Query::from(Table::Messages)
                            .filter(Filter::eq("room_id", room.id))
                            .filter(Filter::neq("sender_id", self.user_id)),
                    )
                    .await?,
            )?;
            candidates
                .iter()
                .filter(|message| is_unread_by(message, self.user_id))
                .count()
        };

        let display_name = self.room_display_name(&room).await?;
        Ok(RoomSummary {
            display_name,
            last_message: last.as_ref().map(last_message_preview).unwrap_or_default(),
            last_activity: last.map_or(room.created_at, |message| message.created_at),
            unread_count,
            is_pinned,
            room,
        })
    }

    /// Fixed label for the self-room, the other member for one-to-one
    /// rooms, the stored name otherwise.
    async fn room_display_name(&self, room: &RoomRecord) -> Result<String> {
        if room.is_self {
            return Ok(SELF_ROOM_LABEL.to_owned());
        }
        if room.is_group {
            return Ok(room.name.clone());
        }
        let members = self.room_member_ids(room.id).await?;
        let Some(other) = members.into_iter().find(|id| *id != self.user_id) else {
            return Ok(room.name.clone());
        };
        let profile = self.profile(other).await?;
        let name = profile
            .map(|profile| display_name_for(profile.name.as_deref(), profile.email.as_deref()))
            .filter(|name| name != UNKNOWN_DISPLAY_NAME);
        Ok(name.unwrap_or_else(|| room.name.clone()))
    }

    /// Open a one-to-one conversation with `target`: reuse a shared room,
    /// else rejoin a room only the target is still in, else create one.
    pub async fn start_direct_chat(&self, target: &ProfileRecord) -> Result<DirectChat> {
        if target.id == self.user_id {
            return Err(ClientError::validation(
                "use the notes-to-self room to message yourself",
            ));
        }

        for room_id in self.membership_room_ids(self.user_id).await? {
            let Some(room) = self.direct_room(room_id).await? else {
                continue;
            };
            let shared = self
                .gateway
                .query(
                    Query::from(Table::RoomMembers)
                        .filter(Filter::eq("room_id", room.id))
                        .filter(Filter::eq("user_id", target.id)),
                )
                .await?;
            if !shared.is_empty() {
                debug!(room_id = %room.id, target = %target.id, "reusing direct room");
                return Ok(DirectChat::Existing(room));
            }
        }

        for room_id in self.membership_room_ids(target.id).await? {
            let Some(room) = self.direct_room(room_id).await? else {
                continue;
            };
            let members = self.room_member_ids(room.id).await?;
            if members.as_slice() == [target.id] {
                self.add_member(room.id, self.user_id).await?;
                info!(room_id = %room.id, target = %target.id, "rejoined direct room");
                return Ok(DirectChat::Rejoined(room));
            }
        }

        let room = self
            .insert_room(NewRoom {
                name: target.display_name(),
                is_group: false,
                is_self: false,
                created_by: Some(self.user_id),
            })
            .await?;
        self.add_member(room.id, self.user_id).await?;
        self.add_member(room.id, target.id).await?;
        info!(room_id = %room.id, target = %target.id, "created direct room");
        Ok(DirectChat::Created(room))
    }

    pub async fn create_group_chat(&self, name: &str) -> Result<RoomRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::validation("group name must not be empty"));
        }
        let room = self
            .insert_room(NewRoom {
                name: name.to_owned(),
                is_group: true,
                is_self: false,
                created_by: Some(self.user_id),
            })
            .await?;
        self.add_member(room.id, self.user_id).await?;
        info!(room_id = %room.id, "created group room");
        Ok(room)
    }

    pub async fn invite_member(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        let existing = self
            .gateway
            .query(
                Query::from(Table::RoomMembers)
                    .filter(Filter::eq("room_id", room_id))
                    .filter(Filter::eq("user_id", user_id))
                    .limit(1),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(());
        }
        self.add_member(room_id, user_id).await?;
        info!(%room_id, %user_id, "invited member");
        Ok(())
    }

    /// Post a departure notice, wait for it to propagate, then drop the
    /// current user's membership. A failed removal leaves the notice in
    /// place.
    pub async fn leave_room(&self, room_id: RoomId) -> Result<()> {
        let room: RoomRecord = self
            .gateway
            .query(Query::from(Table::ChatRooms).filter(Filter::eq("id", room_id)).limit(1))
            .await?
            .into_iter()
            .next()
            .map(decode_row)
            .transpose()?
            .ok_or_else(|| ClientError::not_found(format!("room {room_id}")))?;
        if room.is_self {
            return Err(ClientError::validation("the notes-to-self room cannot be left"));
        }

        let name = match self.profile(self.user_id).await? {
            Some(profile) => profile.display_name(),
            None => UNKNOWN_DISPLAY_NAME.to_owned(),
        };
        let notice = NewMessage {
            content: format!("{name} left the room."),
            content_type: ContentKind::System,
            sender_id: self.user_id,
            room_id,
            reply_to: None,
            read_by: Vec::new(),
        };
        self.gateway
            .insert(Table::Messages, encode_record(&notice)?)
            .await?;

        tokio::time::sleep(self.leave_delay).await;

        self.gateway
            .delete(
                Table::RoomMembers,
                vec![
                    Filter::eq("room_id", room_id),
                    Filter::eq("user_id", self.user_id),
                ],
            )
            .await?;
        self.inner.lock().await.rooms.retain(|summary| summary.room.id != room_id);
        info!(%room_id, "left room");
        Ok(())
    }

    /// Refresh on message and membership changes for as long as the
    /// returned task runs; profile changes are forwarded as
    /// [`RosterUpdate::MembersChanged`].
    pub async fn spawn_watch(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let subscriptions = vec![
            self.gateway.subscribe(Table::Messages, None).await?,
            self.gateway.subscribe(Table::RoomMembers, None).await?,
            self.gateway.subscribe(Table::Profiles, None).await?,
        ];
        let roster = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut changes = select_all(subscriptions);
            while let Some(change) = changes.next().await {
                match RosterEvent::from_change(&change) {
                    Some(RosterEvent::RoomsChanged) => {
                        if let Err(err) = roster.refresh().await {
                            warn!(error = %err, "room list refresh failed");
                        }
                    }
                    Some(RosterEvent::MembersChanged) => {
                        let _ = roster.updates.send(RosterUpdate::MembersChanged);
                    }
                    None => {}
                }
            }
            debug!("room list watch ended");
        }))
    }

    async fn insert_room(&self, room: NewRoom) -> Result<RoomRecord> {
        let row = self
            .gateway
            .insert(Table::ChatRooms, encode_record(&room)?)
            .await?;
        Ok(decode_row(row)?)
    }

    async fn add_member(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        let membership = MembershipRecord { room_id, user_id };
        self.gateway
            .insert(Table::RoomMembers, encode_record(&membership)?)
            .await?;
        Ok(())
    }

    async fn membership_room_ids(&self, user_id: UserId) -> Result<Vec<RoomId>> {
        let memberships: Vec<MembershipRecord> = decode_rows(
            self.gateway
                .query(Query::from(Table::RoomMembers).filter(Filter::eq("user_id", user_id)))
                .await?,
        )?;
        Ok(memberships.into_iter().map(|m| m.room_id).collect())
    }

    async fn room_member_ids(&self, room_id: RoomId) -> Result<Vec<UserId>> {
        let memberships: Vec<MembershipRecord> = decode_rows(
            self.gateway
                .query(Query::from(Table::RoomMembers).filter(Filter::eq("room_id", room_id)))
                .await?,
        )?;
        Ok(memberships.into_iter().map(|m| m.user_id).collect())
    }

    /// The room if it is a one-to-one, non-self room.
    async fn direct_room(&self, room_id: RoomId) -> Result<Option<RoomRecord>> {
        let rows = self
            .gateway
            .query(
                Query::from(Table::ChatRooms)
                    .filter(Filter::eq("id", room_id))
                    .filter(Filter::eq("is_group", false))
                    .filter(Filter::eq("is_self", false))
                    .limit(1),
            )
            .await?;
        Ok(rows.into_iter().next().map(decode_row).transpose()?)
    }

    async fn profile(&self, user_id: UserId) -> Result<Option<ProfileRecord>> {
        let rows = self
            .gateway
            .query(Query::from(Table::Profiles).filter(Filter::eq("id", user_id)).limit(1))
            .await?;
        Ok(rows.into_iter().next().map(decode_row).transpose()?)
    }
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
