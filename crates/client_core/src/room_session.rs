//! One open room window: messages, members, board and compose box, kept
//! current by a single reducer over [`RoomEvent`]s.

use std::{collections::HashSet, sync::Arc};

use futures::{stream::select_all, StreamExt};
use gateway::{decode_row, encode_record, Filter, Gateway, Query, Subscription, Table};
use shared::{
    domain::{ContentKind, MessageId, PostId, RoomId, UserId},
    records::{
        BoardPostRecord, MembershipRecord, MessageRecord, NewMessage, ProfileRecord, RoomRecord,
        UNKNOWN_DISPLAY_NAME,
    },
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    board::BoardService,
    compose::{self, ComposeState, OutgoingText},
    error::{ClientError, ErrorContext, Result, Surface},
    events::{MembershipChange, RoomEvent},
    host::HostShell,
    members::{sender_directory, MemberDirectory},
    message_store::{MessageStore, PageLoad},
    receipts::{unread_count_for, ReadReceipts, ReadSweep},
    settings::ChatSettings,
    SELF_ROOM_LABEL,
};

pub const NO_OTHER_MEMBERS_LABEL: &str = "No other members";
pub const FILE_NOTIFICATION_BODY: &str = "📎 sent a file";

/// What a reduced event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    Appended(MessageId),
    ReadersChanged(MessageId),
    MembersReloaded,
    /// The current user's membership is gone; the window closed itself.
    Closed,
    Ignored,
}

#[derive(Default)]
struct RoomSessionState {
    everyone: Vec<ProfileRecord>,
    members: Vec<ProfileRecord>,
    board: Vec<BoardPostRecord>,
    compose: ComposeState,
    closed: bool,
}

pub struct ChatRoomSession {
    gateway: Arc<dyn Gateway>,
    user_id: UserId,
    room: RoomRecord,
    store: MessageStore,
    receipts: ReadReceipts,
    directory: MemberDirectory,
    board: BoardService,
    host: Arc<dyn HostShell>,
    settings: watch::Receiver<ChatSettings>,
    inner: Mutex<RoomSessionState>,
    /// Change feeds opened before the first load, drained by `spawn_events`.
    pending_changes: Mutex<Option<Vec<Subscription>>>,
}

impl ChatRoomSession {
    /// Load the room, its members, the newest page and the board, then mark
    /// what is visible as read. The room's change feeds are opened first so
    /// nothing written during the load is missed.
    pub async fn open(
        gateway: Arc<dyn Gateway>,
        user_id: UserId,
        room_id: RoomId,
        host: Arc<dyn HostShell>,
        settings: watch::Receiver<ChatSettings>,
        page_size: usize,
    ) -> Result<Self> {
        let room: RoomRecord = gateway
            .query(Query::from(Table::ChatRooms).filter(Filter::eq("id", room_id)).limit(1))
            .await?
            .into_iter()
            .next()
            .map(decode_row)
            .transpose()?
            .ok_or_else(|| ClientError::not_found(format!("room {room_id}")))?;

        let session = Self {
            store: MessageStore::new(Arc::clone(&gateway), page_size),
            receipts: ReadReceipts::new(Arc::clone(&gateway)),
            directory: MemberDirectory::new(Arc::clone(&gateway), user_id),
            board: BoardService::new(Arc::clone(&gateway), room_id, user_id),
            gateway,
            user_id,
            room,
            host,
            settings,
            inner: Mutex::new(RoomSessionState::default()),
            pending_changes: Mutex::new(None),
        };
        let changes = session.subscribe_changes().await?;
        *session.pending_changes.lock().await = Some(changes);
        session.reload_members().await?;
        session.store.load_initial(room_id).await?;
        session.reload_board().await?;
        session.mark_all_read().await;
        info!(%room_id, "room opened");
        Ok(session)
    }

    pub fn room(&self) -> &RoomRecord {
        &self.room
    }

    pub fn room_id(&self) -> RoomId {
        self.room.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.store.snapshot().await
    }

    pub async fn has_more(&self) -> bool {
        self.store.has_more().await
    }

    /// Oldest loaded message, for restoring scroll position after paging.
    pub async fn anchor(&self) -> Option<MessageId> {
        self.store.anchor().await
    }

    pub async fn members(&self) -> Vec<ProfileRecord> {
        self.inner.lock().await.members.clone()
    }

    pub async fn board_posts(&self) -> Vec<BoardPostRecord> {
        self.inner.lock().await.board.clone()
    }

    /// Apply one push event.
    pub async fn reduce(&self, event: RoomEvent) -> Result<RoomUpdate> {
        if self.is_closed().await {
            return Ok(RoomUpdate::Ignored);
        }
        match event {
            RoomEvent::Insert(message) => {
                if message.room_id != self.room.id {
                    return Ok(RoomUpdate::Ignored);
                }
                let id = message.id;
                if !self.store.apply_insert(message.clone()).await {
                    return Ok(RoomUpdate::Ignored);
                }
                if message.sender_id != self.user_id {
                    if let Err(err) = self.receipts.mark_read(&message, self.user_id).await {
                        warn!(message_id = %id, error = %err, "read receipt dropped");
                    }
                    self.notify(id).await;
                }
                Ok(RoomUpdate::Appended(id))
            }
            RoomEvent::Update {
                message_id,
                read_by,
            } => {
                if self.store.apply_read_update(message_id, read_by).await {
                    Ok(RoomUpdate::ReadersChanged(message_id))
                } else {
                    Ok(RoomUpdate::Ignored)
                }
            }
            RoomEvent::MembershipChange(change) => {
                let membership = *change.membership();
                if membership.room_id != self.room.id {
                    return Ok(RoomUpdate::Ignored);
                }
                if matches!(change, MembershipChange::Left(_)) && membership.user_id == self.user_id {
                    self.close().await;
                    return Ok(RoomUpdate::Closed);
                }
                self.reload_members().await?;
                Ok(RoomUpdate::MembersReloaded)
            }
        }
    }

    async fn notify(&self, message_id: MessageId) {
        let enabled = self.settings.borrow().notification_enabled;
        if !enabled {
            return;
        }
        let Some(message) = self.store.get(message_id).await else {
            return;
        };
        let title = message
            .sender_name()
            .unwrap_or(UNKNOWN_DISPLAY_NAME)
            .to_owned();
        let body = match message.content_type {
            ContentKind::File => FILE_NOTIFICATION_BODY.to_owned(),
            ContentKind::Text | ContentKind::System => message.content.clone(),
        };
        self.host.show_notification(&title, &body).await;
    }

    async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.store.close().await;
        self.host.close_current_window().await;
        info!(room_id = %self.room.id, "removed from room, window closed");
    }

    pub async fn set_compose_text(&self, text: impl Into<String>) {
        self.inner.lock().await.compose.set_text(text);
    }

    pub async fn compose_text(&self) -> String {
        self.inner.lock().await.compose.text().to_owned()
    }

    pub async fn set_reply_to(&self, message_id: Option<MessageId>) {
        self.inner.lock().await.compose.set_reply_to(message_id);
    }

    pub async fn insert_mention(&self, member: &ProfileRecord) {
        self.inner
            .lock()
            .await
            .compose
            .insert_mention(&member.display_name());
    }

    /// Room members matching the `@query` being typed, if any.
    pub async fn mention_candidates(&self) -> Vec<ProfileRecord> {
        let inner = self.inner.lock().await;
        match inner.compose.mention_query() {
            Some(query) => compose::mention_candidates(&inner.members, &query)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Send the compose text. The compose box is cleared before the write,
    /// so a failed send loses the text. `Ok(None)` when there was nothing
    /// to send.
    pub async fn send_text(&self) -> Result<Option<MessageRecord>> {
        let Some(OutgoingText { content, reply_to }) = self.inner.lock().await.compose.begin_send() else {
            return Ok(None);
        };
        let sent = self.post(content, ContentKind::Text, reply_to).await;
        self.inner.lock().await.compose.finish_send();
        sent.map(Some)
    }

    /// Share a file by path.
    pub async fn send_file(&self, path: &str) -> Result<MessageRecord> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ClientError::validation("file path must not be empty"));
        }
        self.post(path.to_owned(), ContentKind::File, None).await
    }

    async fn post(
        &self,
        content: String,
        content_type: ContentKind,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRecord> {
        let message = NewMessage {
            content,
            content_type,
            sender_id: self.user_id,
            room_id: self.room.id,
            reply_to,
            read_by: vec![self.user_id],
        };
        let row = self
            .gateway
            .insert(Table::Messages, encode_record(&message)?)
            .await?;
        let sent: MessageRecord = decode_row(row)?;
        debug!(room_id = %self.room.id, message_id = %sent.id, "message sent");
        Ok(sent)
    }

    /// Prepend the next older page and mark it read.
    pub async fn load_older(&self) -> Result<PageLoad> {
        let page = self.store.load_older().await?;
        if let PageLoad::Loaded { messages, .. } = &page {
            self.receipts
                .mark_all_read(self.room.id, self.room.is_self, self.user_id, messages)
                .await;
        }
        Ok(page)
    }

    pub async fn mark_all_read(&self) -> ReadSweep {
        let loaded = self.store.snapshot().await;
        self.receipts
            .mark_all_read(self.room.id, self.room.is_self, self.user_id, &loaded)
            .await
    }

    pub async fn reload_members(&self) -> Result<()> {
        let everyone = self.directory.everyone().await?;
        let members = self.directory.room_members(self.room.id).await?;
        self.store.set_sender_names(sender_directory(&everyone)).await;
        let mut inner = self.inner.lock().await;
        inner.everyone = everyone;
        inner.members = members;
        Ok(())
    }

    /// Profiles that could still be invited.
    pub async fn available_invitees(&self) -> Vec<ProfileRecord> {
        let inner = self.inner.lock().await;
        let present: HashSet<UserId> = inner.members.iter().map(|m| m.id).collect();
        inner
            .everyone
            .iter()
            .filter(|profile| profile.id != self.user_id && !present.contains(&profile.id))
            .cloned()
            .collect()
    }

    pub async fn invite(&self, user_id: UserId) -> Result<()> {
        if self.inner.lock().await.members.iter().any(|m| m.id == user_id) {
            return Ok(());
        }
        let membership = MembershipRecord {
            room_id: self.room.id,
            user_id,
        };
        self.gateway
            .insert(Table::RoomMembers, encode_record(&membership)?)
            .await?;
        info!(room_id = %self.room.id, %user_id, "member invited");
        self.reload_members().await
    }

    /// Header label: fixed for the self-room, otherwise the other members.
    pub async fn display_name(&self) -> String {
        if self.room.is_self {
            return SELF_ROOM_LABEL.to_owned();
        }
        let inner = self.inner.lock().await;
        let others: Vec<String> = inner
            .members
            .iter()
            .filter(|m| m.id != self.user_id)
            .map(ProfileRecord::display_name)
            .collect();
        if others.is_empty() {
            NO_OTHER_MEMBERS_LABEL.to_owned()
        } else {
            others.join(", ")
        }
    }

    pub async fn member_count(&self) -> usize {
        self.inner.lock().await.members.len()
    }

    pub async fn unread_count(&self, message: &MessageRecord) -> usize {
        unread_count_for(
            message,
            self.member_count().await,
            self.user_id,
            self.room.is_self,
        )
    }

    /// Loaded messages whose content contains `query`, ignoring case.
    pub async fn search(&self, query: &str) -> Vec<MessageRecord> {
        let messages = self.store.snapshot().await;
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return messages;
        }
        messages
            .into_iter()
            .filter(|message| message.content.to_lowercase().contains(&query))
            .collect()
    }

    pub async fn reply_target(&self, message_id: MessageId) -> Option<MessageRecord> {
        self.store.get(message_id).await
    }

    pub async fn reload_board(&self) -> Result<()> {
        let names = sender_directory(&self.inner.lock().await.everyone);
        let posts = self.board.list_with_authors(&names).await?;
        self.inner.lock().await.board = posts;
        Ok(())
    }

    pub async fn create_post(&self, content: &str, is_important: bool) -> Result<BoardPostRecord> {
        let post = self.board.create(content, is_important).await?;
        self.reload_board().await?;
        Ok(post)
    }

    pub async fn toggle_important(&self, post_id: PostId) -> Result<bool> {
        let post = self
            .inner
            .lock()
            .await
            .board
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("board post {post_id}")))?;
        let important = self.board.toggle_important(&post).await?;
        self.reload_board().await?;
        Ok(important)
    }

    pub async fn delete_post(&self, post_id: PostId) -> Result<()> {
        self.board.delete(post_id).await?;
        self.reload_board().await
    }

    pub async fn open_file(&self, message: &MessageRecord) -> Result<()> {
        if message.content_type != ContentKind::File {
            return Err(ClientError::validation("message is not a file reference"));
        }
        self.host.open_path(&message.content).await?;
        Ok(())
    }

    async fn subscribe_changes(&self) -> Result<Vec<Subscription>> {
        let room = Some(Filter::eq("room_id", self.room.id));
        Ok(vec![
            self.gateway.subscribe(Table::Messages, room.clone()).await?,
            self.gateway.subscribe(Table::RoomMembers, room).await?,
        ])
    }

    /// Subscribe to this room's messages and memberships and reduce every
    /// change until the session closes.
    pub async fn spawn_events(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let pending = self.pending_changes.lock().await.take();
        let subscriptions = match pending {
            Some(subscriptions) => subscriptions,
            None => self.subscribe_changes().await?,
        };
        let session = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let mut changes = select_all(subscriptions);
            while let Some(change) = changes.next().await {
                let event = match RoomEvent::from_change(&change) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(table = %change.table, error = %err, "undecodable change skipped");
                        continue;
                    }
                };
                match session.reduce(event).await {
                    Ok(RoomUpdate::Closed) => break,
                    Ok(update) => debug!(?update, "room event reduced"),
                    Err(err) => match err.surface(ErrorContext::PushEvent) {
                        Surface::Ignore => {}
                        Surface::Alert | Surface::LogOnly => {
                            warn!(room_id = %session.room.id, error = %err, "room event dropped");
                        }
                    },
                }
            }
            debug!(room_id = %session.room.id, "room event loop ended");
        }))
    }
}

#[cfg(test)]
#[path = "tests/room_session_tests.rs"]
mod tests;
