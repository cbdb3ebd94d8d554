//! Per-room message list: initial page, backward pagination and live
//! reconciliation of pushed inserts and reader-set updates.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use gateway::{decode_rows, Filter, Gateway, Order, Query, Table};
use shared::{
    domain::{MessageId, RoomId, UserId},
    records::{MessageRecord, SenderSummary},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{clamp_page_size, error::Result};

/// Loaded messages for one room, ascending by creation time as received.
#[derive(Debug, Clone, Default)]
pub struct MessageTimeline {
    messages: Vec<MessageRecord>,
    ids: HashSet<MessageId>,
    has_more: bool,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&MessageRecord> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// Oldest loaded message; the UI restores its scroll position on it
    /// after older messages are prepended.
    pub fn anchor(&self) -> Option<&MessageRecord> {
        self.messages.first()
    }

    /// Replace the whole list with a newest-first page from the backend.
    pub fn replace_page(&mut self, newest_first: Vec<MessageRecord>, page_size: usize) {
        self.has_more = newest_first.len() == page_size;
        self.messages.clear();
        self.ids.clear();
        for message in newest_first.into_iter().rev() {
            if self.ids.insert(message.id) {
                self.messages.push(message);
            }
        }
    }

    /// Put a newest-first page of older messages in front of the list,
    /// skipping ids already loaded. Returns how many were added.
    pub fn prepend_older(&mut self, newest_first: Vec<MessageRecord>, page_size: usize) -> usize {
        self.has_more = newest_first.len() == page_size;
        let mut prefix = Vec::with_capacity(newest_first.len());
        for message in newest_first.into_iter().rev() {
            if self.ids.insert(message.id) {
                prefix.push(message);
            }
        }
        let added = prefix.len();
        prefix.append(&mut self.messages);
        self.messages = prefix;
        added
    }

    /// Append a pushed message unless its id is already loaded. Existing
    /// entries are never reordered, even when the push arrives late.
    pub fn apply_insert(&mut self, message: MessageRecord) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn apply_read_update(&mut self, id: MessageId, read_by: Vec<UserId>) -> bool {
        match self.messages.iter_mut().find(|message| message.id == id) {
            Some(message) => {
                message.read_by = read_by;
                true
            }
            None => false,
        }
    }

    /// Fill sender names the backend did not embed.
    pub fn fill_sender_names(&mut self, names: &HashMap<UserId, String>) {
        for message in &mut self.messages {
            fill_sender_name(message, names);
        }
    }
}

fn fill_sender_name(message: &mut MessageRecord, names: &HashMap<UserId, String>) {
    if message.sender_name().is_some() {
        return;
    }
    if let Some(name) = names.get(&message.sender_id) {
        message.sender = Some(SenderSummary {
            name: Some(name.clone()),
        });
    }
}

/// Result of a page request.
#[derive(Debug, Clone, PartialEq)]
pub enum PageLoad {
    /// Page applied; `messages` are the new entries, ascending.
    Loaded {
        messages: Vec<MessageRecord>,
        has_more: bool,
    },
    /// Another backward page is still being fetched for this room.
    InFlight,
    /// Nothing loaded to page back from.
    Exhausted,
    /// The store moved to another room (or closed) while the request ran.
    Stale,
}

struct MessageStoreState {
    room_id: Option<RoomId>,
    generation: u64,
    timeline: MessageTimeline,
    loading_older: bool,
    sender_names: HashMap<UserId, String>,
}

/// Async owner of one room's [`MessageTimeline`]. Responses that arrive
/// after the store switched rooms or closed are discarded.
pub struct MessageStore {
    gateway: Arc<dyn Gateway>,
    page_size: usize,
    inner: Mutex<MessageStoreState>,
}

impl MessageStore {
    pub fn new(gateway: Arc<dyn Gateway>, page_size: usize) -> Self {
        Self {
            gateway,
            page_size: clamp_page_size(page_size),
            inner: Mutex::new(MessageStoreState {
                room_id: None,
                generation: 0,
                timeline: MessageTimeline::new(),
                loading_older: false,
                sender_names: HashMap::new(),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        self.inner.lock().await.room_id
    }

    fn page_query(&self, room_id: RoomId) -> Query {
        Query::from(Table::Messages)
            .filter(Filter::eq("room_id", room_id))
            .order_by(Order::desc("created_at"))
            .limit(self.page_size)
    }

    /// Load the newest page of `room_id`, replacing whatever was loaded.
    pub async fn load_initial(&self, room_id: RoomId) -> Result<PageLoad> {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.room_id = Some(room_id);
            inner.loading_older = false;
            inner.timeline = MessageTimeline::new();
            inner.generation
        };

        let rows = self.gateway.query(self.page_query(room_id)).await?;
        let page: Vec<MessageRecord> = decode_rows(rows)?;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.room_id != Some(room_id) {
            debug!(%room_id, "discarding stale initial page");
            return Ok(PageLoad::Stale);
        }
        let names = std::mem::take(&mut inner.sender_names);
        inner.timeline.replace_page(page, self.page_size);
        inner.timeline.fill_sender_names(&names);
        inner.sender_names = names;
        let has_more = inner.timeline.has_more();
        info!(%room_id, loaded = inner.timeline.len(), has_more, "initial page loaded");
        Ok(PageLoad::Loaded {
            messages: inner.timeline.messages().to_vec(),
            has_more,
        })
    }

    /// Fetch one page strictly older than the anchor and prepend it. Only
    /// one backward fetch runs at a time.
    pub async fn load_older(&self) -> Result<PageLoad> {
        let (room_id, generation, before) = {
            let mut inner = self.inner.lock().await;
            let Some(room_id) = inner.room_id else {
                return Ok(PageLoad::Stale);
            };
            if inner.loading_older {
                return Ok(PageLoad::InFlight);
            }
            let Some(anchor) = inner.timeline.anchor() else {
                return Ok(PageLoad::Exhausted);
            };
            let before = anchor.created_at;
            inner.loading_older = true;
            (room_id, inner.generation, before)
        };

        let query = self
            .page_query(room_id)
            .filter(Filter::lt("created_at", before));
        let fetched = self.gateway.query(query).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(%room_id, "discarding stale older page");
            return Ok(PageLoad::Stale);
        }
        inner.loading_older = false;
        let page: Vec<MessageRecord> = decode_rows(fetched?)?;
        let names = std::mem::take(&mut inner.sender_names);
        let added = inner.timeline.prepend_older(page, self.page_size);
        inner.timeline.fill_sender_names(&names);
        inner.sender_names = names;
        let has_more = inner.timeline.has_more();
        debug!(%room_id, added, has_more, "older page loaded");
        Ok(PageLoad::Loaded {
            messages: inner.timeline.messages()[..added].to_vec(),
            has_more,
        })
    }

    /// Apply a pushed insert. Ignored for other rooms and known ids.
    pub async fn apply_insert(&self, mut message: MessageRecord) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.room_id != Some(message.room_id) {
            return false;
        }
        fill_sender_name(&mut message, &inner.sender_names);
        inner.timeline.apply_insert(message)
    }

    pub async fn apply_read_update(&self, id: MessageId, read_by: Vec<UserId>) -> bool {
        self.inner.lock().await.timeline.apply_read_update(id, read_by)
    }

    /// Names used for messages whose sender was not embedded.
    pub async fn set_sender_names(&self, names: HashMap<UserId, String>) {
        let mut inner = self.inner.lock().await;
        inner.timeline.fill_sender_names(&names);
        inner.sender_names = names;
    }

    pub async fn snapshot(&self) -> Vec<MessageRecord> {
        self.inner.lock().await.timeline.messages().to_vec()
    }

    pub async fn get(&self, id: MessageId) -> Option<MessageRecord> {
        self.inner.lock().await.timeline.get(id).cloned()
    }

    pub async fn anchor(&self) -> Option<MessageId> {
        self.inner
            .lock()
            .await
            .timeline
            .anchor()
            .map(|message| message.id)
    }

    pub async fn has_more(&self) -> bool {
        self.inner.lock().await.timeline.has_more()
    }

    pub async fn is_loading_older(&self) -> bool {
        self.inner.lock().await.loading_older
    }

    /// Detach from the room; late responses are dropped afterwards.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.room_id = None;
        inner.loading_older = false;
        inner.timeline = MessageTimeline::new();
    }
}

#[cfg(test)]
#[path = "tests/message_store_tests.rs"]
mod tests;
