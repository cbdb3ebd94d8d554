//! Boundary to the hosted backend: typed CRUD over tables, row-level change
//! subscriptions and password sessions.

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{stream::BoxStream, Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{MessageId, UserId},
    error::ApiError,
};
use thiserror::Error;
use tokio::task::JoinHandle;

pub mod memory;
pub mod realtime;
pub mod rest;

pub use memory::{MemoryGateway, Operation, OperationKind};
pub use rest::RestGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Messages,
    ChatRooms,
    RoomMembers,
    BoardPosts,
    Profiles,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Messages,
        Table::ChatRooms,
        Table::RoomMembers,
        Table::BoardPosts,
        Table::Profiles,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Messages => "messages",
            Table::ChatRooms => "chat_rooms",
            Table::RoomMembers => "room_members",
            Table::BoardPosts => "board_posts",
            Table::Profiles => "profiles",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.as_str() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Lt(String, Value),
    In(String, Vec<Value>),
}

fn json_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Eq(column.into(), json_value(value))
    }

    pub fn neq(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Neq(column.into(), json_value(value))
    }

    pub fn lt(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Lt(column.into(), json_value(value))
    }

    pub fn is_in<T: Serialize>(column: impl Into<String>, values: impl IntoIterator<Item = T>) -> Self {
        Self::In(column.into(), values.into_iter().map(json_value).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _)
            | Filter::Neq(column, _)
            | Filter::Lt(column, _)
            | Filter::In(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// Row the event is about: the new row, or the old one for deletes.
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            ChangeKind::Delete => self.old.as_ref().or(self.new.as_ref()),
            ChangeKind::Insert | ChangeKind::Update => self.new.as_ref(),
        }
    }

    pub fn decode_row<T: DeserializeOwned>(&self) -> Result<T> {
        let row = self.row().cloned().ok_or(GatewayError::NotFound { table: self.table })?;
        decode_row(row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub access_token: Option<String>,
}

/// Live feed of change events for one table/filter. Dropping it ends the
/// subscription and stops any background worker feeding it.
pub struct Subscription {
    events: BoxStream<'static, ChangeEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn from_stream(events: BoxStream<'static, ChangeEvent>) -> Self {
        Self {
            events,
            worker: None,
        }
    }

    pub fn with_worker(events: BoxStream<'static, ChangeEvent>, worker: JoinHandle<()>) -> Self {
        Self {
            events,
            worker: Some(worker),
        }
    }

    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.events.next().await
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not signed in")]
    NoSession,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("{table} record not found")]
    NotFound { table: Table },
    #[error("{table} request rejected: {source}")]
    Rejected {
        table: Table,
        #[source]
        source: ApiError,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid backend url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// The hosted backend as consumed by the client. Implementations must be
/// safe to share across tasks.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn query(&self, query: Query) -> Result<Vec<Value>>;
    async fn insert(&self, table: Table, record: Value) -> Result<Value>;
    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> Result<()>;
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<()>;
    /// Add `reader` to the message's reader set if absent, atomically.
    async fn append_reader(&self, message_id: MessageId, reader: UserId) -> Result<()>;
    async fn subscribe(&self, table: Table, filter: Option<Filter>) -> Result<Subscription>;
    async fn current_session(&self) -> Option<Session>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;
    async fn sign_out(&self) -> Result<()>;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(decode_row).collect()
}

pub fn decode_row<T: DeserializeOwned>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

pub fn encode_record<T: Serialize>(record: &T) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}
