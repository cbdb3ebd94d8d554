//! In-process gateway holding every table in memory. Backs the offline mode
//! of the messenger and the test suites.

use std::{
    cmp::Ordering,
    collections::{HashMap, VecDeque},
    future,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use shared::{
    domain::{MessageId, UserId},
    error::{ApiError, ErrorCode},
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;
use uuid::Uuid;

use crate::{
    ChangeEvent, ChangeKind, Filter, Gateway, GatewayError, Order, Query, Result, Session,
    Subscription, Table,
};

const CHANGE_FEED_CAPACITY: usize = 1024;
/// Most recent operations kept in the log; older entries are dropped.
pub const DEFAULT_OPERATION_LOG_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Insert,
    Update,
    Delete,
    AppendReader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub table: Table,
}

struct Account {
    password: String,
    user_id: UserId,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Value>>,
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    operations: VecDeque<Operation>,
    operation_log_capacity: usize,
    pending_failures: Vec<Operation>,
}

impl MemoryState {
    fn rows_mut(&mut self, table: Table) -> &mut Vec<Value> {
        self.tables.entry(table).or_default()
    }

    fn record(&mut self, kind: OperationKind, table: Table) -> Result<()> {
        let operation = Operation { kind, table };
        if self.operation_log_capacity > 0 {
            if self.operations.len() == self.operation_log_capacity {
                self.operations.pop_front();
            }
            self.operations.push_back(operation);
        }
        if let Some(idx) = self.pending_failures.iter().position(|op| *op == operation) {
            self.pending_failures.remove(idx);
            return Err(GatewayError::Rejected {
                table,
                source: ApiError::new(ErrorCode::Internal, format!("injected {kind:?} failure")),
            });
        }
        Ok(())
    }
}

pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    changes: broadcast::Sender<ChangeEvent>,
    query_delay: Duration,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            state: Mutex::new(MemoryState {
                operation_log_capacity: DEFAULT_OPERATION_LOG_CAPACITY,
                ..MemoryState::default()
            }),
            changes,
            query_delay: Duration::ZERO,
        }
    }

    /// Delay every query, to exercise overlapping requests.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Create a login and its approved profile row.
    /// Keep at most `capacity` operations in the log; zero disables it.
    pub fn with_operation_log_capacity(mut self, capacity: usize) -> Self {
        let state = self.state.get_mut();
        state.operation_log_capacity = capacity;
        state.operations.truncate(capacity);
        self
    }

    pub async fn register_account(&self, email: &str, password: &str, name: &str) -> UserId {
        let user_id = UserId::new();
        let mut state = self.state.lock().await;
        state.accounts.insert(
            email.to_owned(),
            Account {
                password: password.to_owned(),
                user_id,
            },
        );
        let profile = json!({
            "id": user_id,
            "name": name,
            "email": email,
            "is_online": false,
            "approval_status": "approved",
        });
        state.rows_mut(Table::Profiles).push(profile);
        user_id
    }

    /// Put a row in place without logging an operation or emitting a change.
    pub async fn seed(&self, table: Table, row: Value) -> Value {
        let row = with_defaults(row);
        self.state.lock().await.rows_mut(table).push(row.clone());
        row
    }

    pub async fn rows(&self, table: Table) -> Vec<Value> {
        self.state
            .lock()
            .await
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn operations(&self) -> Vec<Operation> {
        self.state.lock().await.operations.iter().copied().collect()
    }

    pub async fn count_operations(&self, kind: OperationKind, table: Table) -> usize {
        self.state
            .lock()
            .await
            .operations
            .iter()
            .filter(|op| op.kind == kind && op.table == table)
            .count()
    }

    pub async fn clear_operations(&self) {
        self.state.lock().await.operations.clear();
    }

    /// Make the next matching operation fail with a rejected request.
    pub async fn fail_next(&self, kind: OperationKind, table: Table) {
        self.state
            .lock()
            .await
            .pending_failures
            .push(Operation { kind, table });
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is the normal idle state.
        let _ = self.changes.send(event);
    }
}

fn with_defaults(row: Value) -> Value {
    let Value::Object(mut object) = row else {
        return row;
    };
    object
        .entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    object.entry("created_at").or_insert_with(|| {
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
    });
    Value::Object(object)
}

fn as_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Ordering between two non-null JSON scalars; timestamps compare
/// chronologically whatever their fractional precision.
fn compare_scalars(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => match (as_timestamp(l), as_timestamp(r)) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => Some(l.cmp(r)),
        },
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn field<'a>(row: &'a Value, column: &str) -> Option<&'a Value> {
    row.get(column).filter(|value| !value.is_null())
}

pub(crate) fn row_matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, expected) => field(row, column) == Some(expected),
        Filter::Neq(column, expected) => {
            field(row, column).is_some_and(|value| value != expected)
        }
        Filter::Lt(column, bound) => field(row, column)
            .and_then(|value| compare_scalars(value, bound))
            .is_some_and(Ordering::is_lt),
        Filter::In(column, candidates) => {
            field(row, column).is_some_and(|value| candidates.contains(value))
        }
    }
}

/// Nulls sort as the greatest value, so they come last ascending and first
/// descending.
fn compare_rows(left: &Value, right: &Value, order: &[Order]) -> Ordering {
    for key in order {
        let ordering = match (field(left, &key.column), field(right, &key.column)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => compare_scalars(l, r).unwrap_or(Ordering::Equal),
        };
        let ordering = if key.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn expect_object(table: Table, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(GatewayError::Unsupported(format!(
            "{table} expects an object, got {other}"
        ))),
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn query(&self, query: Query) -> Result<Vec<Value>> {
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        let mut state = self.state.lock().await;
        state.record(OperationKind::Query, query.table)?;
        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|filter| row_matches(row, filter)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|l, r| compare_rows(l, r, &query.order));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        let record = Value::Object(expect_object(table, record)?);
        let row = with_defaults(record);
        {
            let mut state = self.state.lock().await;
            state.record(OperationKind::Insert, table)?;
            state.rows_mut(table).push(row.clone());
        }
        self.publish(ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            new: Some(row.clone()),
            old: None,
        });
        Ok(row)
    }

    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> Result<()> {
        let patch = expect_object(table, patch)?;
        let mut changed = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.record(OperationKind::Update, table)?;
            for row in state.rows_mut(table).iter_mut() {
                if !filters.iter().all(|filter| row_matches(row, filter)) {
                    continue;
                }
                let old = row.clone();
                if let Value::Object(object) = row {
                    for (key, value) in &patch {
                        object.insert(key.clone(), value.clone());
                    }
                }
                changed.push((old, row.clone()));
            }
        }
        for (old, new) in changed {
            self.publish(ChangeEvent {
                table,
                kind: ChangeKind::Update,
                new: Some(new),
                old: Some(old),
            });
        }
        Ok(())
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> Result<()> {
        let removed: Vec<Value> = {
            let mut state = self.state.lock().await;
            state.record(OperationKind::Delete, table)?;
            let rows = state.rows_mut(table);
            let (removed, kept) = std::mem::take(rows)
                .into_iter()
                .partition(|row| filters.iter().all(|filter| row_matches(row, filter)));
            *rows = kept;
            removed
        };
        for old in removed {
            self.publish(ChangeEvent {
                table,
                kind: ChangeKind::Delete,
                new: None,
                old: Some(old),
            });
        }
        Ok(())
    }

    async fn append_reader(&self, message_id: MessageId, reader: UserId) -> Result<()> {
        let table = Table::Messages;
        let id = json!(message_id);
        let reader = json!(reader);
        let change = {
            let mut state = self.state.lock().await;
            state.record(OperationKind::AppendReader, table)?;
            let row = state
                .rows_mut(table)
                .iter_mut()
                .find(|row| row.get("id") == Some(&id))
                .ok_or(GatewayError::NotFound { table })?;
            let old = row.clone();
            let Value::Object(object) = row else {
                return Err(GatewayError::NotFound { table });
            };
            let readers = object
                .entry("read_by")
                .or_insert_with(|| Value::Array(Vec::new()));
            if readers.is_null() {
                *readers = Value::Array(Vec::new());
            }
            match readers {
                Value::Array(list) if !list.contains(&reader) => {
                    list.push(reader);
                    Some((old, row.clone()))
                }
                _ => None,
            }
        };
        if let Some((old, new)) = change {
            self.publish(ChangeEvent {
                table,
                kind: ChangeKind::Update,
                new: Some(new),
                old: Some(old),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, table: Table, filter: Option<Filter>) -> Result<Subscription> {
        let events = BroadcastStream::new(self.changes.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%table, skipped, "memory gateway subscriber lagged");
                    return future::ready(None);
                }
            };
            let wanted = event.table == table
                && filter.as_ref().map_or(true, |filter| {
                    event.row().is_some_and(|row| row_matches(row, filter))
                });
            future::ready(wanted.then_some(event))
        });
        Ok(Subscription::from_stream(events.boxed()))
    }

    async fn current_session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let mut state = self.state.lock().await;
        let user_id = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user_id,
            _ => return Err(GatewayError::Auth("Invalid login credentials".into())),
        };
        let session = Session {
            user_id,
            email: email.to_owned(),
            access_token: Some(Uuid::new_v4().to_string()),
        };
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.state.lock().await.session = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
