//! Change feed over the backend's Phoenix-channel websocket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{ChangeEvent, ChangeKind, GatewayError, Result, Subscription, Table};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CHANGE_BUFFER: usize = 256;
const JOIN_REF: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelJoin {
    pub topic: String,
    pub table: Table,
    /// `column=eq.value`, as the change feed expects it.
    pub filter: Option<String>,
    pub access_token: Option<String>,
}

pub fn join_frame(join: &ChannelJoin, reference: u64) -> Value {
    let mut change = json!({
        "event": "*",
        "schema": "public",
        "table": join.table.as_str(),
    });
    if let Some(filter) = &join.filter {
        change["filter"] = Value::String(filter.clone());
    }
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        },
    });
    if let Some(token) = &join.access_token {
        payload["access_token"] = Value::String(token.clone());
    }
    json!({
        "topic": join.topic,
        "event": "phx_join",
        "payload": payload,
        "ref": reference.to_string(),
        "join_ref": reference.to_string(),
    })
}

pub fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

fn change_kind(name: &str) -> Option<ChangeKind> {
    match name {
        "INSERT" => Some(ChangeKind::Insert),
        "UPDATE" => Some(ChangeKind::Update),
        "DELETE" => Some(ChangeKind::Delete),
        _ => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<Value> {
    value
        .filter(|row| row.as_object().is_some_and(|object| !object.is_empty()))
        .cloned()
}

/// The server's reason when `text` is a non-ok reply to the join sent with
/// `join_ref`.
pub fn join_rejection(text: &str, join_ref: u64) -> Option<String> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("event")?.as_str()? != "phx_reply" {
        return None;
    }
    if frame.get("ref")?.as_str()? != join_ref.to_string() {
        return None;
    }
    let payload = frame.get("payload")?;
    let status = payload.get("status").and_then(Value::as_str).unwrap_or("");
    if status == "ok" {
        return None;
    }
    let reason = payload
        .get("response")
        .and_then(|response| response.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or(status);
    Some(reason.to_owned())
}

/// Decode one server frame into a change event. Replies, heartbeats and
/// presence frames yield `None`.
pub fn parse_change_frame(text: &str) -> Option<ChangeEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let event = frame.get("event")?.as_str()?;
    let payload = frame.get("payload")?;
    let data = match event {
        "postgres_changes" => payload.get("data")?,
        "INSERT" | "UPDATE" | "DELETE" => payload,
        _ => return None,
    };
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .and_then(change_kind)?;
    let table = Table::from_name(data.get("table")?.as_str()?)?;
    Some(ChangeEvent {
        table,
        kind,
        new: non_empty(data.get("record")),
        old: non_empty(data.get("old_record")),
    })
}

pub async fn subscribe(ws_url: String, join: ChannelJoin) -> Result<Subscription> {
    let (stream, _) = connect_async(&ws_url)
        .await
        .map_err(|err| GatewayError::Transport(format!("failed to connect change feed: {err}")))?;
    let (mut writer, mut reader) = stream.split();
    writer
        .send(Message::Text(join_frame(&join, JOIN_REF).to_string()))
        .await
        .map_err(|err| GatewayError::Transport(format!("failed to join {}: {err}", join.topic)))?;

    let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
    let table = join.table;
    let topic = join.topic;
    let worker = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut reference = JOIN_REF;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    reference += 1;
                    let frame = heartbeat_frame(reference).to_string();
                    if let Err(err) = writer.send(Message::Text(frame)).await {
                        warn!(%topic, "change feed heartbeat failed: {err}");
                        break;
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reason) = join_rejection(&text, JOIN_REF) {
                            warn!(%topic, %reason, "change feed join rejected");
                            break;
                        }
                        let Some(event) = parse_change_frame(&text) else {
                            continue;
                        };
                        if event.table == table && tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%topic, "change feed receive failed: {err}");
                        break;
                    }
                },
                _ = tx.closed() => break,
            }
        }
        debug!(%topic, "change feed closed");
    });

    Ok(Subscription::with_worker(
        ReceiverStream::new(rx).boxed(),
        worker,
    ))
}
