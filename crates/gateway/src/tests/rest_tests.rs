use std::{collections::HashMap, sync::Arc};

use super::*;
use crate::{Order, Query};
use axum::{
    extract::{Query as QueryParams, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct MockBackend {
    seen_params: Arc<Mutex<Vec<HashMap<String, String>>>>,
    seen_auth: Arc<Mutex<Vec<String>>>,
    seen_bodies: Arc<Mutex<Vec<Value>>>,
}

async fn list_messages(
    State(state): State<MockBackend>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    state.seen_params.lock().await.push(params);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.seen_auth.lock().await.push(auth.to_owned());
    }
    Json(json!([{ "id": "m1", "content": "hi" }]))
}

async fn create_room(
    State(state): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let prefer = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    state.seen_bodies.lock().await.push(body.clone());
    if prefer != "return=representation" {
        return (StatusCode::CREATED, Json(json!([])));
    }
    let mut row = body;
    row["id"] = json!("room-1");
    (StatusCode::CREATED, Json(json!([row])))
}

async fn reject_profile_update() -> (StatusCode, Json<Value>) {
    (
        StatusCode::CONFLICT,
        Json(json!({ "code": "23505", "message": "duplicate key value", "details": null })),
    )
}

async fn append_reader_rpc(State(state): State<MockBackend>, Json(body): Json<Value>) -> StatusCode {
    state.seen_bodies.lock().await.push(body);
    StatusCode::NO_CONTENT
}

async fn issue_token(
    QueryParams(params): QueryParams<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if params.get("grant_type").map(String::as_str) != Some("password") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "unsupported_grant_type" })));
    }
    if body["password"] != "secret" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "access_token": "jwt-token",
            "token_type": "bearer",
            "user": { "id": "7d1f0a52-3c1e-4c39-8d2e-2d9a8f0f3b11", "email": body["email"] }
        })),
    )
}

async fn spawn_backend() -> (String, MockBackend) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = MockBackend::default();
    let app = Router::new()
        .route("/rest/v1/messages", get(list_messages))
        .route("/rest/v1/chat_rooms", post(create_room))
        .route("/rest/v1/profiles", patch(reject_profile_update))
        .route("/rest/v1/rpc/append_message_reader", post(append_reader_rpc))
        .route("/auth/v1/token", post(issue_token))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/"), state)
}

#[test]
fn encodes_filters_as_operator_params() {
    let query = Query::from(Table::Messages)
        .filter(Filter::eq("room_id", "r1"))
        .filter(Filter::neq("sender_id", "u1"))
        .filter(Filter::lt("created_at", "2024-05-01T10:00:00Z"))
        .filter(Filter::is_in("id", ["a", "b,c"]))
        .order_by(Order::desc("is_important"))
        .order_by(Order::desc("created_at"))
        .limit(30);
    let params: HashMap<String, String> = query_params(&query).into_iter().collect();
    assert_eq!(params["select"], "*");
    assert_eq!(params["room_id"], "eq.r1");
    assert_eq!(params["sender_id"], "neq.u1");
    assert_eq!(params["created_at"], "lt.2024-05-01T10:00:00Z");
    assert_eq!(params["id"], "in.(\"a\",\"b,c\")");
    assert_eq!(params["order"], "is_important.desc,created_at.desc");
    assert_eq!(params["limit"], "30");
}

#[test]
fn derives_websocket_url_from_base() {
    let gateway = RestGateway::new("https://demo.example.co/", "anon").expect("gateway");
    assert_eq!(
        gateway.realtime_url().expect("ws url"),
        "wss://demo.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
    );
}

#[tokio::test]
async fn query_sends_params_and_uses_session_token() {
    let (base_url, backend) = spawn_backend().await;
    let gateway = RestGateway::new(&base_url, "anon-key").expect("gateway");

    gateway
        .query(Query::from(Table::Messages).filter(Filter::eq("room_id", "r1")))
        .await
        .expect("anonymous query");
    gateway.sign_in("amy@example.com", "secret").await.expect("sign in");
    let rows = gateway
        .query(Query::from(Table::Messages).limit(1))
        .await
        .expect("query");

    assert_eq!(rows[0]["id"], "m1");
    let params = backend.seen_params.lock().await;
    assert_eq!(params[0]["room_id"], "eq.r1");
    assert_eq!(params[1]["limit"], "1");
    let auth = backend.seen_auth.lock().await;
    assert_eq!(auth[0], "Bearer anon-key");
    assert_eq!(auth[1], "Bearer jwt-token");
}

#[tokio::test]
async fn insert_returns_the_stored_representation() {
    let (base_url, _backend) = spawn_backend().await;
    let gateway = RestGateway::new(&base_url, "anon-key").expect("gateway");

    let row = gateway
        .insert(Table::ChatRooms, json!({ "name": "ops", "is_group": true }))
        .await
        .expect("insert");
    assert_eq!(row["id"], "room-1");
    assert_eq!(row["name"], "ops");
}

#[tokio::test]
async fn rejected_requests_carry_backend_message() {
    let (base_url, _backend) = spawn_backend().await;
    let gateway = RestGateway::new(&base_url, "anon-key").expect("gateway");

    let err = gateway
        .update(
            Table::Profiles,
            vec![Filter::eq("id", "u1")],
            json!({ "is_online": true }),
        )
        .await
        .expect_err("conflict");
    match err {
        GatewayError::Rejected { table, source } => {
            assert_eq!(table, Table::Profiles);
            assert_eq!(source.code, shared::error::ErrorCode::Conflict);
            assert_eq!(source.message, "duplicate key value");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn sign_in_surfaces_invalid_credentials() {
    let (base_url, _backend) = spawn_backend().await;
    let gateway = RestGateway::new(&base_url, "anon-key").expect("gateway");

    let err = gateway
        .sign_in("amy@example.com", "nope")
        .await
        .expect_err("bad password");
    assert!(matches!(err, GatewayError::Auth(ref message) if message == "Invalid login credentials"));
    assert!(gateway.current_session().await.is_none());
}

#[tokio::test]
async fn append_reader_calls_the_rpc() {
    let (base_url, backend) = spawn_backend().await;
    let gateway = RestGateway::new(&base_url, "anon-key").expect("gateway");
    let message_id = MessageId::new();
    let reader = UserId::new();

    gateway.append_reader(message_id, reader).await.expect("append");

    let bodies = backend.seen_bodies.lock().await;
    assert_eq!(bodies[0], json!({ "message_id": message_id, "reader_id": reader }));
}

#[tokio::test]
async fn subscribe_rejects_non_equality_filters() {
    let gateway = RestGateway::new("http://127.0.0.1:9/", "anon-key").expect("gateway");
    let err = gateway
        .subscribe(Table::Messages, Some(Filter::lt("created_at", "x")))
        .await
        .err()
        .expect("unsupported");
    assert!(matches!(err, GatewayError::Unsupported(_)));
}
