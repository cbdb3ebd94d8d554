use std::{sync::Arc, time::Duration};

use client_core::{
    roster::RoomListAggregator, AuthError, AuthService, ChatRoomSession, ChatSettings,
    DirectChat, MemberDirectory, NoHost, RoomEvent, RoomUpdate, DEFAULT_PAGE_SIZE, SELF_ROOM_LABEL,
};
use gateway::{Gateway, MemoryGateway};
use serde_json::json;
use shared::domain::{ContentKind, UserId};
use tokio::sync::watch;

struct Team {
    gateway: Arc<MemoryGateway>,
    amy: UserId,
    ben: UserId,
}

async fn team() -> Team {
    let gateway = Arc::new(MemoryGateway::new());
    let amy = gateway.register_account("amy@example.com", "pw", "Amy").await;
    let ben = gateway.register_account("ben@example.com", "pw", "Ben").await;
    Team { gateway, amy, ben }
}

async fn open(team: &Team, user: UserId, room: &DirectChat) -> ChatRoomSession {
    let (_, settings) = watch::channel(ChatSettings::default());
    ChatRoomSession::open(
        team.gateway.clone(),
        user,
        room.room().id,
        Arc::new(NoHost),
        settings,
        DEFAULT_PAGE_SIZE,
    )
    .await
    .expect("open room")
}

#[tokio::test]
async fn login_refuses_unapproved_accounts() {
    let gateway = Arc::new(MemoryGateway::new());
    let pending = gateway.register_account("new@example.com", "pw", "New").await;
    gateway
        .update(
            gateway::Table::Profiles,
            vec![gateway::Filter::eq("id", pending)],
            json!({ "approval_status": "pending" }),
        )
        .await
        .expect("mark pending");
    let auth = AuthService::new(gateway.clone());

    assert!(matches!(
        auth.sign_in("new@example.com", "pw").await,
        Err(AuthError::PendingApproval)
    ));
    assert!(auth.restore().await.is_none());
    assert!(matches!(
        auth.sign_in("new@example.com", "wrong").await,
        Err(AuthError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn direct_conversation_between_two_people() {
    let team = team().await;
    let amy_roster = RoomListAggregator::new(team.gateway.clone(), team.amy)
        .with_leave_delay(Duration::ZERO);
    let ben_roster = RoomListAggregator::new(team.gateway.clone(), team.ben)
        .with_leave_delay(Duration::ZERO);
    let ben_profile = MemberDirectory::new(team.gateway.clone(), team.amy)
        .profile(team.ben)
        .await
        .expect("lookup")
        .expect("ben exists");
    let amy_profile = MemberDirectory::new(team.gateway.clone(), team.ben)
        .profile(team.amy)
        .await
        .expect("lookup")
        .expect("amy exists");

    let created = amy_roster.start_direct_chat(&ben_profile).await.expect("dm");
    let reused = ben_roster.start_direct_chat(&amy_profile).await.expect("dm");
    assert!(matches!(created, DirectChat::Created(_)));
    assert!(matches!(reused, DirectChat::Existing(_)));
    assert_eq!(created.room().id, reused.room().id);

    let amy_session = open(&team, team.amy, &created).await;
    amy_session.set_compose_text("hello Ben").await;
    let sent = amy_session.send_text().await.expect("send").expect("sent");
    let appended = amy_session
        .reduce(RoomEvent::Insert(sent.clone()))
        .await
        .expect("reduce");
    assert_eq!(appended, RoomUpdate::Appended(sent.id));

    let rooms = ben_roster.refresh().await.expect("refresh");
    assert_eq!(rooms[0].display_name, SELF_ROOM_LABEL);
    let dm = rooms.iter().find(|r| r.id() == created.room().id).expect("dm listed");
    assert_eq!(dm.display_name, "Amy");
    assert_eq!(dm.last_message, "hello Ben");
    assert_eq!(dm.unread_count, 1);

    let ben_session = open(&team, team.ben, &reused).await;
    let rooms = ben_roster.refresh().await.expect("refresh");
    let dm = rooms.iter().find(|r| r.id() == created.room().id).expect("dm listed");
    assert_eq!(dm.unread_count, 0);

    assert_eq!(ben_session.messages().await.len(), 1);
    assert_eq!(amy_session.unread_count(&sent).await, 1);
    let update = amy_session
        .reduce(RoomEvent::Update {
            message_id: sent.id,
            read_by: vec![team.amy, team.ben],
        })
        .await
        .expect("reduce");
    assert_eq!(update, RoomUpdate::ReadersChanged(sent.id));
    assert_eq!(amy_session.unread_count(&amy_session.messages().await[0]).await, 0);

    ben_roster.leave_room(reused.room().id).await.expect("leave");
    let rooms = amy_roster.refresh().await.expect("refresh");
    let dm = rooms.iter().find(|r| r.id() == created.room().id).expect("dm listed");
    assert_eq!(dm.last_message, "Ben left the room.");
    let amy_view = open(&team, team.amy, &created).await;
    let notice = amy_view.messages().await.pop().expect("notice");
    assert_eq!(notice.content_type, ContentKind::System);
    assert_eq!(amy_view.display_name().await, "No other members");

    let again = ben_roster.start_direct_chat(&amy_profile).await.expect("dm");
    assert!(matches!(again, DirectChat::Rejoined(_)));
    assert_eq!(again.room().id, created.room().id);
}

#[tokio::test]
async fn older_pages_load_until_exhausted() {
    let team = team().await;
    let roster = RoomListAggregator::new(team.gateway.clone(), team.amy);
    let room = roster.create_group_chat("history").await.expect("room");
    for n in 0..(DEFAULT_PAGE_SIZE + 5) {
        team.gateway
            .seed(
                gateway::Table::Messages,
                json!({
                    "room_id": room.id,
                    "sender_id": team.amy,
                    "content": format!("m{n}"),
                    "content_type": "text",
                    "read_by": [team.amy],
                    "created_at": format!("2024-05-01T08:{:02}:00Z", n),
                }),
            )
            .await;
    }
    let (_, settings) = watch::channel(ChatSettings::default());
    let session = ChatRoomSession::open(
        team.gateway.clone(),
        team.amy,
        room.id,
        Arc::new(NoHost),
        settings,
        DEFAULT_PAGE_SIZE,
    )
    .await
    .expect("open");

    assert_eq!(session.messages().await.len(), DEFAULT_PAGE_SIZE);
    assert!(session.has_more().await);
    session.load_older().await.expect("older");
    let messages = session.messages().await;
    assert_eq!(messages.len(), DEFAULT_PAGE_SIZE + 5);
    assert_eq!(messages[0].content, "m0");
    assert!(!session.has_more().await);
}
