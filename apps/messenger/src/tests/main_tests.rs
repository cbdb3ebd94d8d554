use super::*;
use chrono::{TimeZone, Utc};

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("messenger").chain(args.iter().copied())).expect("parse")
}

fn message(sender: UserId, content: &str, kind: ContentKind) -> MessageRecord {
    MessageRecord {
        id: MessageId::new(),
        content: content.to_owned(),
        content_type: kind,
        sender_id: sender,
        room_id: RoomId::new(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).single().expect("timestamp"),
        reply_to: None,
        read_by: vec![sender],
        sender: None,
    }
}

#[test]
fn offline_mode_falls_back_to_demo_credentials() {
    let parsed = cli(&["--offline", "rooms"]);
    assert_eq!(
        credentials(&parsed).expect("credentials"),
        (DEMO_EMAIL.to_owned(), DEMO_PASSWORD.to_owned())
    );
}

#[test]
fn online_mode_needs_both_credentials() {
    let parsed = cli(&["--email", "amy@example.com", "rooms"]);
    if parsed.password.is_none() {
        assert!(credentials(&parsed).is_err());
    }
}

#[test]
fn settings_fields_are_set_by_stored_name() {
    let defaults = ChatSettings::default();

    let bigger = with_field(&defaults, "fontSize", "18").expect("font size");
    let colored = with_field(&defaults, "bgColor", "#ffffff").expect("color");

    assert_eq!(bigger.font_size, 18);
    assert_eq!(colored.bg_color, "#ffffff");
    assert!(colored.is_light_background());
    assert!(with_field(&defaults, "fontSize", "huge").is_err());
    assert!(with_field(&defaults, "theme", "dark").is_err());
}

#[test]
fn message_lines_mark_own_unread_and_system_notices() {
    let me = UserId::new();
    let other = UserId::new();

    assert_eq!(format_line(&message(me, "hi", ContentKind::Text), me, 2), "09:05  me: hi [2]");
    assert_eq!(
        format_line(&message(other, "a.pdf", ContentKind::File), me, 0),
        "09:05  Unknown: [file] a.pdf"
    );
    assert_eq!(
        format_line(&message(other, "Ben left the room.", ContentKind::System), me, 0),
        "09:05  -- Ben left the room."
    );
}

#[tokio::test]
async fn demo_workspace_signs_in_and_lists_the_team_room() {
    let gateway = demo_gateway().await;
    let session = AuthService::new(Arc::clone(&gateway))
        .sign_in(DEMO_EMAIL, DEMO_PASSWORD)
        .await
        .expect("demo login");
    let roster = RoomListAggregator::new(gateway, session.user_id);

    let rooms = roster.refresh().await.expect("rooms");

    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[1].display_name, "general");
    assert_eq!(rooms[1].unread_count, 2);
}
